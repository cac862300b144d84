//! Store gateway: the minimal set of primitives the apply coordinator and
//! the read endpoints run against the durable store. Every function
//! participates in a caller-supplied store transaction and honors the
//! caller's [`Deadline`], surfacing expiry as a distinct error kind.

use std::future::Future;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::deadline::Deadline;
use crate::error::StoreError;
use crate::model::{Account, Event, Operation, Transaction};

/// A transaction and its operations, ordered by sequence. The shape of the
/// get-transaction read response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TransactionWithOperations {
    pub(crate) transaction: Transaction,
    pub(crate) operations: Vec<Operation>,
}

async fn with_deadline<T>(
    deadline: Deadline,
    query: impl Future<Output = Result<T, sqlx::Error>>,
) -> Result<T, StoreError> {
    match deadline.timeout(query).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(StoreError::DeadlineExceeded),
    }
}

/// Inserts a new account for `user_ari` and returns the full row with its
/// assigned id. Fails with [`StoreError::DuplicateUserAri`] when an account
/// already exists for that principal.
pub(crate) async fn create_account(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    deadline: Deadline,
    user_ari: &str,
) -> Result<Account, StoreError> {
    let query = sqlx::query_as::<_, Account>(
        "INSERT INTO accounts (user_ari) VALUES (?1) \
         RETURNING account_id, user_ari, last_played_sequence, running_balance, running_held",
    )
    .bind(user_ari)
    .fetch_one(sql_tx.as_mut());

    match with_deadline(deadline, query).await {
        Err(StoreError::Database(sqlx::Error::Database(db))) if db.is_unique_violation() => {
            Err(StoreError::DuplicateUserAri)
        }
        other => other,
    }
}

/// Reads the account row for mutation. The caller must hold the account's
/// entry in the lock registry for the duration of the store transaction;
/// that mutex is what makes this read exclusive.
pub(crate) async fn lock_account(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    deadline: Deadline,
    account_id: i64,
) -> Result<Account, StoreError> {
    fetch_account(sql_tx, deadline, account_id).await
}

/// Non-locking account read for the read endpoints.
pub(crate) async fn get_account(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    deadline: Deadline,
    account_id: i64,
) -> Result<Account, StoreError> {
    fetch_account(sql_tx, deadline, account_id).await
}

async fn fetch_account(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    deadline: Deadline,
    account_id: i64,
) -> Result<Account, StoreError> {
    let query = sqlx::query_as::<_, Account>(
        "SELECT account_id, user_ari, last_played_sequence, running_balance, running_held \
         FROM accounts WHERE account_id = ?1",
    )
    .bind(account_id)
    .fetch_optional(sql_tx.as_mut());

    with_deadline(deadline, query)
        .await?
        .ok_or(StoreError::NotFound("account"))
}

/// Writes the account's sequence and running aggregates.
pub(crate) async fn update_account(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    deadline: Deadline,
    account: &Account,
) -> Result<(), StoreError> {
    let query = sqlx::query(
        "UPDATE accounts \
         SET last_played_sequence = ?1, running_balance = ?2, running_held = ?3 \
         WHERE account_id = ?4",
    )
    .bind(account.last_played_sequence)
    .bind(account.running_balance)
    .bind(account.running_held)
    .bind(account.account_id)
    .execute(sql_tx.as_mut());

    with_deadline(deadline, query).await?;
    Ok(())
}

/// Reads a transaction scoped to its tenant. A transaction id paired with
/// the wrong tenant is simply not found.
pub(crate) async fn get_transaction(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    deadline: Deadline,
    tenant: &str,
    transaction_id: i64,
) -> Result<Transaction, StoreError> {
    let query = sqlx::query_as::<_, Transaction>(
        "SELECT transaction_id, tenant, account_id, held_amount_in_cents, \
         debited_amount_in_cents, credited_amount_in_cents, last_played_sequence \
         FROM transactions \
         WHERE tenant = ?1 AND transaction_id = ?2",
    )
    .bind(tenant)
    .bind(transaction_id)
    .fetch_optional(sql_tx.as_mut());

    with_deadline(deadline, query)
        .await?
        .ok_or(StoreError::NotFound("transaction"))
}

/// Reads a transaction together with its operations, ordered by sequence.
pub(crate) async fn get_transaction_with_operations(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    deadline: Deadline,
    tenant: &str,
    transaction_id: i64,
) -> Result<TransactionWithOperations, StoreError> {
    let transaction = get_transaction(sql_tx, deadline, tenant, transaction_id).await?;

    let query = sqlx::query_as::<_, Operation>(
        "SELECT operation_id, tenant, transaction_id, operation_type, amount_in_cents, sequence \
         FROM operations \
         WHERE tenant = ?1 AND transaction_id = ?2 \
         ORDER BY sequence ASC",
    )
    .bind(tenant)
    .bind(transaction_id)
    .fetch_all(sql_tx.as_mut());

    let operations = with_deadline(deadline, query).await?;

    Ok(TransactionWithOperations {
        transaction,
        operations,
    })
}

/// Atomically creates a transaction row, its first operation, and the
/// operation's event. The transaction row is written with the aggregates
/// from `transaction` as played, so a single-operation apply needs no
/// further flush. Returns the assigned transaction id.
pub(crate) async fn create_transaction_with_first_op(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    deadline: Deadline,
    transaction: &Transaction,
    operation: &Operation,
    event: &Event,
) -> Result<i64, StoreError> {
    let query = sqlx::query_scalar::<_, i64>(
        "INSERT INTO transactions \
         (tenant, account_id, held_amount_in_cents, debited_amount_in_cents, \
          credited_amount_in_cents, last_played_sequence) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         RETURNING transaction_id",
    )
    .bind(&transaction.tenant)
    .bind(transaction.account_id)
    .bind(transaction.held_amount_in_cents)
    .bind(transaction.debited_amount_in_cents)
    .bind(transaction.credited_amount_in_cents)
    .bind(transaction.last_played_sequence)
    .fetch_one(sql_tx.as_mut());

    let transaction_id = with_deadline(deadline, query).await?;

    insert_operation_and_event(sql_tx, deadline, transaction, transaction_id, operation, event)
        .await?;

    Ok(transaction_id)
}

/// Inserts one operation and its event without touching the transaction row.
/// Used for every operation of a batch except the last.
pub(crate) async fn append_op(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    deadline: Deadline,
    transaction: &Transaction,
    operation: &Operation,
    event: &Event,
) -> Result<(), StoreError> {
    let transaction_id = transaction
        .transaction_id
        .ok_or(StoreError::NotFound("transaction"))?;

    insert_operation_and_event(sql_tx, deadline, transaction, transaction_id, operation, event)
        .await
}

/// Inserts one operation and its event and flushes the transaction's
/// aggregate columns to the values in `transaction`. Used for the last
/// operation of a batch against an existing transaction row.
pub(crate) async fn append_op_and_update_txn(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    deadline: Deadline,
    transaction: &Transaction,
    operation: &Operation,
    event: &Event,
) -> Result<(), StoreError> {
    let transaction_id = transaction
        .transaction_id
        .ok_or(StoreError::NotFound("transaction"))?;

    let query = sqlx::query(
        "UPDATE transactions \
         SET held_amount_in_cents = ?1, debited_amount_in_cents = ?2, \
             credited_amount_in_cents = ?3, last_played_sequence = ?4 \
         WHERE tenant = ?5 AND transaction_id = ?6",
    )
    .bind(transaction.held_amount_in_cents)
    .bind(transaction.debited_amount_in_cents)
    .bind(transaction.credited_amount_in_cents)
    .bind(transaction.last_played_sequence)
    .bind(&transaction.tenant)
    .bind(transaction_id)
    .execute(sql_tx.as_mut());

    with_deadline(deadline, query).await?;

    insert_operation_and_event(sql_tx, deadline, transaction, transaction_id, operation, event)
        .await
}

async fn insert_operation_and_event(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    deadline: Deadline,
    transaction: &Transaction,
    transaction_id: i64,
    operation: &Operation,
    event: &Event,
) -> Result<(), StoreError> {
    let query = sqlx::query_scalar::<_, i64>(
        "INSERT INTO operations \
         (tenant, transaction_id, operation_type, amount_in_cents, sequence) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         RETURNING operation_id",
    )
    .bind(&transaction.tenant)
    .bind(transaction_id)
    .bind(operation.operation_type)
    .bind(operation.amount_in_cents)
    .bind(operation.sequence)
    .fetch_one(sql_tx.as_mut());

    let operation_id = with_deadline(deadline, query).await?;

    let query = sqlx::query(
        "INSERT INTO events \
         (tenant, account_id, transaction_id, operation_id, sequence, \
          running_balance, running_held) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(&transaction.tenant)
    .bind(event.account_id)
    .bind(transaction_id)
    .bind(operation_id)
    .bind(event.sequence)
    .bind(event.running_balance)
    .bind(event.running_held)
    .execute(sql_tx.as_mut());

    with_deadline(deadline, query).await?;
    Ok(())
}

/// Pings the store. Used by the health check only.
pub(crate) async fn ping(pool: &SqlitePool, deadline: Deadline) -> Result<(), StoreError> {
    with_deadline(deadline, sqlx::query("SELECT 1").execute(pool)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::OperationKind;
    use crate::test_utils::setup_test_db;

    fn test_deadline() -> Deadline {
        Deadline::after(Duration::from_secs(2))
    }

    fn played_transaction(account_id: i64, tenant: &str) -> Transaction {
        Transaction {
            transaction_id: None,
            tenant: tenant.to_string(),
            account_id,
            held_amount_in_cents: 0,
            debited_amount_in_cents: 0,
            credited_amount_in_cents: 1_000,
            last_played_sequence: 1,
        }
    }

    fn played_operation(tenant: &str, sequence: i64) -> Operation {
        Operation {
            operation_id: None,
            tenant: tenant.to_string(),
            transaction_id: None,
            operation_type: OperationKind::Credit,
            amount_in_cents: 1_000,
            sequence,
        }
    }

    fn played_event(account_id: i64, tenant: &str, sequence: i64) -> Event {
        Event {
            event_id: None,
            tenant: tenant.to_string(),
            account_id,
            transaction_id: None,
            operation_id: None,
            sequence,
            running_balance: 1_000,
            running_held: 0,
        }
    }

    #[tokio::test]
    async fn create_account_assigns_ids_and_blank_state() {
        let pool = setup_test_db().await;
        let mut sql_tx = pool.begin().await.unwrap();

        let first = create_account(&mut sql_tx, test_deadline(), "ari:user:1")
            .await
            .unwrap();
        let second = create_account(&mut sql_tx, test_deadline(), "ari:user:2")
            .await
            .unwrap();
        sql_tx.commit().await.unwrap();

        assert_eq!(first.user_ari, "ari:user:1");
        assert_eq!(first.last_played_sequence, 0);
        assert_eq!(first.running_balance, 0);
        assert_eq!(first.running_held, 0);
        assert!(second.account_id > first.account_id);
    }

    #[tokio::test]
    async fn create_account_rejects_duplicate_user_ari() {
        let pool = setup_test_db().await;

        let mut sql_tx = pool.begin().await.unwrap();
        create_account(&mut sql_tx, test_deadline(), "ari:user:dup")
            .await
            .unwrap();
        sql_tx.commit().await.unwrap();

        let mut sql_tx = pool.begin().await.unwrap();
        let error = create_account(&mut sql_tx, test_deadline(), "ari:user:dup")
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::DuplicateUserAri));
    }

    #[tokio::test]
    async fn missing_account_is_not_found() {
        let pool = setup_test_db().await;
        let mut sql_tx = pool.begin().await.unwrap();

        let error = lock_account(&mut sql_tx, test_deadline(), 999)
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::NotFound("account")));
    }

    #[tokio::test]
    async fn update_account_round_trips() {
        let pool = setup_test_db().await;
        let mut sql_tx = pool.begin().await.unwrap();
        let mut account = create_account(&mut sql_tx, test_deadline(), "ari:user:update")
            .await
            .unwrap();

        account.last_played_sequence = 3;
        account.running_balance = 500;
        account.running_held = 200;
        update_account(&mut sql_tx, test_deadline(), &account)
            .await
            .unwrap();

        let reread = get_account(&mut sql_tx, test_deadline(), account.account_id)
            .await
            .unwrap();
        assert_eq!(reread, account);
    }

    #[tokio::test]
    async fn create_transaction_with_first_op_persists_all_three_rows() {
        let pool = setup_test_db().await;
        let mut sql_tx = pool.begin().await.unwrap();
        let account = create_account(&mut sql_tx, test_deadline(), "ari:user:create")
            .await
            .unwrap();

        let transaction = played_transaction(account.account_id, "acme");
        let transaction_id = create_transaction_with_first_op(
            &mut sql_tx,
            test_deadline(),
            &transaction,
            &played_operation("acme", 1),
            &played_event(account.account_id, "acme", 1),
        )
        .await
        .unwrap();
        sql_tx.commit().await.unwrap();

        let mut sql_tx = pool.begin().await.unwrap();
        let result = get_transaction_with_operations(
            &mut sql_tx,
            test_deadline(),
            "acme",
            transaction_id,
        )
        .await
        .unwrap();

        assert_eq!(result.transaction.transaction_id, Some(transaction_id));
        assert_eq!(result.transaction.credited_amount_in_cents, 1_000);
        assert_eq!(result.operations.len(), 1);
        assert_eq!(result.operations[0].sequence, 1);
        assert_eq!(
            result.operations[0].operation_type,
            OperationKind::Credit
        );

        let event: Event = sqlx::query_as(
            "SELECT event_id, tenant, account_id, transaction_id, operation_id, \
             sequence, running_balance, running_held \
             FROM events WHERE transaction_id = ?1",
        )
        .bind(transaction_id)
        .fetch_one(sql_tx.as_mut())
        .await
        .unwrap();
        assert_eq!(event.account_id, account.account_id);
        assert_eq!(event.operation_id, result.operations[0].operation_id);
        assert_eq!(event.running_balance, 1_000);
    }

    #[tokio::test]
    async fn append_op_leaves_the_transaction_row_untouched() {
        let pool = setup_test_db().await;
        let mut sql_tx = pool.begin().await.unwrap();
        let account = create_account(&mut sql_tx, test_deadline(), "ari:user:append")
            .await
            .unwrap();

        let mut transaction = played_transaction(account.account_id, "acme");
        let transaction_id = create_transaction_with_first_op(
            &mut sql_tx,
            test_deadline(),
            &transaction,
            &played_operation("acme", 1),
            &played_event(account.account_id, "acme", 1),
        )
        .await
        .unwrap();
        transaction.transaction_id = Some(transaction_id);

        append_op(
            &mut sql_tx,
            test_deadline(),
            &transaction,
            &played_operation("acme", 2),
            &played_event(account.account_id, "acme", 2),
        )
        .await
        .unwrap();

        let reread = get_transaction(&mut sql_tx, test_deadline(), "acme", transaction_id)
            .await
            .unwrap();
        // Aggregates still reflect the create; only the operation count grew.
        assert_eq!(reread.last_played_sequence, 1);
        let result = get_transaction_with_operations(
            &mut sql_tx,
            test_deadline(),
            "acme",
            transaction_id,
        )
        .await
        .unwrap();
        assert_eq!(result.operations.len(), 2);
    }

    #[tokio::test]
    async fn append_op_and_update_txn_flushes_aggregates() {
        let pool = setup_test_db().await;
        let mut sql_tx = pool.begin().await.unwrap();
        let account = create_account(&mut sql_tx, test_deadline(), "ari:user:flush")
            .await
            .unwrap();

        let mut transaction = played_transaction(account.account_id, "acme");
        let transaction_id = create_transaction_with_first_op(
            &mut sql_tx,
            test_deadline(),
            &transaction,
            &played_operation("acme", 1),
            &played_event(account.account_id, "acme", 1),
        )
        .await
        .unwrap();

        transaction.transaction_id = Some(transaction_id);
        transaction.credited_amount_in_cents = 2_000;
        transaction.last_played_sequence = 2;

        append_op_and_update_txn(
            &mut sql_tx,
            test_deadline(),
            &transaction,
            &played_operation("acme", 2),
            &played_event(account.account_id, "acme", 2),
        )
        .await
        .unwrap();

        let reread = get_transaction(&mut sql_tx, test_deadline(), "acme", transaction_id)
            .await
            .unwrap();
        assert_eq!(reread.credited_amount_in_cents, 2_000);
        assert_eq!(reread.last_played_sequence, 2);
    }

    #[tokio::test]
    async fn transactions_are_scoped_to_their_tenant() {
        let pool = setup_test_db().await;
        let mut sql_tx = pool.begin().await.unwrap();
        let account = create_account(&mut sql_tx, test_deadline(), "ari:user:tenant")
            .await
            .unwrap();

        let transaction = played_transaction(account.account_id, "tenant-x");
        let transaction_id = create_transaction_with_first_op(
            &mut sql_tx,
            test_deadline(),
            &transaction,
            &played_operation("tenant-x", 1),
            &played_event(account.account_id, "tenant-x", 1),
        )
        .await
        .unwrap();

        let error = get_transaction(&mut sql_tx, test_deadline(), "tenant-y", transaction_id)
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::NotFound("transaction")));
    }

    #[tokio::test]
    async fn expired_deadline_surfaces_as_deadline_exceeded() {
        let pool = setup_test_db().await;
        let mut sql_tx = pool.begin().await.unwrap();

        let deadline = Deadline::after(Duration::ZERO);
        let error = get_account(&mut sql_tx, deadline, 1).await.unwrap_err();
        assert!(matches!(error, StoreError::DeadlineExceeded));
    }
}
