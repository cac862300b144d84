//! The apply coordinator: runs a single execute-operations request end to
//! end. Acquires the account's lock, opens one store transaction, plays the
//! batch, persists the outcome in a fixed write order, and commits. At most
//! one apply per account is inside that window at a time.

use sqlx::SqlitePool;
use tracing::info;

use crate::deadline::Deadline;
use crate::error::{ApplyError, StoreError};
use crate::lock::AccountLocks;
use crate::model::{Account, OperationDraft, Transaction};
use crate::play::{self, PlayError};
use crate::store;

/// A validated apply request. `transaction_id` of `None` opens a new
/// transaction; `Some` appends to an existing one.
#[derive(Debug, Clone)]
pub(crate) struct ApplyCommand {
    pub(crate) account_id: i64,
    pub(crate) tenant: String,
    pub(crate) transaction_id: Option<i64>,
    pub(crate) operations: Vec<OperationDraft>,
}

/// What an apply produced. A rejection is not a server error: it carries the
/// pre-apply account (and transaction, when one was loaded) so the client
/// can reconcile, and nothing was persisted.
#[derive(Debug)]
pub(crate) enum ApplyOutcome {
    Committed {
        account: Account,
        transaction: Transaction,
    },
    Rejected {
        reason: PlayError,
        account: Account,
        transaction: Option<Transaction>,
    },
}

#[tracing::instrument(
    skip_all,
    fields(account_id = command.account_id, tenant = %command.tenant),
    level = tracing::Level::INFO
)]
pub(crate) async fn execute_operations(
    pool: &SqlitePool,
    locks: &AccountLocks,
    command: ApplyCommand,
    deadline: Deadline,
) -> Result<ApplyOutcome, ApplyError> {
    // Single point of serialization per account: everything below happens
    // while holding the account's lock.
    let lock = locks.lock_for(command.account_id).await;
    let _guard = deadline
        .timeout(lock.lock())
        .await
        .map_err(|_| StoreError::DeadlineExceeded)?;

    let mut sql_tx = pool.begin().await.map_err(StoreError::from)?;

    let account = store::lock_account(&mut sql_tx, deadline, command.account_id).await?;

    let (transaction, is_new) = match command.transaction_id {
        Some(transaction_id) => {
            let existing =
                store::get_transaction(&mut sql_tx, deadline, &command.tenant, transaction_id)
                    .await?;
            (existing, false)
        }
        None => (Transaction::open(command.account_id, &command.tenant), true),
    };

    let outcome = match play::play(&account, &transaction, &command.operations) {
        Ok(outcome) => outcome,
        Err(reason @ (PlayError::NegativeBalance | PlayError::NegativeHold)) => {
            sql_tx.rollback().await.map_err(StoreError::from)?;
            return Ok(ApplyOutcome::Rejected {
                reason,
                account,
                transaction: (!is_new).then_some(transaction),
            });
        }
        Err(limit) => return Err(ApplyError::Play(limit)),
    };

    let mut played_transaction = outcome.transaction;
    let last = outcome.operations.len().saturating_sub(1);

    for (index, (operation, event)) in
        outcome.operations.iter().zip(&outcome.events).enumerate()
    {
        if is_new && index == 0 {
            // The transaction row is created with its fully played
            // aggregates, so a one-operation batch needs no final flush.
            let transaction_id = store::create_transaction_with_first_op(
                &mut sql_tx,
                deadline,
                &played_transaction,
                operation,
                event,
            )
            .await?;
            played_transaction.transaction_id = Some(transaction_id);
            continue;
        }

        if index == last {
            store::append_op_and_update_txn(
                &mut sql_tx,
                deadline,
                &played_transaction,
                operation,
                event,
            )
            .await?;
            continue;
        }

        store::append_op(&mut sql_tx, deadline, &played_transaction, operation, event).await?;
    }

    store::update_account(&mut sql_tx, deadline, &outcome.account).await?;

    deadline
        .timeout(sql_tx.commit())
        .await
        .map_err(|_| StoreError::DeadlineExceeded)?
        .map_err(StoreError::from)?;

    info!(
        transaction_id = played_transaction.transaction_id,
        operations = outcome.operations.len(),
        running_balance = outcome.account.running_balance,
        running_held = outcome.account.running_held,
        "operations executed"
    );

    Ok(ApplyOutcome::Committed {
        account: outcome.account,
        transaction: played_transaction,
    })
}
