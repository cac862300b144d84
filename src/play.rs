//! The playback engine: a pure state transition computing the effect of a
//! batch of operations on an account and a transaction. Playback never
//! touches the store; persisting a [`PlayedOutcome`] is the coordinator's
//! job.
//!
//! Playing multiple operations atomically only extends to a single
//! transaction. Related operations spread across transactions make little
//! sense, so cross-transaction batches are not supported.

use tracing::{debug, error};

use crate::model::{Account, Event, Operation, OperationDraft, OperationKind, Transaction};

/// The result of playing a batch of operations: the post-batch account and
/// transaction, plus one sequenced operation and one journal event per input
/// draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PlayedOutcome {
    pub(crate) account: Account,
    pub(crate) transaction: Transaction,
    pub(crate) operations: Vec<Operation>,
    pub(crate) events: Vec<Event>,
}

/// Why a batch cannot be applied. Returned on the first offending operation;
/// everything played up to that point is discarded with the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub(crate) enum PlayError {
    #[error("invalid order of operations, results in negative account balance")]
    NegativeBalance,
    #[error("invalid order of operations, results in negatively held amount")]
    NegativeHold,
    #[error("account limit on operations reached")]
    AccountSequenceLimit,
    #[error("transaction limit on operations reached")]
    TransactionSequenceLimit,
}

/// Whether the account-level and transaction-level held totals can coexist.
/// The account's running held may only go negative together with the
/// transaction's own held (an ordering error the caller rejects); going
/// negative alone means the persisted state disagrees with the sum of its
/// parts, and continuing could silently corrupt the ledger.
fn held_totals_agree(account: &Account, transaction: &Transaction) -> bool {
    account.running_held >= 0 || transaction.held_amount_in_cents < 0
}

/// Plays `drafts` against copies of `account` and `transaction`, in request
/// order. Pure and deterministic: the inputs are never mutated, and playing
/// the same inputs twice yields equal outcomes.
///
/// A held total that disagrees with its transaction is fatal: the process
/// logs and exits rather than risk journaling from corrupt state.
pub(crate) fn play(
    account: &Account,
    transaction: &Transaction,
    drafts: &[OperationDraft],
) -> Result<PlayedOutcome, PlayError> {
    let mut played_account = account.clone();
    let mut played_transaction = transaction.clone();
    let mut operations = Vec::with_capacity(drafts.len());
    let mut events = Vec::with_capacity(drafts.len());

    for draft in drafts {
        debug!(
            account_id = played_account.account_id,
            operation_type = %draft.operation_type,
            amount_in_cents = draft.amount_in_cents,
            "playing operation"
        );

        // Signed wraparound from the additions is caught by the checks below.
        match draft.operation_type {
            OperationKind::Hold => {
                played_transaction.held_amount_in_cents = played_transaction
                    .held_amount_in_cents
                    .wrapping_add(draft.amount_in_cents);
                played_account.running_held =
                    played_account.running_held.wrapping_add(draft.amount_in_cents);
            }
            OperationKind::Release => {
                played_transaction.held_amount_in_cents -= draft.amount_in_cents;
                played_account.running_held -= draft.amount_in_cents;
            }
            OperationKind::Debit => {
                played_transaction.debited_amount_in_cents = played_transaction
                    .debited_amount_in_cents
                    .wrapping_add(draft.amount_in_cents);
                played_account.running_balance -= draft.amount_in_cents;
            }
            OperationKind::Credit => {
                played_transaction.credited_amount_in_cents = played_transaction
                    .credited_amount_in_cents
                    .wrapping_add(draft.amount_in_cents);
                played_account.running_balance =
                    played_account.running_balance.wrapping_add(draft.amount_in_cents);
            }
        }

        if played_account.running_balance < 0 {
            return Err(PlayError::NegativeBalance);
        }
        if !held_totals_agree(&played_account, &played_transaction) {
            error!(
                account_id = played_account.account_id,
                running_held = played_account.running_held,
                held_amount_in_cents = played_transaction.held_amount_in_cents,
                "accounting inconsistency, triage needed"
            );
            std::process::exit(1);
        }
        if played_transaction.held_amount_in_cents < 0 {
            return Err(PlayError::NegativeHold);
        }
        if played_account.last_played_sequence < 0 {
            return Err(PlayError::AccountSequenceLimit);
        }
        if played_transaction.last_played_sequence < 0 {
            return Err(PlayError::TransactionSequenceLimit);
        }

        played_account.last_played_sequence =
            played_account.last_played_sequence.wrapping_add(1);
        played_transaction.last_played_sequence =
            played_transaction.last_played_sequence.wrapping_add(1);

        operations.push(Operation {
            operation_id: None,
            tenant: played_transaction.tenant.clone(),
            transaction_id: played_transaction.transaction_id,
            operation_type: draft.operation_type,
            amount_in_cents: draft.amount_in_cents,
            sequence: played_transaction.last_played_sequence,
        });
        events.push(Event {
            event_id: None,
            tenant: played_transaction.tenant.clone(),
            account_id: played_account.account_id,
            transaction_id: played_transaction.transaction_id,
            operation_id: None,
            sequence: played_account.last_played_sequence,
            running_balance: played_account.running_balance,
            running_held: played_account.running_held,
        });
    }

    Ok(PlayedOutcome {
        account: played_account,
        transaction: played_transaction,
        operations,
        events,
    })
}
