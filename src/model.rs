//! Ledger domain model: accounts, transactions, operations, and the event
//! journal. Amounts are signed 64-bit minor currency units; the sign of a
//! movement is carried by the operation kind, never by the amount.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The four monetary operation kinds. The string form (`"HOLD"`, ...) exists
/// only at the wire and storage boundaries; unknown strings are rejected by
/// the request adapter and never reach the playback engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub(crate) enum OperationKind {
    Hold,
    Release,
    Debit,
    Credit,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown operation type: {0}")]
pub(crate) struct ParseOperationKindError(String);

impl FromStr for OperationKind {
    type Err = ParseOperationKindError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "HOLD" => Ok(Self::Hold),
            "RELEASE" => Ok(Self::Release),
            "DEBIT" => Ok(Self::Debit),
            "CREDIT" => Ok(Self::Credit),
            other => Err(ParseOperationKindError(other.to_string())),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hold => "HOLD",
            Self::Release => "RELEASE",
            Self::Debit => "DEBIT",
            Self::Credit => "CREDIT",
        };
        f.write_str(name)
    }
}

/// A globally scoped store of value, not owned by any tenant.
///
/// `running_balance` and `running_held` are non-negative after every
/// committed apply. `last_played_sequence` counts every operation ever
/// applied to the account; a wraparound into negative is a fatal limit
/// detected by the playback engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub(crate) account_id: i64,
    pub(crate) user_ari: String,
    pub(crate) last_played_sequence: i64,
    pub(crate) running_balance: i64,
    pub(crate) running_held: i64,
}

/// A tenant-scoped container of operations against one account.
///
/// `transaction_id` is assigned by the store on first persist and is `None`
/// until then. The aggregate columns mirror the signed sum of the
/// transaction's operations after every commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) transaction_id: Option<i64>,
    pub(crate) tenant: String,
    pub(crate) account_id: i64,
    pub(crate) held_amount_in_cents: i64,
    pub(crate) debited_amount_in_cents: i64,
    pub(crate) credited_amount_in_cents: i64,
    pub(crate) last_played_sequence: i64,
}

impl Transaction {
    /// A blank transaction for an apply that references no existing
    /// transaction id.
    pub(crate) fn open(account_id: i64, tenant: &str) -> Self {
        Self {
            transaction_id: None,
            tenant: tenant.to_string(),
            account_id,
            held_amount_in_cents: 0,
            debited_amount_in_cents: 0,
            credited_amount_in_cents: 0,
            last_played_sequence: 0,
        }
    }
}

/// An immutable, append-only entry within a transaction. `sequence` is the
/// transaction's `last_played_sequence` at the moment the operation was
/// applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Operation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) operation_id: Option<i64>,
    pub(crate) tenant: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) transaction_id: Option<i64>,
    pub(crate) operation_type: OperationKind,
    pub(crate) amount_in_cents: i64,
    pub(crate) sequence: i64,
}

/// An audit record journaled for every applied operation, capturing the
/// account's running state right after the operation took effect. `sequence`
/// is the account's `last_played_sequence` at application time.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub(crate) struct Event {
    pub(crate) event_id: Option<i64>,
    pub(crate) tenant: String,
    pub(crate) account_id: i64,
    pub(crate) transaction_id: Option<i64>,
    pub(crate) operation_id: Option<i64>,
    pub(crate) sequence: i64,
    pub(crate) running_balance: i64,
    pub(crate) running_held: i64,
}

/// A validated operation awaiting playback: a kind and a strictly positive
/// amount. Produced by the request adapter, consumed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OperationDraft {
    pub(crate) operation_type: OperationKind,
    pub(crate) amount_in_cents: i64,
}
