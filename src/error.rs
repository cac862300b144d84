//! Error types for the store gateway and the apply coordinator. Business
//! rejections from playback live in [`crate::play::PlayError`]; everything
//! here rolls the transactional unit back and surfaces as a server error.

use crate::play::PlayError;

/// Failures from the store gateway primitives.
#[derive(Debug, thiserror::Error)]
pub(crate) enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("an account already exists for this user ARI")]
    DuplicateUserAri,
    #[error("deadline exceeded during store operation")]
    DeadlineExceeded,
}

/// Failures from the apply coordinator that are not business rejections.
/// Sequence-limit playback errors land here: the account has effectively
/// exhausted its operation space and the request cannot succeed.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ApplyError {
    #[error("error executing database operations: {0}")]
    Store(#[from] StoreError),
    #[error("error playing operations: {0}")]
    Play(#[from] PlayError),
}
