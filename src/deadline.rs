//! Per-request deadlines. A [`Deadline`] is an absolute point in time fixed
//! when a request enters the adapter and threaded through every blocking
//! store primitive, so a request's time budget is shared across all of its
//! store calls rather than reset per call.

use std::future::Future;
use std::time::Duration;

use tokio::time::error::Elapsed;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    at: Instant,
}

impl Deadline {
    pub(crate) fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// Runs `future` until it resolves or the deadline passes, whichever
    /// comes first.
    pub(crate) async fn timeout<F: Future>(&self, future: F) -> Result<F::Output, Elapsed> {
        tokio::time::timeout_at(self.at, future).await
    }
}
