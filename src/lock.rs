//! Account-level locks. SQLite has no `SELECT ... FOR UPDATE`, so the
//! exclusive row lock on the account is substituted by an in-process mutex
//! per account id: concurrent applies to the same account queue on the mutex
//! and execute serially, while different accounts proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

/// Registry of per-account locks, held as server-managed state. Each account
/// gets its own mutex, created on first use and kept for the life of the
/// process.
#[derive(Debug, Default)]
pub(crate) struct AccountLocks {
    locks: RwLock<HashMap<i64, Arc<Mutex<()>>>>,
}

impl AccountLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the lock guarding the given account.
    pub(crate) async fn lock_for(&self, account_id: i64) -> Arc<Mutex<()>> {
        // Most lookups hit an existing entry; take the read lock first.
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(&account_id) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().await;
        locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
