//! Multi-tenant ledger service.
//!
//! Maintains monetary accounts whose value is shared across tenants and
//! records transactions as ordered sequences of operations (hold, release,
//! debit, credit). Each apply atomically plays a batch of operations against
//! an account, updates the running balance and held amount, appends the
//! operations, and journals a per-operation event capturing the running
//! state at that point.

use rocket::{Ignite, Rocket};
use tracing::{info, info_span};

use crate::env::Config;
use crate::lock::AccountLocks;

mod api;
mod apply;
mod deadline;
pub mod env;
mod error;
mod lock;
mod model;
mod play;
mod store;

pub use env::setup_tracing;

#[cfg(test)]
pub(crate) mod test_utils;

/// Grace given to in-flight requests on shutdown, after which runtime tasks
/// get one more second of mercy before the runtime is torn down.
const SHUTDOWN_GRACE_SECS: u32 = 4;
const SHUTDOWN_MERCY_SECS: u32 = 1;

/// Runs the service until shutdown: builds the pool, applies migrations,
/// serves the API, and on SIGINT stops accepting requests, drains in-flight
/// ones within the grace window, then closes the pool.
pub async fn launch(config: Config) -> anyhow::Result<()> {
    let launch_span = info_span!("launch");
    let _enter = launch_span.enter();

    let pool = config.get_sqlite_pool().await?;
    sqlx::migrate!().run(&pool).await?;
    info!("database ready");

    let rocket_config = rocket::Config::figment()
        .merge(("address", config.address.clone()))
        .merge(("port", config.port))
        .merge(("shutdown.grace", SHUTDOWN_GRACE_SECS))
        .merge(("shutdown.mercy", SHUTDOWN_MERCY_SECS));

    let rocket = rocket::custom(rocket_config)
        .mount("/", api::routes())
        .manage(pool.clone())
        .manage(config)
        .manage(AccountLocks::new());

    let _ignited: Rocket<Ignite> = rocket.launch().await?;

    // The server has drained; release the store.
    pool.close().await;
    info!("Shutdown complete");
    Ok(())
}
