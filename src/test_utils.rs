//! Centralized test setup shared across test modules: an in-memory database
//! with migrations applied and a local rocket client wired like the real
//! server.

use std::str::FromStr;
use std::time::Duration;

use rocket::local::asynchronous::Client;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::deadline::Deadline;
use crate::lock::AccountLocks;
use crate::model::Account;
use crate::{api, store};

/// An in-memory SQLite database with all migrations applied. Capped at one
/// connection so every test task sees the same in-memory database.
pub(crate) async fn setup_test_db() -> SqlitePool {
    let options = SqliteConnectOptions::from_str(":memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();
    pool
}

/// Creates and commits an account directly through the store gateway.
pub(crate) async fn create_test_account(pool: &SqlitePool, user_ari: &str) -> Account {
    let deadline = Deadline::after(Duration::from_secs(1));
    let mut sql_tx = pool.begin().await.unwrap();
    let account = store::create_account(&mut sql_tx, deadline, user_ari)
        .await
        .unwrap();
    sql_tx.commit().await.unwrap();
    account
}

/// A local client against a rocket instance managed exactly like the real
/// server: fresh database, fresh lock registry.
pub(crate) async fn test_client() -> Client {
    let pool = setup_test_db().await;
    let rocket = rocket::build()
        .mount("/", api::routes())
        .manage(pool)
        .manage(AccountLocks::new());
    Client::tracked(rocket).await.expect("valid rocket instance")
}
