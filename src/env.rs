//! Environment-driven configuration and process-wide setup: the listen
//! address, the store URL, the log level, and the SQLite pool settings.

use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::Level;

#[derive(clap::ValueEnum, Debug, Clone)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        match log_level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

impl From<&LogLevel> for Level {
    fn from(log_level: &LogLevel) -> Self {
        match log_level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Raw environment input. `HTTP_ADDRESS` and `DATABASE_URL` are required;
/// missing either is fatal at startup.
#[derive(Parser, Debug, Clone)]
pub struct Env {
    /// Listen address as host:port; an empty host binds all interfaces
    #[clap(long, env = "HTTP_ADDRESS")]
    http_address: String,
    #[clap(long = "db", env = "DATABASE_URL")]
    database_url: String,
    #[clap(long, env, default_value = "info")]
    log_level: LogLevel,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid HTTP_ADDRESS {0:?}: expected host:port")]
pub struct InvalidHttpAddress(String);

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) address: String,
    pub(crate) port: u16,
    pub(crate) database_url: String,
    pub log_level: LogLevel,
}

impl Env {
    pub fn into_config(self) -> Result<Config, InvalidHttpAddress> {
        let (host, port) = self
            .http_address
            .rsplit_once(':')
            .ok_or_else(|| InvalidHttpAddress(self.http_address.clone()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| InvalidHttpAddress(self.http_address.clone()))?;
        let address = if host.is_empty() {
            "0.0.0.0".to_string()
        } else {
            host.to_string()
        };

        Ok(Config {
            address,
            port,
            database_url: self.database_url,
            log_level: self.log_level,
        })
    }
}

impl Config {
    pub async fn get_sqlite_pool(&self) -> Result<SqlitePool, sqlx::Error> {
        configure_sqlite_pool(&self.database_url).await
    }
}

/// Builds the SQLite pool the service runs on. WAL allows concurrent readers
/// with a single writer; the busy timeout keeps writers queueing instead of
/// failing when they contend for that slot. Foreign keys back the schema's
/// ownership constraints.
pub(crate) async fn configure_sqlite_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10))
        .foreign_keys(true);

    SqlitePoolOptions::new().connect_with(options).await
}

pub fn setup_tracing(log_level: &LogLevel) {
    let level: Level = log_level.into();
    let default_filter = format!("tally={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}
