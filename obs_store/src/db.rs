//! Connection and migration plumbing: a `diesel-async` `SyncConnectionWrapper`
//! over a plain synchronous `diesel::SqliteConnection`, with migrations
//! embedded into the binary so a deployment never needs the `migrations/`
//! directory on disk.

use diesel::sqlite::SqliteConnection;
use diesel::{Connection, ConnectionError};
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub type DbConnection = SyncConnectionWrapper<SqliteConnection>;

/// SQLite disables foreign-key enforcement per connection unless told
/// otherwise; without this, `metadata`'s cascade delete silently no-ops.
pub async fn establish_connection(database_url: &str) -> Result<DbConnection, ConnectionError> {
    let mut conn = SyncConnectionWrapper::<SqliteConnection>::establish(database_url).await?;
    let _ = diesel::sql_query("PRAGMA foreign_keys = ON")
        .execute(&mut conn)
        .await;
    Ok(conn)
}

#[derive(Debug)]
pub enum MigrationError {
    Connection(ConnectionError),
    Run(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl std::fmt::Display for MigrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationError::Connection(e) => write!(f, "connection error: {}", e),
            MigrationError::Run(e) => write!(f, "migration error: {}", e),
        }
    }
}

impl std::error::Error for MigrationError {}

impl From<ConnectionError> for MigrationError {
    fn from(value: ConnectionError) -> Self {
        MigrationError::Connection(value)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync + 'static>> for MigrationError {
    fn from(value: Box<dyn std::error::Error + Send + Sync + 'static>) -> Self {
        MigrationError::Run(value)
    }
}

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

pub fn run_migrations(database_url: &str) -> Result<(), MigrationError> {
    let mut conn = SqliteConnection::establish(database_url)?;
    conn.run_pending_migrations(MIGRATIONS)?;
    Ok(())
}

pub(crate) fn diesel_err(e: diesel::result::Error) -> obs_core::error::DeviceError {
    match e {
        diesel::result::Error::NotFound => obs_core::error::DeviceError::NotFound("row".into()),
        other => obs_core::error::DeviceError::BadDatabase(other.to_string()),
    }
}
