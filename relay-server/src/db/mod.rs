//! Database access: the durable message log and startup health checks.

pub mod message_log;

pub use message_log::{MessageStore, PgMessageLog, StoreError};

/// Simple liveness check used during startup and by the readiness probe.
///
/// # Errors
/// Returns the underlying driver error when the database is unreachable.
pub async fn ensure_liveness(pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}
