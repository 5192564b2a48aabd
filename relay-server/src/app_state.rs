//! Application state shared across all routes.

use std::sync::Arc;

use crate::relay::RelayController;

/// State handed to every handler. `pool` and `relay` are `None` only in
/// tests; startup fails before serving if the database is unavailable.
#[derive(Clone, Default)]
pub struct AppState {
    /// Database connection pool, used by the readiness probe.
    pub pool: Option<sqlx::PgPool>,
    /// The relay orchestrator behind the WebSocket endpoint.
    pub relay: Option<Arc<RelayController>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("has_pool", &self.pool.is_some())
            .field("has_relay", &self.relay.is_some())
            .finish()
    }
}
