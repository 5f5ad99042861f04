use std::sync::Arc;

use rowbridge_core::catalog::Catalog;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: rowbridge_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Importable entity schemas, validated at startup.
    pub catalog: Arc<Catalog>,
}
