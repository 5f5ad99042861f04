//! Route definitions for spreadsheet imports, mounted at `/import`.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::import;
use crate::state::AppState;

/// ```text
/// POST   /{entity_type}     -> import_file
/// GET    /runs              -> list_runs
/// GET    /runs/{id}         -> get_run
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/runs", get(import::list_runs))
        .route("/runs/{id}", get(import::get_run))
        .route("/{entity_type}", post(import::import_file))
}
