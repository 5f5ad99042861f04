pub mod catalog;
pub mod health;
pub mod import;
pub mod products;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /import/{entity_type}                            upload a spreadsheet (POST)
/// /import/runs                                     list import runs
/// /import/runs/{id}                                get one import run
///
/// /products                                        list products
/// /products/{id}/tags                              tags of one product
///
/// /categories                                      list categories
/// /tags                                            list tags
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/import", import::router())
        .nest("/products", products::router())
        .merge(catalog::router())
}
