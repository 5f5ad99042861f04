//! Handlers for reading imported products.

use axum::extract::{Path, Query, State};
use axum::Json;
use rowbridge_core::types::DbId;
use rowbridge_db::models::product::{ProductListParams, ProductListing};
use rowbridge_db::models::product_tag::ProductTag;
use rowbridge_db::repositories::{CategoryRepo, ProductRepo, ProductTagRepo};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/products
///
/// Products with their category name and tag names, oldest first.
/// Filtering by a category that does not exist answers 404.
pub async fn list_products(
    State(state): State<AppState>,
    Query(params): Query<ProductListParams>,
) -> AppResult<Json<DataResponse<Vec<ProductListing>>>> {
    if let Some(name) = params.category.as_deref() {
        CategoryRepo::find_by_name(&state.pool, name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Category '{name}' not found")))?;
    }
    let products = ProductRepo::list(&state.pool, &params).await?;
    Ok(Json(DataResponse { data: products }))
}

/// GET /api/v1/products/{id}/tags
pub async fn list_product_tags(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Vec<ProductTag>>>> {
    let tags = ProductTagRepo::list_for_product(&state.pool, id).await?;
    Ok(Json(DataResponse { data: tags }))
}
