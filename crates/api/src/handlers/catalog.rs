//! Handlers for the related entities imports create: categories and tags.

use axum::extract::State;
use axum::Json;
use rowbridge_db::models::category::Category;
use rowbridge_db::models::product_tag::ProductTag;
use rowbridge_db::repositories::{CategoryRepo, ProductTagRepo};

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/categories
pub async fn list_categories(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<Vec<Category>>>> {
    let categories = CategoryRepo::list(&state.pool).await?;
    Ok(Json(DataResponse { data: categories }))
}

/// GET /api/v1/tags
pub async fn list_tags(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<Vec<ProductTag>>>> {
    let tags = ProductTagRepo::list(&state.pool).await?;
    Ok(Json(DataResponse { data: tags }))
}
