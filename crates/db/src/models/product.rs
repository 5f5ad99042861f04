//! Product models.

use rowbridge_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A product joined with its category name and tag names.
///
/// `price` is read as its canonical text (`numeric::text`) so no decimal
/// crate is needed on the read path.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProductListing {
    pub id: DbId,
    pub name: String,
    pub price: String,
    pub description: String,
    pub category_id: DbId,
    pub category: String,
    /// Tag names, sorted.
    pub tags: Vec<String>,
    pub created_at: Timestamp,
}

/// Pagination for product listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Only products in the category with this name.
    pub category: Option<String>,
}
