//! Product tag model.

use rowbridge_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `product_tags` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProductTag {
    pub id: DbId,
    pub name: String,
    pub created_at: Timestamp,
}
