//! Repository for the `product_tags` table.

use rowbridge_core::types::DbId;
use sqlx::PgPool;

use crate::models::product_tag::ProductTag;

const COLUMNS: &str = "id, name, created_at";

pub struct ProductTagRepo;

impl ProductTagRepo {
    /// List all tags ordered by name.
    pub async fn list(pool: &PgPool) -> Result<Vec<ProductTag>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM product_tags ORDER BY name");
        sqlx::query_as::<_, ProductTag>(&query).fetch_all(pool).await
    }

    /// Tags linked to a product, ordered by name.
    pub async fn list_for_product(
        pool: &PgPool,
        product_id: DbId,
    ) -> Result<Vec<ProductTag>, sqlx::Error> {
        sqlx::query_as::<_, ProductTag>(
            "SELECT t.id, t.name, t.created_at \
             FROM product_tags t \
             JOIN products_tags pt ON pt.related_id = t.id \
             WHERE pt.owner_id = $1 \
             ORDER BY t.name",
        )
        .bind(product_id)
        .fetch_all(pool)
        .await
    }
}
