//! Repository for the `products` table.

use sqlx::PgPool;

use crate::models::product::{ProductListParams, ProductListing};
use crate::repositories::page;

/// Select list for listings; expects `products p` and `categories c`.
const LISTING_SELECT: &str = "\
    SELECT p.id, p.name, p.price::text AS price, p.description, p.category_id, \
           c.name::text AS category, \
           COALESCE( \
               ARRAY_AGG(t.name::text ORDER BY t.name) FILTER (WHERE t.id IS NOT NULL), \
               '{}'::text[] \
           ) AS tags, \
           p.created_at \
    FROM products p \
    JOIN categories c ON c.id = p.category_id \
    LEFT JOIN products_tags pt ON pt.owner_id = p.id \
    LEFT JOIN product_tags t ON t.id = pt.related_id";

/// Read access to products. Products are created by imports.
pub struct ProductRepo;

impl ProductRepo {
    /// List products with category and tag names, oldest first.
    pub async fn list(
        pool: &PgPool,
        params: &ProductListParams,
    ) -> Result<Vec<ProductListing>, sqlx::Error> {
        let (limit, offset) = page(params.limit, params.offset);
        let query = format!(
            "{LISTING_SELECT} \
             WHERE ($1::text IS NULL OR c.name = $1) \
             GROUP BY p.id, c.name \
             ORDER BY p.id \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, ProductListing>(&query)
            .bind(params.category.as_deref())
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }
}
