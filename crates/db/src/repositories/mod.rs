//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods
//! that accept `&PgPool` as the first argument.

pub mod category_repo;
pub mod import_run_repo;
pub mod product_repo;
pub mod product_tag_repo;

pub use category_repo::CategoryRepo;
pub use import_run_repo::ImportRunRepo;
pub use product_repo::ProductRepo;
pub use product_tag_repo::ProductTagRepo;

/// Default page size for list queries.
pub const DEFAULT_LIMIT: i64 = 100;

/// Maximum page size for list queries.
pub const MAX_LIMIT: i64 = 500;

/// Clamp optional pagination parameters to `(limit, offset)`.
pub(crate) fn page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (
        limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        offset.unwrap_or(0).max(0),
    )
}
