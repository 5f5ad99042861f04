//! Repository for the `import_runs` table.

use rowbridge_core::types::DbId;
use sqlx::PgPool;

use crate::models::import_run::{
    CreateImportRun, FinishImportRun, ImportRun, ImportRunListParams, STATUS_RUNNING,
};
use crate::repositories::page;

/// Column list for `import_runs` queries.
const COLUMNS: &str = "id, entity_type, file_name, status, row_isolation, dry_run, \
    total_rows, succeeded, failed, committed, report, error, created_at, completed_at";

/// Provides the run log for imports.
pub struct ImportRunRepo;

impl ImportRunRepo {
    /// Record the start of an import. The run begins in `running` status.
    pub async fn create(pool: &PgPool, input: &CreateImportRun) -> Result<ImportRun, sqlx::Error> {
        let query = format!(
            "INSERT INTO import_runs (entity_type, file_name, status, row_isolation, dry_run) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ImportRun>(&query)
            .bind(&input.entity_type)
            .bind(input.file_name.as_deref())
            .bind(STATUS_RUNNING)
            .bind(&input.row_isolation)
            .bind(input.dry_run)
            .fetch_one(pool)
            .await
    }

    /// Store the final status, counts and report of a run.
    ///
    /// Returns `None` if no run with the given ID exists.
    pub async fn finish(
        pool: &PgPool,
        id: DbId,
        input: &FinishImportRun,
    ) -> Result<Option<ImportRun>, sqlx::Error> {
        let query = format!(
            "UPDATE import_runs SET \
                 status = $2, \
                 total_rows = $3, \
                 succeeded = $4, \
                 failed = $5, \
                 committed = $6, \
                 report = $7, \
                 error = $8, \
                 completed_at = now() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ImportRun>(&query)
            .bind(id)
            .bind(&input.status)
            .bind(input.total_rows)
            .bind(input.succeeded)
            .bind(input.failed)
            .bind(input.committed)
            .bind(&input.report)
            .bind(input.error.as_deref())
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ImportRun>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM import_runs WHERE id = $1");
        sqlx::query_as::<_, ImportRun>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List runs, newest first, optionally for one entity type.
    pub async fn list(
        pool: &PgPool,
        params: &ImportRunListParams,
    ) -> Result<Vec<ImportRun>, sqlx::Error> {
        let (limit, offset) = page(params.limit, params.offset);
        let query = format!(
            "SELECT {COLUMNS} FROM import_runs \
             WHERE ($1::text IS NULL OR entity_type = $1) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, ImportRun>(&query)
            .bind(params.entity_type.as_deref())
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }
}
