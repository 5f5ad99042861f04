//! Import run model.
//!
//! An import run records one upload: its options, final counts and the
//! serialized batch report. Runs are written outside the batch transaction
//! so rolled-back imports are recorded too.

use rowbridge_core::batch::BatchReport;
use rowbridge_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Status of a run that has not finished yet. Finished runs carry a
/// `BatchStatus` string.
pub const STATUS_RUNNING: &str = "running";

/// A row from the `import_runs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ImportRun {
    pub id: DbId,
    pub entity_type: String,
    pub file_name: Option<String>,
    pub status: String,
    pub row_isolation: String,
    pub dry_run: bool,
    pub total_rows: i32,
    pub succeeded: i32,
    pub failed: i32,
    pub committed: bool,
    pub report: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

/// DTO for starting a run.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateImportRun {
    pub entity_type: String,
    pub file_name: Option<String>,
    pub row_isolation: String,
    pub dry_run: bool,
}

/// DTO for finishing a run.
#[derive(Debug, Clone)]
pub struct FinishImportRun {
    pub status: String,
    pub total_rows: i32,
    pub succeeded: i32,
    pub failed: i32,
    pub committed: bool,
    pub report: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl FinishImportRun {
    /// Summarize a batch report. `error` is set for aborted batches.
    pub fn from_report(report: &BatchReport, error: Option<String>) -> Self {
        Self {
            status: report.status.as_str().to_string(),
            total_rows: saturating_i32(report.total_rows),
            succeeded: saturating_i32(report.succeeded),
            failed: saturating_i32(report.failed.len()),
            committed: report.committed,
            report: serde_json::to_value(report).ok(),
            error,
        }
    }
}

fn saturating_i32(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Pagination for run listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportRunListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub entity_type: Option<String>,
}
