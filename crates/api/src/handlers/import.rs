//! Handlers for spreadsheet imports and the import run log.
//!
//! An upload is decoded into rows, imported in one batch through the
//! Postgres store, and recorded as an import run. The run is written with
//! the pool, outside the batch transaction, so rolled-back and dry-run
//! imports are recorded as well.
//!
//! The batch runs in its own task. If the request is dropped (timeout or
//! client disconnect) the task is cancelled, rolls back, and still records
//! its run.

use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use rowbridge_core::batch::{BatchCoordinator, BatchReport, CommitMode, ImportOptions, RowIsolation};
use rowbridge_core::error::BatchAborted;
use rowbridge_core::normalize::RawRow;
use rowbridge_core::schema::SchemaDescriptor;
use rowbridge_core::types::DbId;
use rowbridge_db::models::import_run::{
    CreateImportRun, FinishImportRun, ImportRun, ImportRunListParams,
};
use rowbridge_db::repositories::ImportRunRepo;
use rowbridge_db::PgImportTarget;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::sheet::{self, SheetFormat};
use crate::state::AppState;

/// Multipart field carrying the spreadsheet.
pub const FILE_FIELD: &str = "file";

/// Response body of a finished import.
#[derive(Debug, Serialize)]
pub struct ImportResult {
    pub run_id: DbId,
    pub report: BatchReport,
}

// ── Import ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ImportParams {
    /// Run every row, then roll back.
    #[serde(default)]
    pub dry_run: bool,
    /// `shared` or `savepoint`; defaults to the server configuration.
    pub isolation: Option<String>,
}

/// POST /api/v1/import/{entity_type}
///
/// Accept a multipart upload with a `file` field and import its rows.
/// Row failures are reported in the body; a rolled-back batch answers 409.
pub async fn import_file(
    State(state): State<AppState>,
    Path(entity_type): Path<String>,
    Query(params): Query<ImportParams>,
    mut multipart: Multipart,
) -> AppResult<Json<DataResponse<ImportResult>>> {
    let schema = state
        .catalog
        .schema_for(&entity_type)
        .ok_or_else(|| AppError::NotFound(format!("Unknown entity type '{entity_type}'")))?;

    let row_isolation = match params.isolation.as_deref() {
        Some(raw) => RowIsolation::from_str(raw).ok_or_else(|| {
            AppError::BadRequest(format!(
                "Unknown isolation '{raw}', expected one of {:?}",
                RowIsolation::ALL
            ))
        })?,
        None => state.config.row_isolation,
    };
    let commit_mode = if params.dry_run {
        CommitMode::DryRun
    } else {
        CommitMode::Commit
    };

    let (file_name, bytes) = read_file_field(&mut multipart).await?;
    let format = SheetFormat::from_file_name(&file_name)?;
    let rows = tokio::task::spawn_blocking(move || sheet::decode(bytes, format))
        .await
        .map_err(|e| AppError::InternalError(format!("Decoder task failed: {e}")))??;
    tracing::info!(
        entity_type = %entity_type,
        file_name = %file_name,
        rows = rows.len(),
        "Decoded upload"
    );

    let run = ImportRunRepo::create(
        &state.pool,
        &CreateImportRun {
            entity_type: entity_type.clone(),
            file_name: Some(file_name),
            row_isolation: row_isolation.as_str().to_string(),
            dry_run: params.dry_run,
        },
    )
    .await?;

    // Cancelled when this request future is dropped before the task ends.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let options = ImportOptions {
        row_isolation,
        commit_mode,
        cancel: Some(cancel),
    };
    let task = tokio::spawn(run_import(
        state.clone(),
        schema.clone(),
        run.id,
        rows,
        options,
    ));
    let outcome = task
        .await
        .map_err(|e| AppError::InternalError(format!("Import task failed: {e}")))?;
    let _ = guard.disarm();

    match outcome {
        Ok(report) => Ok(Json(DataResponse {
            data: ImportResult {
                run_id: run.id,
                report,
            },
        })),
        Err(aborted) => Err(AppError::ImportAborted {
            run_id: Some(run.id),
            source: Box::new(aborted),
        }),
    }
}

/// Import `rows` through the Postgres store and record the outcome on run
/// `run_id`, whether the batch finished or was rolled back.
pub async fn run_import(
    state: AppState,
    schema: SchemaDescriptor,
    run_id: DbId,
    rows: Vec<RawRow>,
    options: ImportOptions,
) -> Result<BatchReport, BatchAborted> {
    let target = PgImportTarget::new(state.pool.clone());
    let outcome = BatchCoordinator::new(&target, &schema, options)
        .run(rows)
        .await;

    let finish = match &outcome {
        Ok(report) => FinishImportRun::from_report(report, None),
        Err(aborted) => FinishImportRun::from_report(&aborted.report, Some(aborted.to_string())),
    };
    record_run(&state, run_id, finish).await;
    outcome
}

/// Pull the `file` field out of a multipart body.
async fn read_file_field(multipart: &mut Multipart) -> AppResult<(String, Vec<u8>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        return Ok((file_name, data.to_vec()));
    }
    Err(AppError::BadRequest(format!(
        "Missing multipart field '{FILE_FIELD}'"
    )))
}

/// Store a run's outcome. A failure here must not mask the import result.
async fn record_run(state: &AppState, run_id: DbId, finish: FinishImportRun) {
    if let Err(e) = ImportRunRepo::finish(&state.pool, run_id, &finish).await {
        tracing::error!(run_id, error = %e, "Failed to record import run outcome");
    }
}

// ── Runs ─────────────────────────────────────────────────────────────

/// GET /api/v1/import/runs
pub async fn list_runs(
    State(state): State<AppState>,
    Query(params): Query<ImportRunListParams>,
) -> AppResult<Json<DataResponse<Vec<ImportRun>>>> {
    let runs = ImportRunRepo::list(&state.pool, &params).await?;
    Ok(Json(DataResponse { data: runs }))
}

/// GET /api/v1/import/runs/{id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<ImportRun>>> {
    let run = ImportRunRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Import run with id {id} not found")))?;
    Ok(Json(DataResponse { data: run }))
}
