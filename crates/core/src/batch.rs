//! Batch coordination: drives every row through normalize, resolve and
//! build inside one transaction scope, isolating row failures.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::builder;
use crate::error::{BatchAborted, ImportError};
use crate::normalize::{normalize, RawRow};
use crate::resolve::ValueResolver;
use crate::schema::SchemaDescriptor;
use crate::store::{ImportTarget, TransactionScope};
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// How far a failed row's effects are undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowIsolation {
    /// One batch-wide transaction and no per-row rollback. Related
    /// entities created by a row that later fails are kept.
    #[default]
    Shared,
    /// Each row runs inside a savepoint that is rolled back on failure.
    Savepoint,
}

impl RowIsolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Savepoint => "savepoint",
        }
    }

    /// Parse an isolation name. Returns `None` for unknown values.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "shared" => Some(Self::Shared),
            "savepoint" => Some(Self::Savepoint),
            _ => None,
        }
    }

    pub const ALL: &'static [&'static str] = &["shared", "savepoint"];
}

impl std::fmt::Display for RowIsolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to the transaction after the last row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    #[default]
    Commit,
    /// Run every row, then roll back. Produces a preview report.
    DryRun,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub row_isolation: RowIsolation,
    pub commit_mode: CommitMode,
    /// Checked between rows; cancelling rolls the batch back.
    pub cancel: Option<CancellationToken>,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Success,
    Failed,
}

/// Result of one input row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowOutcome {
    /// 1-based position of the row among the data rows.
    pub row_index: usize,
    pub status: RowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<DbId>,
}

impl RowOutcome {
    pub fn succeeded(row_index: usize, entity_id: DbId) -> Self {
        Self {
            row_index,
            status: RowStatus::Success,
            error_message: None,
            entity_id: Some(entity_id),
        }
    }

    pub fn failed(row_index: usize, error_message: impl Into<String>) -> Self {
        Self {
            row_index,
            status: RowStatus::Failed,
            error_message: Some(error_message.into()),
            entity_id: None,
        }
    }
}

/// Aggregate result of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every row succeeded (also used for an empty batch).
    Completed,
    /// Some rows succeeded, some failed.
    Partial,
    /// Every row failed.
    Failed,
    /// The batch was aborted and nothing was committed.
    RolledBack,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    /// Parse a status string. Returns `None` for unknown values.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }

    pub const ALL: &'static [&'static str] = &["completed", "partial", "failed", "rolled_back"];
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub entity_type: String,
    pub total_rows: usize,
    pub succeeded: usize,
    /// Failed rows in input order.
    pub failed: Vec<RowOutcome>,
    /// Identities created by succeeded rows, in input order.
    pub created: Vec<DbId>,
    pub status: BatchStatus,
    /// Whether the batch transaction was committed.
    pub committed: bool,
    /// Committed with no failed rows. The single success indicator for the
    /// whole operation.
    pub success: bool,
}

impl BatchReport {
    pub fn new(entity_type: impl Into<String>, total_rows: usize) -> Self {
        Self {
            entity_type: entity_type.into(),
            total_rows,
            succeeded: 0,
            failed: Vec::new(),
            created: Vec::new(),
            status: BatchStatus::Completed,
            committed: false,
            success: false,
        }
    }

    pub fn record(&mut self, outcome: RowOutcome) {
        match outcome.status {
            RowStatus::Success => {
                self.succeeded += 1;
                self.created.extend(outcome.entity_id);
            }
            RowStatus::Failed => self.failed.push(outcome),
        }
    }

    /// Rows that produced an outcome so far.
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed.len()
    }

    fn finish(&mut self, committed: bool) {
        self.committed = committed;
        self.status = match (self.succeeded, self.failed.len()) {
            (_, 0) => BatchStatus::Completed,
            (0, _) => BatchStatus::Failed,
            _ => BatchStatus::Partial,
        };
        self.success = committed && self.status == BatchStatus::Completed;
    }

    fn mark_rolled_back(&mut self) {
        self.committed = false;
        self.success = false;
        self.status = BatchStatus::RolledBack;
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Position of the coordinator in its row loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Processing(usize),
    RowSucceeded(usize),
    RowFailed(usize),
    Completed,
    RolledBack,
}

/// Imports a batch of rows into one entity type.
///
/// Rows are processed strictly in input order so that get-or-create sees
/// the writes of earlier rows.
pub struct BatchCoordinator<'a, T: ImportTarget> {
    target: &'a T,
    schema: &'a SchemaDescriptor,
    options: ImportOptions,
    state: BatchState,
}

impl<'a, T: ImportTarget> BatchCoordinator<'a, T> {
    pub fn new(target: &'a T, schema: &'a SchemaDescriptor, options: ImportOptions) -> Self {
        Self {
            target,
            schema,
            options,
            state: BatchState::Idle,
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Run the whole batch.
    ///
    /// Row-level failures are recorded in the report and the batch goes on.
    /// A fatal store error, a failed commit or cancellation rolls the
    /// transaction back and returns [`BatchAborted`] with the outcomes
    /// recorded so far.
    pub async fn run(&mut self, rows: Vec<RawRow>) -> Result<BatchReport, BatchAborted> {
        let schema = self.schema;
        let entity_type = schema.entity_type();
        let mut report = BatchReport::new(entity_type, rows.len());
        tracing::info!(
            entity_type,
            total_rows = rows.len(),
            isolation = %self.options.row_isolation,
            commit_mode = ?self.options.commit_mode,
            "Import batch started"
        );

        let mut scope = match self.target.begin().await {
            Ok(scope) => scope,
            Err(e) => {
                report.mark_rolled_back();
                self.transition(BatchState::RolledBack);
                tracing::error!(entity_type, error = %e, "Could not open import transaction");
                return Err(BatchAborted {
                    row: None,
                    source: ImportError::FatalStore(e),
                    report,
                });
            }
        };

        let savepoints = self.options.row_isolation == RowIsolation::Savepoint;
        let mut resolver = ValueResolver::new();

        for (position, raw) in rows.into_iter().enumerate() {
            let row_index = position + 1;
            if self
                .options
                .cancel
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
            {
                return Err(self
                    .abort(scope, report, Some(row_index), ImportError::Cancelled)
                    .await);
            }
            self.transition(BatchState::Processing(row_index));

            if savepoints {
                if let Err(e) = scope.savepoint().await {
                    return Err(self
                        .abort(scope, report, Some(row_index), ImportError::FatalStore(e))
                        .await);
                }
            }

            match self.process_row(&mut scope, &mut resolver, raw).await {
                Ok(id) => {
                    if savepoints {
                        if let Err(e) = scope.release_savepoint().await {
                            return Err(self
                                .abort(scope, report, Some(row_index), ImportError::FatalStore(e))
                                .await);
                        }
                    }
                    resolver.cache_mut().settle();
                    report.record(RowOutcome::succeeded(row_index, id));
                    self.transition(BatchState::RowSucceeded(row_index));
                }
                Err(err) if err.is_row_scoped() => {
                    tracing::warn!(entity_type, row = row_index, error = %err, "Import row failed");
                    if savepoints {
                        if let Err(e) = scope.rollback_to_savepoint().await {
                            return Err(self
                                .abort(scope, report, Some(row_index), ImportError::FatalStore(e))
                                .await);
                        }
                        resolver.cache_mut().discard();
                    } else {
                        // Shared scope: whatever the row created stays.
                        resolver.cache_mut().settle();
                    }
                    report.record(RowOutcome::failed(row_index, err.to_string()));
                    self.transition(BatchState::RowFailed(row_index));
                }
                Err(err) => {
                    return Err(self.abort(scope, report, Some(row_index), err).await);
                }
            }
        }

        let committed = match self.options.commit_mode {
            CommitMode::Commit => {
                if let Err(e) = scope.commit().await {
                    report.mark_rolled_back();
                    self.transition(BatchState::RolledBack);
                    tracing::error!(entity_type, error = %e, "Import commit failed");
                    return Err(BatchAborted {
                        row: None,
                        source: ImportError::FatalStore(e),
                        report,
                    });
                }
                true
            }
            CommitMode::DryRun => {
                if let Err(e) = scope.rollback().await {
                    tracing::warn!(entity_type, error = %e, "Dry-run rollback failed");
                }
                false
            }
        };

        report.finish(committed);
        self.transition(BatchState::Completed);
        tracing::info!(
            entity_type,
            total_rows = report.total_rows,
            succeeded = report.succeeded,
            failed = report.failed.len(),
            status = %report.status,
            committed,
            "Import batch finished"
        );
        Ok(report)
    }

    async fn process_row(
        &self,
        scope: &mut T::Scope,
        resolver: &mut ValueResolver,
        raw: RawRow,
    ) -> Result<DbId, ImportError> {
        let normalized = normalize(raw, self.schema);
        let draft = resolver.resolve_row(scope, self.schema, &normalized).await?;
        builder::build(scope, self.schema, &draft).await
    }

    async fn abort(
        &mut self,
        scope: T::Scope,
        mut report: BatchReport,
        row: Option<usize>,
        source: ImportError,
    ) -> BatchAborted {
        let schema = self.schema;
        let entity_type = schema.entity_type();
        tracing::error!(
            entity_type,
            row,
            processed = report.processed(),
            error = %source,
            "Import batch aborted, rolling back"
        );
        if let Err(e) = scope.rollback().await {
            tracing::warn!(entity_type, error = %e, "Rollback after abort failed");
        }
        report.mark_rolled_back();
        self.transition(BatchState::RolledBack);
        BatchAborted {
            row,
            source,
            report,
        }
    }

    fn transition(&mut self, next: BatchState) {
        tracing::debug!(from = ?self.state, to = ?next, "Batch state transition");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_round_trip() {
        for s in RowIsolation::ALL {
            assert_eq!(RowIsolation::from_str(s).unwrap().as_str(), *s);
        }
        assert!(RowIsolation::from_str("per_row").is_none());
        assert_eq!(RowIsolation::default(), RowIsolation::Shared);
    }

    #[test]
    fn status_round_trip() {
        for s in BatchStatus::ALL {
            assert_eq!(BatchStatus::from_str(s).unwrap().as_str(), *s);
        }
        assert_eq!(format!("{}", BatchStatus::RolledBack), "rolled_back");
    }

    #[test]
    fn report_status_follows_outcomes() {
        let mut report = BatchReport::new("products", 2);
        report.record(RowOutcome::succeeded(1, 10));
        report.record(RowOutcome::failed(2, "bad price"));
        report.finish(true);
        assert_eq!(report.status, BatchStatus::Partial);
        assert_eq!(report.created, [10]);
        assert_eq!(report.processed(), 2);
        assert!(!report.is_success());

        let mut all_failed = BatchReport::new("products", 1);
        all_failed.record(RowOutcome::failed(1, "x"));
        all_failed.finish(true);
        assert_eq!(all_failed.status, BatchStatus::Failed);

        let mut empty = BatchReport::new("products", 0);
        empty.finish(true);
        assert!(empty.is_success());

        let mut previewed = BatchReport::new("products", 0);
        previewed.finish(false);
        assert!(!previewed.is_success());
    }

    #[test]
    fn report_serializes_the_success_indicator() {
        let mut report = BatchReport::new("products", 1);
        report.record(RowOutcome::succeeded(1, 7));
        report.finish(true);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["status"], "completed");

        report.mark_rolled_back();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], false);
    }

    #[test]
    fn outcome_serializes_without_empty_fields() {
        let json = serde_json::to_value(RowOutcome::failed(3, "boom")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "row_index": 3, "status": "failed", "error_message": "boom" })
        );
    }
}
