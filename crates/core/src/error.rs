use crate::batch::BatchReport;

/// A schema descriptor that cannot be used for imports.
///
/// Raised when a descriptor is constructed, never while rows are processed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Schema configuration error in {entity_type}.{field}: {reason}")]
pub struct SchemaConfigurationError {
    pub entity_type: String,
    pub field: String,
    pub reason: String,
}

/// Errors reported by an entity store.
///
/// Only [`StoreError::Fatal`] means the transaction scope itself is no
/// longer usable; every other variant is scoped to the operation that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Missing required field '{0}'")]
    MissingField(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Unknown entity type '{0}'")]
    UnknownEntityType(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transaction unusable: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Errors raised while importing a single row.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error(transparent)]
    SchemaConfiguration(#[from] SchemaConfigurationError),

    /// A relation value could not be get-or-created.
    #[error("Could not resolve '{field}': {source}")]
    RowResolution {
        field: String,
        #[source]
        source: StoreError,
    },

    /// Entity creation or relation linking failed.
    #[error("Could not {action}: {source}")]
    RowPersistence {
        action: String,
        #[source]
        source: StoreError,
    },

    /// The transaction scope became unusable; the batch cannot continue.
    #[error("Fatal store error: {0}")]
    FatalStore(#[source] StoreError),

    #[error("Import cancelled")]
    Cancelled,
}

impl ImportError {
    /// Wrap a get-or-create failure, escalating fatal store errors.
    pub fn resolution(field: &str, err: StoreError) -> Self {
        if err.is_fatal() {
            Self::FatalStore(err)
        } else {
            Self::RowResolution {
                field: field.to_string(),
                source: err,
            }
        }
    }

    /// Wrap a create/link failure, escalating fatal store errors.
    pub fn persistence(action: impl Into<String>, err: StoreError) -> Self {
        if err.is_fatal() {
            Self::FatalStore(err)
        } else {
            Self::RowPersistence {
                action: action.into(),
                source: err,
            }
        }
    }

    /// Whether the error only affects the row that raised it.
    pub fn is_row_scoped(&self) -> bool {
        matches!(self, Self::RowResolution { .. } | Self::RowPersistence { .. })
    }
}

/// A batch that was rolled back as a whole.
///
/// `report` holds the row outcomes recorded before the abort; none of
/// them are durable.
#[derive(Debug, thiserror::Error)]
#[error("Import rolled back: {source}")]
pub struct BatchAborted {
    /// 1-based row being processed when the batch aborted, if any.
    pub row: Option<usize>,
    #[source]
    pub source: ImportError,
    pub report: BatchReport,
}
