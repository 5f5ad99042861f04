//! Persistence contracts of the import engine.
//!
//! The engine talks to storage only through these traits. A batch opens
//! one [`TransactionScope`] from an [`ImportTarget`] and performs every
//! store call inside it.

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::error::StoreError;
use crate::schema::{FieldDescriptor, FieldKind, RelationTarget, SchemaDescriptor};
use crate::types::DbId;
use crate::value::{coerce, CellValue, TypedValue};

/// Scalar cells of a record, keyed by field name.
pub type FieldValues = IndexMap<String, CellValue>;

/// Single-relation identities of a record, keyed by field name.
pub type RelationIds = IndexMap<String, DbId>;

/// Record-level operations available inside a transaction scope.
#[async_trait]
pub trait EntityStore: Send {
    /// Insert a new entity from its scalar fields and single-relation
    /// identities. Multi-relations are never part of `create`.
    async fn create(
        &mut self,
        schema: &SchemaDescriptor,
        scalars: &FieldValues,
        relations: &RelationIds,
    ) -> Result<DbId, StoreError>;

    /// Return the entity of `target.entity_type` whose natural key equals
    /// `key`, creating it first if absent. Repeated calls with the same key
    /// in one scope return the same identity.
    async fn get_or_create_by_key(
        &mut self,
        target: &RelationTarget,
        key: &str,
    ) -> Result<DbId, StoreError>;

    /// Replace the owner's link set for a multi-relation field.
    async fn link(
        &mut self,
        owner_type: &str,
        owner_id: DbId,
        relation_field: &str,
        related: &[DbId],
    ) -> Result<(), StoreError>;
}

/// An open transaction.
///
/// Savepoints do not nest: the coordinator opens at most one at a time.
#[async_trait]
pub trait TransactionScope: EntityStore {
    async fn savepoint(&mut self) -> Result<(), StoreError>;

    async fn release_savepoint(&mut self) -> Result<(), StoreError>;

    /// Undo everything since the open savepoint and close it.
    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Something a batch can be imported into.
#[async_trait]
pub trait ImportTarget: Send + Sync {
    type Scope: TransactionScope;

    async fn begin(&self) -> Result<Self::Scope, StoreError>;
}

/// A column value ready to be written by `create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnValue {
    Scalar(TypedValue),
    Relation(DbId),
}

/// One column of a prepared record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedColumn<'a> {
    pub field: &'a FieldDescriptor,
    pub value: ColumnValue,
}

/// Coerce and check a record against its schema.
///
/// Shared by store implementations so every store enforces the same
/// constraints: scalar types, required fields, and that values only target
/// fields of the right kind. Blank optional values are left out so the
/// storage default applies. Columns come back in schema order.
pub fn prepare_record<'a>(
    schema: &'a SchemaDescriptor,
    scalars: &FieldValues,
    relations: &RelationIds,
) -> Result<Vec<PreparedColumn<'a>>, StoreError> {
    for name in scalars.keys() {
        match schema.field(name).map(|f| &f.kind) {
            Some(FieldKind::Scalar(_)) => {}
            _ => {
                return Err(StoreError::InvalidValue {
                    field: name.clone(),
                    reason: format!("not a scalar field of {}", schema.entity_type()),
                })
            }
        }
    }
    for name in relations.keys() {
        match schema.field(name).map(|f| &f.kind) {
            Some(FieldKind::SingleRelation(_)) => {}
            _ => {
                return Err(StoreError::InvalidValue {
                    field: name.clone(),
                    reason: format!("not a single relation of {}", schema.entity_type()),
                })
            }
        }
    }

    let mut columns = Vec::with_capacity(scalars.len() + relations.len());
    for field in schema.fields() {
        match &field.kind {
            FieldKind::Scalar(ty) => {
                let typed = match scalars.get(&field.name) {
                    Some(cell) => coerce(ty, cell).map_err(|reason| StoreError::InvalidValue {
                        field: field.name.clone(),
                        reason,
                    })?,
                    None => TypedValue::Null,
                };
                let blank = match &typed {
                    TypedValue::Null => true,
                    TypedValue::Text(s) => s.is_empty(),
                    _ => false,
                };
                if blank && field.required {
                    return Err(StoreError::MissingField(field.name.clone()));
                }
                if !typed.is_null() {
                    columns.push(PreparedColumn {
                        field,
                        value: ColumnValue::Scalar(typed),
                    });
                }
            }
            FieldKind::SingleRelation(_) => match relations.get(&field.name) {
                Some(id) => columns.push(PreparedColumn {
                    field,
                    value: ColumnValue::Relation(*id),
                }),
                None if field.required => {
                    return Err(StoreError::MissingField(field.name.clone()));
                }
                None => {}
            },
            FieldKind::MultiRelation(_) => {}
        }
    }
    Ok(columns)
}
