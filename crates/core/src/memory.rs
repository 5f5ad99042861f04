//! In-process [`ImportTarget`] used by tests and dry runs that never touch
//! a database.
//!
//! A scope works on a private copy of the committed data; `commit` writes
//! the copy back. Scopes are not isolated from each other: the last commit
//! wins.
//!
//! Natural keys of the catalog's related types are held to the same length
//! limit as their database columns.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::catalog::{CATEGORIES, NAME_KEY, NAME_MAX_LENGTH, PRODUCT_TAGS};
use crate::error::StoreError;
use crate::schema::{FieldKind, RelationTarget, SchemaDescriptor};
use crate::store::{
    prepare_record, ColumnValue, EntityStore, FieldValues, ImportTarget, RelationIds,
    TransactionScope,
};
use crate::types::DbId;
use crate::value::TypedValue;

/// A stored entity: its identity and written columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRecord {
    pub id: DbId,
    pub columns: IndexMap<String, ColumnValue>,
}

impl MemoryRecord {
    pub fn value(&self, field: &str) -> Option<&ColumnValue> {
        self.columns.get(field)
    }

    /// Text or decimal column rendered as a string.
    pub fn text(&self, field: &str) -> Option<&str> {
        match self.columns.get(field)? {
            ColumnValue::Scalar(TypedValue::Text(s)) | ColumnValue::Scalar(TypedValue::Decimal(s)) => {
                Some(s)
            }
            _ => None,
        }
    }

    pub fn relation(&self, field: &str) -> Option<DbId> {
        match self.columns.get(field)? {
            ColumnValue::Relation(id) => Some(*id),
            _ => None,
        }
    }
}

type KeyIndex = (String, String, String);
type LinkKey = (String, DbId, String);

#[derive(Debug, Clone, Default)]
struct MemoryData {
    last_id: DbId,
    records: IndexMap<String, Vec<MemoryRecord>>,
    keys: HashMap<KeyIndex, DbId>,
    links: HashMap<LinkKey, Vec<DbId>>,
}

impl MemoryData {
    fn insert(&mut self, entity_type: &str, columns: IndexMap<String, ColumnValue>) -> DbId {
        self.last_id += 1;
        let id = self.last_id;
        self.records
            .entry(entity_type.to_string())
            .or_default()
            .push(MemoryRecord { id, columns });
        id
    }

    fn exists(&self, entity_type: &str, id: DbId) -> bool {
        self.records
            .get(entity_type)
            .is_some_and(|rs| rs.iter().any(|r| r.id == id))
    }
}

#[derive(Debug, Default)]
struct Shared {
    committed: MemoryData,
    faults: HashMap<(String, String), StoreError>,
    /// Maximum key length in characters, per `(entity_type, natural_key)`.
    key_limits: HashMap<(String, String), usize>,
    get_or_create_calls: usize,
    create_calls: usize,
    link_calls: usize,
}

/// In-memory store with failure injection and call counters.
#[derive(Debug, Clone)]
pub struct MemoryTarget {
    shared: Arc<Mutex<Shared>>,
}

impl Default for MemoryTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTarget {
    /// An empty store enforcing the catalog's natural key lengths.
    pub fn new() -> Self {
        let target = Self {
            shared: Arc::default(),
        };
        for entity_type in [CATEGORIES, PRODUCT_TAGS] {
            target.limit_key_length(entity_type, NAME_KEY, NAME_MAX_LENGTH);
        }
        target
    }

    /// Reject natural keys of `entity_type.natural_key` longer than `max`
    /// characters.
    pub fn limit_key_length(&self, entity_type: &str, natural_key: &str, max: usize) {
        self.lock()
            .key_limits
            .insert((entity_type.to_string(), natural_key.to_string()), max);
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        lock(&self.shared)
    }

    /// Make every `get_or_create_by_key` for `key` of `entity_type` fail
    /// with `error`.
    pub fn fail_on_key(&self, entity_type: &str, key: &str, error: StoreError) {
        self.lock()
            .faults
            .insert((entity_type.to_string(), key.to_string()), error);
    }

    /// Committed records of an entity type, in creation order.
    pub fn records(&self, entity_type: &str) -> Vec<MemoryRecord> {
        self.lock()
            .committed
            .records
            .get(entity_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn count(&self, entity_type: &str) -> usize {
        self.lock()
            .committed
            .records
            .get(entity_type)
            .map_or(0, Vec::len)
    }

    /// Committed identity of the related entity with this natural key.
    pub fn find_by_key(&self, entity_type: &str, natural_key: &str, key: &str) -> Option<DbId> {
        self.lock()
            .committed
            .keys
            .get(&(
                entity_type.to_string(),
                natural_key.to_string(),
                key.to_string(),
            ))
            .copied()
    }

    /// Committed link set of an owner's multi-relation field.
    pub fn links(&self, owner_type: &str, owner_id: DbId, field: &str) -> Vec<DbId> {
        self.lock()
            .committed
            .links
            .get(&(owner_type.to_string(), owner_id, field.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Store-level get-or-create calls across all scopes, including failed
    /// and rolled-back ones.
    pub fn get_or_create_calls(&self) -> usize {
        self.lock().get_or_create_calls
    }

    pub fn create_calls(&self) -> usize {
        self.lock().create_calls
    }

    pub fn link_calls(&self) -> usize {
        self.lock().link_calls
    }
}

#[async_trait]
impl ImportTarget for MemoryTarget {
    type Scope = MemoryScope;

    async fn begin(&self) -> Result<MemoryScope, StoreError> {
        let working = self.lock().committed.clone();
        Ok(MemoryScope {
            shared: Arc::clone(&self.shared),
            working,
            savepoint: None,
        })
    }
}

/// An open in-memory transaction.
#[derive(Debug)]
pub struct MemoryScope {
    shared: Arc<Mutex<Shared>>,
    working: MemoryData,
    savepoint: Option<MemoryData>,
}

#[async_trait]
impl EntityStore for MemoryScope {
    async fn create(
        &mut self,
        schema: &SchemaDescriptor,
        scalars: &FieldValues,
        relations: &RelationIds,
    ) -> Result<DbId, StoreError> {
        lock(&self.shared).create_calls += 1;
        let prepared = prepare_record(schema, scalars, relations)?;

        let mut columns = IndexMap::with_capacity(prepared.len());
        for column in prepared {
            if let (ColumnValue::Relation(id), FieldKind::SingleRelation(target)) =
                (&column.value, &column.field.kind)
            {
                if !self.working.exists(&target.entity_type, *id) {
                    return Err(StoreError::Constraint(format!(
                        "{} {id} does not exist",
                        target.entity_type
                    )));
                }
            }
            columns.insert(column.field.name.clone(), column.value);
        }
        Ok(self.working.insert(schema.entity_type(), columns))
    }

    async fn get_or_create_by_key(
        &mut self,
        target: &RelationTarget,
        key: &str,
    ) -> Result<DbId, StoreError> {
        {
            let mut shared = lock(&self.shared);
            shared.get_or_create_calls += 1;
            if let Some(err) = shared
                .faults
                .get(&(target.entity_type.clone(), key.to_string()))
            {
                return Err(err.clone());
            }
            let limit = shared
                .key_limits
                .get(&(target.entity_type.clone(), target.natural_key.clone()));
            let len = key.chars().count();
            if let Some(max) = limit.filter(|max| len > **max) {
                return Err(StoreError::InvalidValue {
                    field: target.natural_key.clone(),
                    reason: format!("ensure this value has at most {max} characters (it has {len})"),
                });
            }
        }

        let index = (
            target.entity_type.clone(),
            target.natural_key.clone(),
            key.to_string(),
        );
        if let Some(id) = self.working.keys.get(&index) {
            return Ok(*id);
        }
        let columns = IndexMap::from([(
            target.natural_key.clone(),
            ColumnValue::Scalar(TypedValue::Text(key.to_string())),
        )]);
        let id = self.working.insert(&target.entity_type, columns);
        self.working.keys.insert(index, id);
        Ok(id)
    }

    async fn link(
        &mut self,
        owner_type: &str,
        owner_id: DbId,
        relation_field: &str,
        related: &[DbId],
    ) -> Result<(), StoreError> {
        lock(&self.shared).link_calls += 1;
        if !self.working.exists(owner_type, owner_id) {
            return Err(StoreError::Constraint(format!(
                "{owner_type} {owner_id} does not exist"
            )));
        }
        self.working.links.insert(
            (owner_type.to_string(), owner_id, relation_field.to_string()),
            related.to_vec(),
        );
        Ok(())
    }
}

#[async_trait]
impl TransactionScope for MemoryScope {
    async fn savepoint(&mut self) -> Result<(), StoreError> {
        if self.savepoint.is_some() {
            return Err(StoreError::Fatal("savepoint already open".into()));
        }
        self.savepoint = Some(self.working.clone());
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), StoreError> {
        self.savepoint
            .take()
            .map(|_| ())
            .ok_or_else(|| StoreError::Fatal("no savepoint to release".into()))
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
        let snapshot = self
            .savepoint
            .take()
            .ok_or_else(|| StoreError::Fatal("no savepoint to roll back to".into()))?;
        self.working = snapshot;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        lock(&self.shared).committed = self.working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    // Counters and committed data stay consistent even if a holder panicked.
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories() -> RelationTarget {
        RelationTarget {
            entity_type: CATEGORIES.into(),
            natural_key: NAME_KEY.into(),
        }
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let target = MemoryTarget::new();
        let mut scope = target.begin().await.unwrap();
        let first = scope.get_or_create_by_key(&categories(), "Tools").await.unwrap();
        let second = scope.get_or_create_by_key(&categories(), "Tools").await.unwrap();
        assert_eq!(first, second);
        scope.commit().await.unwrap();

        assert_eq!(target.count(CATEGORIES), 1);
        assert_eq!(target.find_by_key(CATEGORIES, NAME_KEY, "Tools"), Some(first));
    }

    #[tokio::test]
    async fn rollback_discards_working_copy() {
        let target = MemoryTarget::new();
        let mut scope = target.begin().await.unwrap();
        scope.get_or_create_by_key(&categories(), "Tools").await.unwrap();
        scope.rollback().await.unwrap();
        assert_eq!(target.count(CATEGORIES), 0);
    }

    #[tokio::test]
    async fn savepoint_rollback_restores_snapshot() {
        let target = MemoryTarget::new();
        let mut scope = target.begin().await.unwrap();
        scope.get_or_create_by_key(&categories(), "Kept").await.unwrap();
        scope.savepoint().await.unwrap();
        scope.get_or_create_by_key(&categories(), "Dropped").await.unwrap();
        scope.rollback_to_savepoint().await.unwrap();
        scope.commit().await.unwrap();

        assert!(target.find_by_key(CATEGORIES, NAME_KEY, "Kept").is_some());
        assert!(target.find_by_key(CATEGORIES, NAME_KEY, "Dropped").is_none());
    }

    #[tokio::test]
    async fn injected_fault_is_returned() {
        let target = MemoryTarget::new();
        target.fail_on_key(CATEGORIES, "Broken", StoreError::Constraint("nope".into()));
        let mut scope = target.begin().await.unwrap();
        let err = scope
            .get_or_create_by_key(&categories(), "Broken")
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Constraint("nope".into()));
        assert_eq!(target.get_or_create_calls(), 1);
    }

    #[tokio::test]
    async fn overlong_key_is_rejected_without_creating() {
        let target = MemoryTarget::new();
        let mut scope = target.begin().await.unwrap();
        let long = "x".repeat(NAME_MAX_LENGTH + 1);

        let err = scope
            .get_or_create_by_key(&categories(), &long)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidValue { ref field, .. } if field == NAME_KEY));

        let exact = "x".repeat(NAME_MAX_LENGTH);
        scope.get_or_create_by_key(&categories(), &exact).await.unwrap();
        scope.commit().await.unwrap();
        assert_eq!(target.count(CATEGORIES), 1);
    }

    #[tokio::test]
    async fn link_requires_existing_owner() {
        let target = MemoryTarget::new();
        let mut scope = target.begin().await.unwrap();
        let err = scope.link("products", 99, "tags", &[1]).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }
}
