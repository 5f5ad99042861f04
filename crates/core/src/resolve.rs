//! Field value resolution: scalars are tidied, relation cells become
//! identities of get-or-created related entities.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::{ImportError, StoreError};
use crate::normalize::NormalizedRow;
use crate::schema::{FieldDescriptor, FieldKind, RelationTarget, SchemaDescriptor};
use crate::store::{EntityStore, FieldValues, RelationIds};
use crate::types::DbId;
use crate::value::CellValue;

/// Separator between natural keys in a multi-relation cell.
pub const MULTI_VALUE_SEPARATOR: char = ',';

/// The result of resolving one field.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedValue {
    Scalar(CellValue),
    /// `None` when the cell was blank.
    Single(Option<DbId>),
    /// Identities in order of first occurrence, without duplicates.
    Multi(Vec<DbId>),
}

/// Everything needed to create one entity and link its multi-relations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedEntityDraft {
    pub scalar_fields: FieldValues,
    pub single_relations: RelationIds,
    pub multi_relations: IndexMap<String, Vec<DbId>>,
}

/// Split a multi-relation cell into its distinct natural keys.
///
/// Pieces are trimmed, empty pieces dropped, and repeated keys collapsed to
/// their first occurrence.
pub fn split_keys(value: &CellValue) -> Vec<String> {
    let Some(text) = value.key_text() else {
        return Vec::new();
    };
    let mut keys: Vec<String> = Vec::new();
    for piece in text.split(MULTI_VALUE_SEPARATOR) {
        let piece = piece.trim();
        if !piece.is_empty() && !keys.iter().any(|k| k == piece) {
            keys.push(piece.to_string());
        }
    }
    keys
}

type CacheKey = (String, String, String);

/// Natural-key to identity cache for one batch.
///
/// Entries learned while a row is in flight stay pending until the
/// coordinator decides whether that row's effects are kept.
#[derive(Debug, Default)]
pub struct KeyCache {
    settled: HashMap<CacheKey, DbId>,
    pending: HashMap<CacheKey, DbId>,
}

impl KeyCache {
    fn key(target: &RelationTarget, key: &str) -> CacheKey {
        (
            target.entity_type.clone(),
            target.natural_key.clone(),
            key.to_string(),
        )
    }

    pub fn get(&self, target: &RelationTarget, key: &str) -> Option<DbId> {
        let k = Self::key(target, key);
        self.pending
            .get(&k)
            .or_else(|| self.settled.get(&k))
            .copied()
    }

    fn insert(&mut self, target: &RelationTarget, key: &str, id: DbId) {
        self.pending.insert(Self::key(target, key), id);
    }

    /// Keep the entries learned by the current row.
    pub fn settle(&mut self) {
        self.settled.extend(self.pending.drain());
    }

    /// Forget the entries learned by the current row.
    pub fn discard(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.settled.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves normalized rows into entity drafts.
#[derive(Debug, Default)]
pub struct ValueResolver {
    cache: KeyCache,
}

impl ValueResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(&self) -> &KeyCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut KeyCache {
        &mut self.cache
    }

    /// Resolve one field's raw value.
    ///
    /// Relations are get-or-created immediately, including multi-relation
    /// members; only their linking waits for the owner to exist.
    pub async fn resolve<S>(
        &mut self,
        store: &mut S,
        field: &FieldDescriptor,
        raw: &CellValue,
    ) -> Result<ResolvedValue, ImportError>
    where
        S: EntityStore + ?Sized,
    {
        match &field.kind {
            FieldKind::Scalar(_) => Ok(ResolvedValue::Scalar(raw.clone().trimmed())),
            FieldKind::SingleRelation(target) => {
                let Some(key) = raw.key_text() else {
                    return Ok(ResolvedValue::Single(None));
                };
                let id = self
                    .get_or_create(store, target, &key)
                    .await
                    .map_err(|e| ImportError::resolution(&field.name, e))?;
                Ok(ResolvedValue::Single(Some(id)))
            }
            FieldKind::MultiRelation(target) => {
                let mut ids = Vec::new();
                for key in split_keys(raw) {
                    let id = self
                        .get_or_create(store, target, &key)
                        .await
                        .map_err(|e| ImportError::resolution(&field.name, e))?;
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                Ok(ResolvedValue::Multi(ids))
            }
        }
    }

    /// Resolve every field present in a normalized row, in column order.
    pub async fn resolve_row<S>(
        &mut self,
        store: &mut S,
        schema: &SchemaDescriptor,
        row: &NormalizedRow,
    ) -> Result<ResolvedEntityDraft, ImportError>
    where
        S: EntityStore + ?Sized,
    {
        let mut draft = ResolvedEntityDraft::default();
        for (name, raw) in row.iter() {
            // Normalized rows only carry declared fields.
            let Some(field) = schema.field(name) else {
                continue;
            };
            match self.resolve(store, field, raw).await? {
                ResolvedValue::Scalar(value) => {
                    draft.scalar_fields.insert(field.name.clone(), value);
                }
                ResolvedValue::Single(Some(id)) => {
                    draft.single_relations.insert(field.name.clone(), id);
                }
                ResolvedValue::Single(None) => {}
                ResolvedValue::Multi(ids) => {
                    draft.multi_relations.insert(field.name.clone(), ids);
                }
            }
        }
        Ok(draft)
    }

    async fn get_or_create<S>(
        &mut self,
        store: &mut S,
        target: &RelationTarget,
        key: &str,
    ) -> Result<DbId, StoreError>
    where
        S: EntityStore + ?Sized,
    {
        if let Some(id) = self.cache.get(target, key) {
            return Ok(id);
        }
        let id = store.get_or_create_by_key(target, key).await?;
        tracing::debug!(
            entity_type = %target.entity_type,
            key,
            id,
            "Resolved related entity"
        );
        self.cache.insert(target, key, id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_keys_trims_and_deduplicates() {
        assert_eq!(split_keys(&CellValue::text("red, blue,blue")), ["red", "blue"]);
        assert_eq!(split_keys(&CellValue::text(" a ,, b , ")), ["a", "b"]);
        assert!(split_keys(&CellValue::text("  ")).is_empty());
        assert!(split_keys(&CellValue::Empty).is_empty());
    }

    #[test]
    fn split_keys_accepts_numeric_cells() {
        assert_eq!(split_keys(&CellValue::Integer(42)), ["42"]);
    }

    #[test]
    fn cache_discard_forgets_only_pending_entries() {
        let target = RelationTarget {
            entity_type: "categories".into(),
            natural_key: "name".into(),
        };
        let mut cache = KeyCache::default();
        cache.insert(&target, "Tools", 1);
        cache.settle();
        cache.insert(&target, "Garden", 2);
        assert_eq!(cache.get(&target, "Garden"), Some(2));

        cache.discard();
        assert_eq!(cache.get(&target, "Tools"), Some(1));
        assert_eq!(cache.get(&target, "Garden"), None);
        assert_eq!(cache.len(), 1);
    }
}
