//! Entity creation from a resolved draft.

use crate::error::ImportError;
use crate::resolve::ResolvedEntityDraft;
use crate::schema::SchemaDescriptor;
use crate::store::EntityStore;
use crate::types::DbId;

/// Persist a draft and return the new entity's identity.
///
/// The entity is created from its scalar fields and single relations
/// first; multi-relations are linked afterwards, one call per field,
/// because a link needs the owner's identity.
pub async fn build<S>(
    store: &mut S,
    schema: &SchemaDescriptor,
    draft: &ResolvedEntityDraft,
) -> Result<DbId, ImportError>
where
    S: EntityStore + ?Sized,
{
    let entity_type = schema.entity_type();
    let id = store
        .create(schema, &draft.scalar_fields, &draft.single_relations)
        .await
        .map_err(|e| ImportError::persistence(format!("create {entity_type}"), e))?;

    for (field, related) in &draft.multi_relations {
        store
            .link(entity_type, id, field, related)
            .await
            .map_err(|e| ImportError::persistence(format!("link {field}"), e))?;
    }

    Ok(id)
}
