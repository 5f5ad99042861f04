//! Static description of an importable entity type.
//!
//! Every field is declared up front with its kind, so the import engine
//! never has to discover at runtime whether a column is a plain value, a
//! foreign key or a many-to-many set. Descriptors are validated when they
//! are built; a descriptor that exists is usable.

use std::collections::HashSet;

use crate::error::SchemaConfigurationError;

/// Maximum identifier length accepted for entity types and field names
/// (PostgreSQL's `NAMEDATALEN - 1`).
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Column type a store enforces for a scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Text { max_length: Option<usize> },
    Integer,
    Decimal { precision: u32, scale: u32 },
    Boolean,
}

/// The entity type on the other end of a relation and the field used to
/// deduplicate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationTarget {
    pub entity_type: String,
    pub natural_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarType),
    /// Exactly one related entity, stored on the owner (a foreign key).
    SingleRelation(RelationTarget),
    /// A set of related entities, linked after the owner exists.
    MultiRelation(RelationTarget),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Canonical name (lowercase, underscores).
    pub name: String,
    pub kind: FieldKind,
    /// Whether `create` must receive a non-empty value for this field.
    pub required: bool,
}

impl FieldDescriptor {
    pub fn scalar(name: impl Into<String>, ty: ScalarType) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Scalar(ty),
            required: false,
        }
    }

    pub fn single_relation(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        natural_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::SingleRelation(RelationTarget {
                entity_type: entity_type.into(),
                natural_key: natural_key.into(),
            }),
            required: false,
        }
    }

    pub fn multi_relation(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        natural_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::MultiRelation(RelationTarget {
                entity_type: entity_type.into(),
                natural_key: natural_key.into(),
            }),
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn relation_target(&self) -> Option<&RelationTarget> {
        match &self.kind {
            FieldKind::Scalar(_) => None,
            FieldKind::SingleRelation(t) | FieldKind::MultiRelation(t) => Some(t),
        }
    }
}

/// The ordered fields of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    entity_type: String,
    fields: Vec<FieldDescriptor>,
}

impl SchemaDescriptor {
    /// Build a descriptor, rejecting configurations the engine cannot use:
    /// non-canonical names, duplicate fields, and relations without a
    /// target type or natural key.
    pub fn new(
        entity_type: impl Into<String>,
        fields: Vec<FieldDescriptor>,
    ) -> Result<Self, SchemaConfigurationError> {
        let entity_type = entity_type.into();
        let config_error = |field: &str, reason: String| SchemaConfigurationError {
            entity_type: entity_type.clone(),
            field: field.to_string(),
            reason,
        };

        if !is_canonical_identifier(&entity_type) {
            return Err(config_error(
                "*",
                format!("entity type '{entity_type}' is not a canonical identifier"),
            ));
        }
        if fields.is_empty() {
            return Err(config_error("*", "schema declares no fields".to_string()));
        }

        let mut seen = HashSet::new();
        for field in &fields {
            if !is_canonical_identifier(&field.name) {
                return Err(config_error(
                    &field.name,
                    "field name is not a canonical identifier".to_string(),
                ));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(config_error(&field.name, "field is declared twice".to_string()));
            }
            if let Some(target) = field.relation_target() {
                if target.entity_type.is_empty() {
                    return Err(config_error(
                        &field.name,
                        "relation has no related entity type".to_string(),
                    ));
                }
                if target.natural_key.is_empty() {
                    return Err(config_error(
                        &field.name,
                        "relation has no natural key".to_string(),
                    ));
                }
                if !is_canonical_identifier(&target.entity_type)
                    || !is_canonical_identifier(&target.natural_key)
                {
                    return Err(config_error(
                        &field.name,
                        format!(
                            "relation target '{}.{}' is not a canonical identifier",
                            target.entity_type, target.natural_key
                        ),
                    ));
                }
            }
        }

        Ok(Self {
            entity_type,
            fields,
        })
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

/// `[a-z_][a-z0-9_]*`, at most [`MAX_IDENTIFIER_LENGTH`] bytes.
///
/// Descriptors only accept such names, which lets SQL stores interpolate
/// them as identifiers.
pub fn is_canonical_identifier(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_lowercase() || b == b'_' => {}
        _ => return false,
    }
    name.len() <= MAX_IDENTIFIER_LENGTH
        && bytes.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text() -> ScalarType {
        ScalarType::Text { max_length: None }
    }

    #[test]
    fn valid_schema_keeps_declaration_order() {
        let schema = SchemaDescriptor::new(
            "products",
            vec![
                FieldDescriptor::scalar("name", text()).required(),
                FieldDescriptor::single_relation("category", "categories", "name"),
                FieldDescriptor::multi_relation("tags", "product_tags", "name"),
            ],
        )
        .unwrap();

        let names: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["name", "category", "tags"]);
        assert!(schema.field("name").unwrap().required);
        assert!(!schema.contains("price"));
    }

    #[test]
    fn relation_without_natural_key_is_rejected() {
        let err = SchemaDescriptor::new(
            "products",
            vec![FieldDescriptor::single_relation("category", "categories", "")],
        )
        .unwrap_err();
        assert_eq!(err.field, "category");
        assert!(err.reason.contains("natural key"));
    }

    #[test]
    fn relation_without_target_type_is_rejected() {
        let err = SchemaDescriptor::new(
            "products",
            vec![FieldDescriptor::multi_relation("tags", "", "name")],
        )
        .unwrap_err();
        assert!(err.reason.contains("related entity type"));
    }

    #[test]
    fn duplicate_field_is_rejected() {
        let err = SchemaDescriptor::new(
            "products",
            vec![
                FieldDescriptor::scalar("name", text()),
                FieldDescriptor::scalar("name", ScalarType::Integer),
            ],
        )
        .unwrap_err();
        assert!(err.reason.contains("declared twice"));
    }

    #[test]
    fn non_canonical_names_are_rejected() {
        assert!(SchemaDescriptor::new("Products", vec![FieldDescriptor::scalar("name", text())])
            .is_err());
        assert!(
            SchemaDescriptor::new("products", vec![FieldDescriptor::scalar("Product Name", text())])
                .is_err()
        );
        assert!(SchemaDescriptor::new("products", vec![]).is_err());
    }

    #[test]
    fn identifier_rules() {
        assert!(is_canonical_identifier("product_name"));
        assert!(is_canonical_identifier("_x1"));
        assert!(!is_canonical_identifier(""));
        assert!(!is_canonical_identifier("1abc"));
        assert!(!is_canonical_identifier("a-b"));
        assert!(!is_canonical_identifier(&"a".repeat(MAX_IDENTIFIER_LENGTH + 1)));
    }
}
