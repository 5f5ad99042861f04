//! The product catalog: the entity types the service imports.

use crate::error::SchemaConfigurationError;
use crate::schema::{FieldDescriptor, ScalarType, SchemaDescriptor};

pub const PRODUCTS: &str = "products";
pub const CATEGORIES: &str = "categories";
pub const PRODUCT_TAGS: &str = "product_tags";

/// Natural key shared by categories and tags.
pub const NAME_KEY: &str = "name";

/// Length limit of `name` columns.
pub const NAME_MAX_LENGTH: usize = 255;

/// Descriptor for `products`.
///
/// `category` is a foreign key to `categories`, `tags` a many-to-many set
/// of `product_tags`; both deduplicate on `name`.
pub fn product_schema() -> Result<SchemaDescriptor, SchemaConfigurationError> {
    SchemaDescriptor::new(
        PRODUCTS,
        vec![
            FieldDescriptor::scalar(
                "name",
                ScalarType::Text {
                    max_length: Some(NAME_MAX_LENGTH),
                },
            )
            .required(),
            FieldDescriptor::scalar(
                "price",
                ScalarType::Decimal {
                    precision: 10,
                    scale: 2,
                },
            )
            .required(),
            FieldDescriptor::scalar("description", ScalarType::Text { max_length: None }),
            FieldDescriptor::single_relation("category", CATEGORIES, NAME_KEY).required(),
            FieldDescriptor::multi_relation("tags", PRODUCT_TAGS, NAME_KEY),
        ],
    )
}

/// All importable schemas, validated once at startup.
#[derive(Debug, Clone)]
pub struct Catalog {
    schemas: Vec<SchemaDescriptor>,
}

impl Catalog {
    pub fn load() -> Result<Self, SchemaConfigurationError> {
        Ok(Self {
            schemas: vec![product_schema()?],
        })
    }

    /// The descriptor for an importable entity type.
    pub fn schema_for(&self, entity_type: &str) -> Option<&SchemaDescriptor> {
        self.schemas.iter().find(|s| s.entity_type() == entity_type)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.schemas.iter().map(SchemaDescriptor::entity_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldKind;

    #[test]
    fn product_schema_is_valid() {
        let schema = product_schema().unwrap();
        assert_eq!(schema.entity_type(), PRODUCTS);
        assert_eq!(schema.fields().len(), 5);
    }

    #[test]
    fn product_relations_point_at_name_keys() {
        let schema = product_schema().unwrap();
        match &schema.field("category").unwrap().kind {
            FieldKind::SingleRelation(t) => {
                assert_eq!(t.entity_type, CATEGORIES);
                assert_eq!(t.natural_key, NAME_KEY);
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert!(matches!(
            schema.field("tags").unwrap().kind,
            FieldKind::MultiRelation(_)
        ));
    }

    #[test]
    fn catalog_lookup() {
        let catalog = Catalog::load().unwrap();
        assert!(catalog.schema_for(PRODUCTS).is_some());
        assert!(catalog.schema_for(CATEGORIES).is_none());
        assert_eq!(catalog.entity_types().collect::<Vec<_>>(), [PRODUCTS]);
    }
}
