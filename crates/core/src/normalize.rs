//! Column-name normalization: raw spreadsheet rows to schema fields.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::schema::SchemaDescriptor;
use crate::value::CellValue;

/// One spreadsheet row: `(raw column name, cell)` pairs in column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    pub cells: Vec<(String, CellValue)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: CellValue) {
        self.cells.push((column.into(), value));
    }

    pub fn with(mut self, column: impl Into<String>, value: CellValue) -> Self {
        self.push(column, value);
        self
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, CellValue)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (S, CellValue)>>(iter: I) -> Self {
        Self {
            cells: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Cells keyed by canonical field name. Only names the schema declares are
/// present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedRow(IndexMap<String, CellValue>);

impl NormalizedRow {
    pub fn get(&self, field: &str) -> Option<&CellValue> {
        self.0.get(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Canonical form of a column header: trimmed, spaces replaced by
/// underscores, lowercased.
///
/// Only the space character is replaced; runs of spaces become runs of
/// underscores.
pub fn canonical_column_name(raw: &str) -> String {
    raw.trim().replace(' ', "_").to_lowercase()
}

/// Map a raw row onto the schema's fields.
///
/// Unknown columns are dropped silently. When two columns canonicalize to
/// the same field, the later column wins. Values are passed through
/// unchanged.
pub fn normalize(raw: RawRow, schema: &SchemaDescriptor) -> NormalizedRow {
    let mut fields = IndexMap::with_capacity(raw.len());
    for (column, value) in raw.cells {
        let name = canonical_column_name(&column);
        if schema.contains(&name) {
            fields.insert(name, value);
        }
    }
    NormalizedRow(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::product_schema;

    #[test]
    fn canonical_names_ignore_case_and_surrounding_whitespace() {
        for raw in ["Product Name", "product_name", " PRODUCT_NAME ", "\tProduct Name\n"] {
            assert_eq!(canonical_column_name(raw), "product_name", "{raw:?}");
        }
    }

    #[test]
    fn inner_space_runs_are_kept_as_underscores() {
        assert_eq!(canonical_column_name("Unit  Price"), "unit__price");
    }

    #[test]
    fn unknown_columns_are_dropped() {
        let schema = product_schema().unwrap();
        let row = RawRow::new()
            .with("Name", CellValue::text("Widget"))
            .with("Colour", CellValue::text("red"))
            .with("Price", CellValue::Float(9.99));

        let normalized = normalize(row, &schema);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized.get("name"), Some(&CellValue::text("Widget")));
        assert!(normalized.get("colour").is_none());
    }

    #[test]
    fn later_duplicate_column_wins() {
        let schema = product_schema().unwrap();
        let row = RawRow::new()
            .with("Name", CellValue::text("first"))
            .with("Price", CellValue::text("1"))
            .with(" NAME ", CellValue::text("second"));

        let normalized = normalize(row, &schema);
        assert_eq!(normalized.get("name"), Some(&CellValue::text("second")));
        let order: Vec<&str> = normalized.iter().map(|(k, _)| k).collect();
        assert_eq!(order, ["name", "price"]);
    }

    #[test]
    fn values_pass_through_untouched() {
        let schema = product_schema().unwrap();
        let row = RawRow::new().with("description", CellValue::text("  padded  "));
        let normalized = normalize(row, &schema);
        assert_eq!(
            normalized.get("description"),
            Some(&CellValue::text("  padded  "))
        );
    }
}
