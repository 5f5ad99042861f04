//! Tabular import engine.
//!
//! Reconciles spreadsheet rows against a statically declared entity schema:
//! columns are normalized to field names, relation cells are resolved by
//! natural key (get-or-create), entities are created and their
//! many-to-many links applied once the owner exists. A batch coordinator
//! drives every row through that pipeline inside one transaction scope and
//! reports per-row outcomes.
//!
//! This crate has no SQL and no HTTP. Persistence is reached through the
//! traits in [`store`]; [`memory`] provides an in-process implementation.

pub mod batch;
pub mod builder;
pub mod catalog;
pub mod error;
pub mod memory;
pub mod normalize;
pub mod resolve;
pub mod schema;
pub mod store;
pub mod types;
pub mod value;
