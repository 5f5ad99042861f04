//! Row structs and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` struct matching the
//! database row; import runs also carry their create DTO.

pub mod category;
pub mod import_run;
pub mod product;
pub mod product_tag;
