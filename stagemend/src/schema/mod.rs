//! Record schemas, semantic invariants and stage profiles.
//!
//! Schemas are data, not code: every descriptor, rule and profile is a
//! serde type so a catalog can be supplied by configuration.

mod catalog;
mod descriptor;
mod rules;

pub use catalog::{StageCatalog, StageProfile};
pub(crate) use descriptor::conform_value;
pub use descriptor::{EnumSpec, FieldSpec, FieldType, RecordPattern, SchemaDescriptor};
pub use rules::{check_all, SemanticRule};
