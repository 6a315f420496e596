//! Core domain model types for stagemend.
//!
//! This module contains the fundamental types used throughout the crate:
//! - The fixed stage identifiers and their role aliases
//! - The immutable stage result produced by every executor call

mod result;
mod stage;

pub use result::{FailureKind, StageResult};
pub use stage::StageId;
