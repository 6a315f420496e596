//! Testing utilities for stagemend.
//!
//! This module provides:
//! - Scripted, failing, routed and slow generators
//! - Canned stage records that satisfy the standard catalog

pub mod fixtures;
mod mocks;

pub use mocks::{FailingGenerator, RoutedGenerator, ScriptedGenerator, SlowGenerator};
