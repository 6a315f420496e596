//! Context management for pipeline execution.
//!
//! This module provides:
//! - The run-scoped [`PipelineContext`] accumulator
//! - A bounded per-stage [`ContextBuilder`]
//! - Prompt assembly around a stage profile

mod builder;
mod prompt;

pub use builder::{ContextBuilder, RerunFeedback, DEFAULT_CONTEXT_BUDGET};
pub use prompt::{assemble_prompt, decision_context, CONTEXT_HEADING, TASK_HEADER};

use crate::core::StageId;
use serde_json::Value;
use std::collections::BTreeMap;

/// The requirement plus the latest successful record of every stage.
///
/// Only validated data enters the context. A failed attempt never replaces
/// an earlier success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineContext {
    requirement: String,
    outputs: BTreeMap<StageId, Value>,
}

impl PipelineContext {
    /// Creates an empty context for `requirement`.
    #[must_use]
    pub fn new(requirement: impl Into<String>) -> Self {
        Self {
            requirement: requirement.into(),
            outputs: BTreeMap::new(),
        }
    }

    /// Returns the original requirement text.
    #[must_use]
    pub fn requirement(&self) -> &str {
        &self.requirement
    }

    /// Records the successful output of `stage`.
    pub fn record(&mut self, stage: StageId, data: Value) {
        self.outputs.insert(stage, data);
    }

    /// Returns the latest successful output of `stage`.
    #[must_use]
    pub fn output(&self, stage: StageId) -> Option<&Value> {
        self.outputs.get(&stage)
    }

    /// Returns true if `stage` has succeeded at least once.
    #[must_use]
    pub fn has_output(&self, stage: StageId) -> bool {
        self.outputs.contains_key(&stage)
    }
}
