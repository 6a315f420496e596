//! Error types for the stagemend orchestrator.
//!
//! Every failure the orchestrator can observe is classified into one of the
//! variants of [`OrchestratorError`]. None of them is fatal to a run: the
//! state machine maps each one onto a retry, a fallback or a clean stop.

use crate::core::FailureKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The generator failed or timed out; the attempt may be retried.
    #[error("Transient generator error: {0}")]
    TransientGenerator(#[from] GeneratorError),

    /// No ladder rung could recover a structurally valid record.
    #[error("Structural parse failure for '{schema}': {detail}")]
    StructuralParseFailure {
        /// Name of the schema the text was recovered against.
        schema: String,
        /// Diagnostic detail.
        detail: String,
    },

    /// The record parsed but broke a declared business rule.
    #[error("{0}")]
    SemanticInvariantViolation(#[from] InvariantViolation),

    /// A decision named a stage outside the known set.
    #[error("Unknown stage reference: '{0}'")]
    UnknownStageReference(String),

    /// The decision call and its recovery both failed.
    #[error("Decision recovery failed: {0}")]
    DecisionRecoveryFailure(String),

    /// The run was cancelled cooperatively.
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// Configuration could not be loaded or is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),
}

impl OrchestratorError {
    /// Returns true if the error consumes a retry rather than ending the stage.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientGenerator(_)
                | Self::StructuralParseFailure { .. }
                | Self::SemanticInvariantViolation(_)
        )
    }

    /// Classifies the error for a failed [`crate::core::StageResult`].
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::TransientGenerator(_) => FailureKind::Transient,
            Self::SemanticInvariantViolation(_) => FailureKind::Semantic,
            Self::Cancelled(_) => FailureKind::Cancelled,
            Self::StructuralParseFailure { .. }
            | Self::UnknownStageReference(_)
            | Self::DecisionRecoveryFailure(_)
            | Self::Config(_) => FailureKind::Structural,
        }
    }
}

/// Error returned by a [`crate::generator::Generator`] call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeneratorError {
    /// The backend reported a recoverable failure.
    #[error("generator unavailable: {0}")]
    Transient(String),

    /// The call did not complete in time.
    #[error("generator call timed out after {0} ms")]
    Timeout(u64),
}

impl GeneratorError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }
}

/// A record failed structural validation against a schema.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("schema violation at '{path}': {message}")]
pub struct SchemaViolation {
    /// Dotted path of the offending field (`$` for the root).
    pub path: String,
    /// What was wrong.
    pub message: String,
}

impl SchemaViolation {
    /// Creates a new schema violation.
    #[must_use]
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A structurally valid record broke a semantic rule.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("invariant '{rule}' violated: {description}")]
pub struct InvariantViolation {
    /// Short name of the rule.
    pub rule: String,
    /// Description suitable for feeding back into the next prompt.
    pub description: String,
}

impl InvariantViolation {
    /// Creates a new invariant violation.
    #[must_use]
    pub fn new(rule: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            description: description.into(),
        }
    }
}

/// Error raised when a stage graph is malformed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// The upstream map contains a cycle.
    #[error("Stage graph contains a dependency cycle: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    /// A stage has no entry in the upstream map.
    #[error("Stage '{0}' is not declared in the graph")]
    MissingStage(String),

    /// The verify stage must depend on every other stage and feed none.
    #[error("Invalid verify stage wiring: {0}")]
    InvalidVerify(String),
}

/// Error raised when configuration cannot be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config '{path}': {source}")]
    Read {
        /// Path that was read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("invalid config value for '{field}': {message}")]
    Invalid {
        /// Field name.
        field: String,
        /// What was wrong.
        message: String,
    },
}

impl ConfigError {
    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error raised by an artifact store.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Writing failed.
    #[error("artifact IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding failed.
    #[error("artifact serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A generated file name would escape the output directory.
    #[error("refusing to write unsafe path '{0}'")]
    UnsafePath(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_display() {
        let err = GraphError::CycleDetected(vec![
            "design".to_string(),
            "backend".to_string(),
            "design".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Stage graph contains a dependency cycle: design -> backend -> design"
        );
    }

    #[test]
    fn test_generator_error_converts() {
        let err: OrchestratorError = GeneratorError::Timeout(1500).into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("1500 ms"));
    }

    #[test]
    fn test_invariant_violation_converts() {
        let violation = InvariantViolation::new("status_consistency", "pass with 2 failing checks");
        let err: OrchestratorError = violation.into();
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "invariant 'status_consistency' violated: pass with 2 failing checks"
        );
    }

    #[test]
    fn test_unknown_stage_is_not_retryable() {
        let err = OrchestratorError::UnknownStageReference("marketing".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_failure_kind_classification() {
        let structural = OrchestratorError::StructuralParseFailure {
            schema: "user_stories".to_string(),
            detail: "no valid structure recoverable".to_string(),
        };
        assert_eq!(structural.failure_kind(), FailureKind::Structural);
        assert!(structural.is_retryable());
        assert_eq!(
            OrchestratorError::from(GeneratorError::transient("busy")).failure_kind(),
            FailureKind::Transient
        );
        assert_eq!(
            OrchestratorError::from(InvariantViolation::new("non_empty", "empty")).failure_kind(),
            FailureKind::Semantic
        );
        let cancelled = OrchestratorError::Cancelled("operator stop".to_string());
        assert_eq!(cancelled.failure_kind(), FailureKind::Cancelled);
        assert!(!cancelled.is_retryable());
    }

    #[test]
    fn test_schema_violation_display() {
        let err = SchemaViolation::new("stories[0].title", "expected string");
        assert_eq!(err.to_string(), "schema violation at 'stories[0].title': expected string");
    }

    #[test]
    fn test_config_invalid() {
        let err = ConfigError::invalid("max_iterations", "must be at least 1");
        assert!(err.to_string().contains("max_iterations"));
    }
}
