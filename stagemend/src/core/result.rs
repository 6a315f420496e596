//! Stage result type with factory methods.

use crate::recovery::RungKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Why a stage result is a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The generator never returned text.
    Transient,
    /// No ladder rung recovered a valid structure.
    Structural,
    /// A structure was recovered but broke a semantic invariant.
    Semantic,
    /// The attempt loop was cancelled before any text arrived.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Structural => write!(f, "structural"),
            Self::Semantic => write!(f, "semantic"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The outcome of recovering or executing one stage.
///
/// A `StageResult` is never patched. A new attempt produces a new value that
/// replaces the old one wholesale. `success == true` implies `data` holds a
/// record that passed the schema and every invariant it was checked against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Whether a valid record was produced.
    pub success: bool,

    /// The validated record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// The raw generator text the record was recovered from.
    #[serde(default)]
    pub raw_text: String,

    /// Diagnostic for failed results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,

    /// Classification of the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,

    /// The ladder rung that produced `data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_by: Option<RungKind>,

    /// Number of generator attempts consumed.
    #[serde(default)]
    pub attempts: u32,
}

impl StageResult {
    /// Creates a successful result recovered by `rung`.
    #[must_use]
    pub fn recovered(data: Value, raw_text: impl Into<String>, rung: RungKind) -> Self {
        Self {
            success: true,
            data: Some(data),
            raw_text: raw_text.into(),
            error_detail: None,
            failure: None,
            recovered_by: Some(rung),
            attempts: 0,
        }
    }

    /// Creates a failed result, keeping the raw text for diagnostics.
    #[must_use]
    pub fn failed(raw_text: impl Into<String>, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            raw_text: raw_text.into(),
            error_detail: Some(detail.into()),
            failure: Some(kind),
            recovered_by: None,
            attempts: 0,
        }
    }

    /// Creates the ladder's total-failure result.
    #[must_use]
    pub fn unrecoverable(raw_text: impl Into<String>) -> Self {
        Self::failed(raw_text, FailureKind::Structural, "no valid structure recoverable")
    }

    /// Returns a copy tagged with the number of attempts consumed.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Returns the record when the result succeeded.
    #[must_use]
    pub fn valid_data(&self) -> Option<&Value> {
        if self.success {
            self.data.as_ref()
        } else {
            None
        }
    }

    /// Returns the hex SHA-256 digest of the raw text.
    #[must_use]
    pub fn raw_digest(&self) -> String {
        hex::encode(Sha256::digest(self.raw_text.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recovered_result() {
        let result = StageResult::recovered(json!({"a": 1}), "{\"a\": 1}", RungKind::DirectParse)
            .with_attempts(1);
        assert!(result.success);
        assert_eq!(result.valid_data(), Some(&json!({"a": 1})));
        assert_eq!(result.recovered_by, Some(RungKind::DirectParse));
        assert_eq!(result.attempts, 1);
        assert!(result.error_detail.is_none());
    }

    #[test]
    fn test_unrecoverable_preserves_raw_text() {
        let result = StageResult::unrecoverable("garbage");
        assert!(!result.success);
        assert!(result.valid_data().is_none());
        assert_eq!(result.raw_text, "garbage");
        assert_eq!(result.error_detail.as_deref(), Some("no valid structure recoverable"));
        assert_eq!(result.failure, Some(FailureKind::Structural));
    }

    #[test]
    fn test_raw_digest_is_stable() {
        let a = StageResult::unrecoverable("same text");
        let b = StageResult::failed("same text", FailureKind::Semantic, "other");
        assert_eq!(a.raw_digest(), b.raw_digest());
        assert_eq!(a.raw_digest().len(), 64);
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let result = StageResult::unrecoverable("x");
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("data").is_none());
        assert!(json.get("recovered_by").is_none());
        assert_eq!(json["failure"], "structural");
    }
}
