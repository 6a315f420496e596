//! The fixed set of pipeline stages.

use crate::errors::OrchestratorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One named unit of work in the pipeline.
///
/// The derived ordering follows the static dependency order, so a
/// `BTreeSet<StageId>` always iterates upstream stages first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Turns the free-text requirement into user stories.
    Requirements,
    /// Produces data models and endpoints.
    Design,
    /// Produces server-side code files.
    Backend,
    /// Produces client-side code files.
    Frontend,
    /// Checks the produced work and reports failing sub-checks.
    Verify,
}

impl StageId {
    /// All stages in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Requirements,
        Self::Design,
        Self::Backend,
        Self::Frontend,
        Self::Verify,
    ];

    /// Returns the snake_case identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requirements => "requirements",
            Self::Design => "design",
            Self::Backend => "backend",
            Self::Frontend => "frontend",
            Self::Verify => "verify",
        }
    }

    /// Returns the role name of the agent that performs the stage.
    #[must_use]
    pub const fn role(self) -> &'static str {
        match self {
            Self::Requirements => "product_owner",
            Self::Design => "architect",
            Self::Backend => "backend_engineer",
            Self::Frontend => "frontend_engineer",
            Self::Verify => "qa_engineer",
        }
    }

    /// Returns a human-readable title.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Requirements => "User Stories",
            Self::Design => "System Design",
            Self::Backend => "Backend Code",
            Self::Frontend => "Frontend Code",
            Self::Verify => "Test Report",
        }
    }

    /// Returns true for the verify stage.
    #[must_use]
    pub const fn is_verify(self) -> bool {
        matches!(self, Self::Verify)
    }

    /// Returns the 1-based position in declaration order.
    #[must_use]
    pub const fn ordinal(self) -> usize {
        match self {
            Self::Requirements => 1,
            Self::Design => 2,
            Self::Backend => 3,
            Self::Frontend => 4,
            Self::Verify => 5,
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized || stage.role() == normalized)
            .ok_or_else(|| OrchestratorError::UnknownStageReference(s.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_serde() {
        for stage in StageId::ALL {
            let json = serde_json::to_value(stage).unwrap();
            assert_eq!(json, serde_json::Value::String(stage.to_string()));
        }
    }

    #[test]
    fn test_parse_identifiers_and_roles() {
        assert_eq!("design".parse::<StageId>().unwrap(), StageId::Design);
        assert_eq!("architect".parse::<StageId>().unwrap(), StageId::Design);
        assert_eq!(" Backend_Engineer ".parse::<StageId>().unwrap(), StageId::Backend);
        assert_eq!("frontend-engineer".parse::<StageId>().unwrap(), StageId::Frontend);
        assert_eq!("qa_engineer".parse::<StageId>().unwrap(), StageId::Verify);
    }

    #[test]
    fn test_parse_unknown() {
        let err = "marketing".parse::<StageId>().unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownStageReference(name) if name == "marketing"));
    }

    #[test]
    fn test_ordering_follows_dependencies() {
        let mut stages = vec![StageId::Verify, StageId::Backend, StageId::Requirements];
        stages.sort();
        assert_eq!(
            stages,
            vec![StageId::Requirements, StageId::Backend, StageId::Verify]
        );
        assert_eq!(StageId::Frontend.ordinal(), 4);
    }
}
