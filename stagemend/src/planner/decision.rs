//! Manager decisions and the sources that produce them.
//!
//! Both sources return a [`ManagerDecision`]. The generated source asks the
//! generator through the recovery ladder; the fallback derives the rerun set
//! from the owners of failing checks. Callers cannot tell the shapes apart.

use super::report::QaReport;
use crate::context::{assemble_prompt, decision_context};
use crate::core::StageId;
use crate::errors::OrchestratorError;
use crate::executor::StageExecutor;
use crate::schema::StageProfile;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use tracing::warn;

/// Rationale attached to every fallback decision.
pub const FALLBACK_RATIONALE: &str = "decision generation failed; rerunning owners of failing checks";

/// Goal attached to every fallback decision.
pub const FALLBACK_GOAL: &str = "Fix identified issues";

/// Which path produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOrigin {
    /// Proposed by the generator.
    Generated,
    /// Derived from failing-check owners.
    Fallback,
    /// No failing checks; nothing to decide.
    ChecksPassed,
}

impl fmt::Display for DecisionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generated => write!(f, "generated"),
            Self::Fallback => write!(f, "fallback"),
            Self::ChecksPassed => write!(f, "checks_passed"),
        }
    }
}

/// Whether to iterate again, and which stages to recompute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerDecision {
    /// Whether another iteration should run.
    pub should_continue: bool,
    /// Stages to recompute. Closed under the downstream relation once planned.
    pub stages_to_rerun: BTreeSet<StageId>,
    /// Why the decision was made.
    pub rationale: String,
    /// What the next iteration should achieve.
    pub goal: String,
    /// Which path produced the decision.
    pub origin: DecisionOrigin,
}

impl ManagerDecision {
    /// Creates a decision that stops the loop.
    #[must_use]
    pub fn stop(rationale: impl Into<String>, origin: DecisionOrigin) -> Self {
        Self {
            should_continue: false,
            stages_to_rerun: BTreeSet::new(),
            rationale: rationale.into(),
            goal: String::new(),
            origin,
        }
    }
}

/// Inputs to a decision.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    /// The original requirement.
    pub requirement: &'a str,
    /// The latest QA report.
    pub report: &'a QaReport,
    /// Current iteration, starting at 1.
    pub iteration: u32,
    /// Iteration cap.
    pub cap: u32,
}

/// Produces a decision proposal.
#[async_trait]
pub trait DecisionSource: Send + Sync {
    /// Proposes a decision for `input`.
    async fn propose(&self, input: &DecisionInput<'_>) -> Result<ManagerDecision, OrchestratorError>;
}

/// Asks the generator for a decision, through the recovery ladder.
#[derive(Debug, Clone)]
pub struct GeneratedDecision {
    executor: StageExecutor,
    profile: StageProfile,
    max_retries: u32,
}

impl GeneratedDecision {
    /// Creates a generated decision source.
    #[must_use]
    pub fn new(executor: StageExecutor, profile: StageProfile, max_retries: u32) -> Self {
        Self {
            executor,
            profile,
            max_retries,
        }
    }
}

#[async_trait]
impl DecisionSource for GeneratedDecision {
    async fn propose(&self, input: &DecisionInput<'_>) -> Result<ManagerDecision, OrchestratorError> {
        let context = decision_context(input.requirement, input.report, input.iteration, input.cap);
        let prompt = assemble_prompt(&self.profile, &context);

        let result = self
            .executor
            .execute_with_retries(&self.profile, &prompt, self.max_retries, None)
            .await;
        let Some(data) = result.valid_data() else {
            return Err(OrchestratorError::DecisionRecoveryFailure(
                result
                    .error_detail
                    .clone()
                    .unwrap_or_else(|| "no decision recovered".to_string()),
            ));
        };

        let mut stages = BTreeSet::new();
        let names = data
            .get("stages_to_rerun")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str);
        for name in names {
            match name.parse::<StageId>() {
                Ok(stage) if stage.is_verify() => {
                    warn!(iteration = input.iteration, "dropping verify from rerun set");
                }
                Ok(stage) => {
                    stages.insert(stage);
                }
                Err(e) => warn!(iteration = input.iteration, error = %e, "dropping stage name"),
            }
        }

        let text = |key: &str| data.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
        Ok(ManagerDecision {
            should_continue: data.get("should_continue").and_then(Value::as_bool).unwrap_or(false),
            stages_to_rerun: stages,
            rationale: text("rationale"),
            goal: text("goal"),
            origin: DecisionOrigin::Generated,
        })
    }
}

/// Derives a decision from the owners of failing checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackDecision;

impl FallbackDecision {
    /// Returns the fallback decision for `report`.
    #[must_use]
    pub fn derive(&self, report: &QaReport) -> ManagerDecision {
        let stages = report.failing_owners();
        ManagerDecision {
            should_continue: !stages.is_empty(),
            stages_to_rerun: stages,
            rationale: FALLBACK_RATIONALE.to_string(),
            goal: FALLBACK_GOAL.to_string(),
            origin: DecisionOrigin::Fallback,
        }
    }
}

#[async_trait]
impl DecisionSource for FallbackDecision {
    async fn propose(&self, input: &DecisionInput<'_>) -> Result<ManagerDecision, OrchestratorError> {
        Ok(self.derive(input.report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutorConfig, RetryConfig};
    use crate::schema::StageCatalog;
    use crate::testing::{fixtures, ScriptedGenerator};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn source(generator: Arc<ScriptedGenerator>) -> GeneratedDecision {
        let executor = StageExecutor::new(generator, ExecutorConfig::default().with_backoff(RetryConfig::immediate()));
        GeneratedDecision::new(executor, StageCatalog::standard().decision().clone(), 1)
    }

    fn report(owners: &[StageId]) -> QaReport {
        QaReport::from_value(&fixtures::failing_report(owners)).unwrap()
    }

    #[tokio::test]
    async fn test_generated_decision_drops_unknown_and_verify() {
        let text = fixtures::decision_record(true, &["Backend Engineer", "devops", "verify"]).to_string();
        let generator = Arc::new(ScriptedGenerator::from_texts([text]));
        let report = report(&[StageId::Backend]);
        let input = DecisionInput {
            requirement: "todo app",
            report: &report,
            iteration: 1,
            cap: 5,
        };

        let decision = source(generator.clone()).propose(&input).await.unwrap();
        assert_eq!(decision.origin, DecisionOrigin::Generated);
        assert!(decision.should_continue);
        assert_eq!(decision.stages_to_rerun, BTreeSet::from([StageId::Backend]));
        assert_eq!(decision.goal, "Fix the failing checks");

        let prompt = &generator.prompts()[0];
        assert!(prompt.starts_with("# Task: decision"));
        assert!(prompt.contains("Iteration: 1/5"));
        assert!(prompt.contains("[backend]"));
    }

    #[tokio::test]
    async fn test_generated_decision_fails_on_garbage() {
        let generator = Arc::new(ScriptedGenerator::from_texts(["I think we should", "maybe rerun"]));
        let report = report(&[StageId::Design]);
        let input = DecisionInput {
            requirement: "todo app",
            report: &report,
            iteration: 1,
            cap: 5,
        };

        let err = source(generator.clone()).propose(&input).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::DecisionRecoveryFailure(_)));
        assert_eq!(generator.calls(), 2);
    }

    #[test]
    fn test_fallback_uses_failing_owners() {
        let decision = FallbackDecision.derive(&report(&[StageId::Frontend, StageId::Design]));
        assert!(decision.should_continue);
        assert_eq!(
            decision.stages_to_rerun,
            BTreeSet::from([StageId::Design, StageId::Frontend])
        );
        assert_eq!(decision.rationale, FALLBACK_RATIONALE);
        assert_eq!(decision.goal, FALLBACK_GOAL);
    }

    #[test]
    fn test_fallback_without_owners_stops() {
        let mut report = report(&[StageId::Backend]);
        for case in &mut report.test_cases {
            case.responsible_stage.clear();
        }
        let decision = FallbackDecision.derive(&report);
        assert!(!decision.should_continue);
        assert!(decision.stages_to_rerun.is_empty());
    }

    #[test]
    fn test_decision_serializes_snake_case() {
        let decision = ManagerDecision::stop("done", DecisionOrigin::ChecksPassed);
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["origin"], "checks_passed");
        assert_eq!(json["stages_to_rerun"], serde_json::json!([]));
    }
}
