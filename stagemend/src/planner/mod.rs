//! The dependency closure planner.
//!
//! After a failed QA review the planner decides whether to iterate again and
//! which stages to recompute. Whatever source produced the proposal, the
//! rerun set is closed under [`StageGraph::closure`] in one place.

mod decision;
mod graph;
mod report;

pub use decision::{
    DecisionInput, DecisionOrigin, DecisionSource, FallbackDecision, GeneratedDecision,
    ManagerDecision, FALLBACK_GOAL, FALLBACK_RATIONALE,
};
pub use graph::StageGraph;
pub use report::{CheckResult, QaReport, FAIL_STATUS, PASS_STATUS};

use std::sync::Arc;
use tracing::{info, warn};

/// Rationale when the report has nothing to fix.
pub const NO_FAILURES_RATIONALE: &str = "QA report lists no failing checks";

/// Decides reruns from QA reports.
#[derive(Clone)]
pub struct ClosurePlanner {
    graph: StageGraph,
    primary: Option<Arc<dyn DecisionSource>>,
    fallback: FallbackDecision,
}

impl std::fmt::Debug for ClosurePlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosurePlanner")
            .field("graph", &self.graph)
            .field("has_primary", &self.primary.is_some())
            .finish()
    }
}

impl ClosurePlanner {
    /// Creates a planner that tries `primary` before the fallback.
    #[must_use]
    pub fn new(graph: StageGraph, primary: Arc<dyn DecisionSource>) -> Self {
        Self {
            graph,
            primary: Some(primary),
            fallback: FallbackDecision,
        }
    }

    /// Creates a planner that only uses the fallback rule.
    #[must_use]
    pub fn fallback_only(graph: StageGraph) -> Self {
        Self {
            graph,
            primary: None,
            fallback: FallbackDecision,
        }
    }

    /// Returns the graph.
    #[must_use]
    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Decides the next step for a QA report.
    ///
    /// Never fails. A report without failing checks stops the loop without
    /// consulting any source.
    pub async fn decide(&self, input: &DecisionInput<'_>) -> ManagerDecision {
        if input.report.failing_count() == 0 {
            info!(iteration = input.iteration, "no failing checks, stopping");
            return ManagerDecision::stop(NO_FAILURES_RATIONALE, DecisionOrigin::ChecksPassed);
        }

        let proposal = match &self.primary {
            Some(primary) => match primary.propose(input).await {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(iteration = input.iteration, error = %e, "decision generation failed, using fallback");
                    self.fallback.derive(input.report)
                }
            },
            None => self.fallback.derive(input.report),
        };

        let decision = self.close(proposal);
        info!(
            iteration = input.iteration,
            origin = %decision.origin,
            should_continue = decision.should_continue,
            stages = ?decision.stages_to_rerun,
            "decision made"
        );
        decision
    }

    /// Closes the rerun set and stops when it is empty.
    #[must_use]
    pub fn close(&self, mut decision: ManagerDecision) -> ManagerDecision {
        decision.stages_to_rerun = self.graph.closure(&decision.stages_to_rerun);
        if decision.stages_to_rerun.is_empty() {
            decision.should_continue = false;
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageId;
    use crate::errors::OrchestratorError;
    use crate::executor::{ExecutorConfig, RetryConfig, StageExecutor};
    use crate::schema::StageCatalog;
    use crate::testing::{fixtures, ScriptedGenerator};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn planner(generator: Arc<ScriptedGenerator>) -> ClosurePlanner {
        let executor = StageExecutor::new(generator, ExecutorConfig::default().with_backoff(RetryConfig::immediate()));
        let source = GeneratedDecision::new(executor, StageCatalog::standard().decision().clone(), 1);
        ClosurePlanner::new(StageGraph::standard(), Arc::new(source))
    }

    fn input(report: &QaReport) -> DecisionInput<'_> {
        DecisionInput {
            requirement: "todo app",
            report,
            iteration: 2,
            cap: 5,
        }
    }

    #[tokio::test]
    async fn test_unparsable_decision_falls_back_to_design_closure() {
        let generator = Arc::new(ScriptedGenerator::from_texts([
            "Let me think about this...",
            "Rerun design probably",
        ]));
        let report = QaReport::from_value(&fixtures::failing_report(&[StageId::Design, StageId::Design])).unwrap();
        assert_eq!(report.failing_count(), 2);

        let decision = planner(generator).decide(&input(&report)).await;
        assert_eq!(decision.origin, DecisionOrigin::Fallback);
        assert!(decision.should_continue);
        assert_eq!(
            decision.stages_to_rerun,
            BTreeSet::from([StageId::Design, StageId::Backend, StageId::Frontend])
        );
        assert_eq!(decision.rationale, FALLBACK_RATIONALE);
    }

    #[tokio::test]
    async fn test_zero_failures_skips_generator() {
        let generator = Arc::new(ScriptedGenerator::from_texts([
            fixtures::decision_record(true, &["design"]).to_string(),
        ]));
        let report = QaReport::from_value(&fixtures::passing_report()).unwrap();

        let decision = planner(generator.clone()).decide(&input(&report)).await;
        assert!(!decision.should_continue);
        assert_eq!(decision.origin, DecisionOrigin::ChecksPassed);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_generated_proposal_is_closed() {
        let generator = Arc::new(ScriptedGenerator::from_texts([
            fixtures::decision_record(true, &["backend"]).to_string(),
        ]));
        let report = QaReport::from_value(&fixtures::failing_report(&[StageId::Backend])).unwrap();

        let decision = planner(generator).decide(&input(&report)).await;
        assert_eq!(decision.origin, DecisionOrigin::Generated);
        assert_eq!(
            decision.stages_to_rerun,
            BTreeSet::from([StageId::Backend, StageId::Frontend])
        );
    }

    #[tokio::test]
    async fn test_empty_generated_set_stops() {
        let generator = Arc::new(ScriptedGenerator::from_texts([
            fixtures::decision_record(true, &["devops"]).to_string(),
        ]));
        let report = QaReport::from_value(&fixtures::failing_report(&[StageId::Backend])).unwrap();

        let decision = planner(generator).decide(&input(&report)).await;
        assert!(!decision.should_continue);
        assert!(decision.stages_to_rerun.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_and_primary_share_shape() {
        struct Unavailable;
        #[async_trait]
        impl DecisionSource for Unavailable {
            async fn propose(&self, _input: &DecisionInput<'_>) -> Result<ManagerDecision, OrchestratorError> {
                Err(OrchestratorError::DecisionRecoveryFailure("offline".to_string()))
            }
        }

        let report = QaReport::from_value(&fixtures::failing_report(&[StageId::Requirements])).unwrap();
        let with_primary = ClosurePlanner::new(StageGraph::standard(), Arc::new(Unavailable))
            .decide(&input(&report))
            .await;
        let fallback_only = ClosurePlanner::fallback_only(StageGraph::standard())
            .decide(&input(&report))
            .await;

        assert_eq!(with_primary, fallback_only);
        assert_eq!(with_primary.stages_to_rerun.len(), 4);
    }
}
