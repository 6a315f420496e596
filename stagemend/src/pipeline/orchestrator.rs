//! The run loop: initial build, QA review, decide, selective rerun.

use super::config::OrchestratorConfig;
use super::run::{PipelineOutcome, PipelineRun, RunState, StopReason};
use crate::artifacts::{ArtifactStore, NoOpArtifactStore};
use crate::cancellation::CancellationToken;
use crate::context::{assemble_prompt, ContextBuilder, RerunFeedback};
use crate::core::{StageId, StageResult};
use crate::errors::OrchestratorError;
use crate::executor::StageExecutor;
use crate::generator::Generator;
use crate::observability::SpanTimer;
use crate::planner::{
    ClosurePlanner, DecisionInput, DecisionSource, GeneratedDecision, QaReport, StageGraph,
};
use crate::recovery::RecoveryLadder;
use crate::schema::StageCatalog;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Drives pipeline runs.
pub struct Orchestrator {
    executor: StageExecutor,
    catalog: StageCatalog,
    graph: StageGraph,
    planner: ClosurePlanner,
    context_builder: ContextBuilder,
    store: Arc<dyn ArtifactStore>,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("graph", &self.graph)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    generator: Arc<dyn Generator>,
    config: OrchestratorConfig,
    catalog: StageCatalog,
    graph: StageGraph,
    ladder: Option<Arc<RecoveryLadder>>,
    store: Arc<dyn ArtifactStore>,
    decision_source: Option<Arc<dyn DecisionSource>>,
}

impl OrchestratorBuilder {
    /// Starts a builder with standard catalog, graph and ladder.
    #[must_use]
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            config: OrchestratorConfig::default(),
            catalog: StageCatalog::standard(),
            graph: StageGraph::standard(),
            ladder: None,
            store: Arc::new(NoOpArtifactStore),
            decision_source: None,
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the stage catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: StageCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Sets the stage graph.
    #[must_use]
    pub fn with_graph(mut self, graph: StageGraph) -> Self {
        self.graph = graph;
        self
    }

    /// Replaces the recovery ladder.
    #[must_use]
    pub fn with_ladder(mut self, ladder: RecoveryLadder) -> Self {
        self.ladder = Some(Arc::new(ladder));
        self
    }

    /// Sets the artifact store.
    #[must_use]
    pub fn with_artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = store;
        self
    }

    /// Replaces the primary decision source.
    #[must_use]
    pub fn with_decision_source(mut self, source: Arc<dyn DecisionSource>) -> Self {
        self.decision_source = Some(source);
        self
    }

    /// Validates the configuration and builds the orchestrator.
    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        self.config.validate()?;

        let mut executor = StageExecutor::new(self.generator, self.config.executor_config());
        if let Some(ladder) = self.ladder {
            executor = executor.with_ladder(ladder);
        }

        let source: Arc<dyn DecisionSource> = match self.decision_source {
            Some(source) => source,
            None => Arc::new(GeneratedDecision::new(
                executor.clone(),
                self.catalog.decision().clone(),
                self.config.decision_max_retries,
            )),
        };
        let planner = ClosurePlanner::new(self.graph.clone(), source);

        Ok(Orchestrator {
            executor,
            catalog: self.catalog,
            graph: self.graph,
            planner,
            context_builder: ContextBuilder::new(self.config.context_budget_chars),
            store: self.store,
            config: self.config,
        })
    }
}

impl Orchestrator {
    /// Starts a builder.
    #[must_use]
    pub fn builder(generator: Arc<dyn Generator>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(generator)
    }

    /// Creates an orchestrator with standard collaborators.
    pub fn new(generator: Arc<dyn Generator>, config: OrchestratorConfig) -> Result<Self, OrchestratorError> {
        Self::builder(generator).with_config(config).build()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Runs the pipeline for `requirement` to completion.
    pub async fn run_pipeline(&self, requirement: &str) -> PipelineOutcome {
        self.run_pipeline_with_cancel(requirement, &CancellationToken::new())
            .await
    }

    /// Runs the pipeline, stopping at the next stage boundary once `cancel` fires.
    pub async fn run_pipeline_with_cancel(
        &self,
        requirement: &str,
        cancel: &CancellationToken,
    ) -> PipelineOutcome {
        let mut run = PipelineRun::new(requirement);
        let reason = self.drive(&mut run, cancel).await;
        self.finish(run, reason).await
    }

    /// Runs the pipeline under a hard deadline.
    ///
    /// When the deadline elapses the in-flight call is abandoned. The state
    /// reached so far is persisted and returned.
    pub async fn run_pipeline_with_deadline(&self, requirement: &str, deadline: Duration) -> PipelineOutcome {
        let cancel = CancellationToken::new();
        let mut run = PipelineRun::new(requirement);
        let finished = tokio::time::timeout(deadline, self.drive(&mut run, &cancel)).await;
        let reason = match finished {
            Ok(reason) => reason,
            Err(_) => {
                let deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
                warn!(run_id = %run.run_id(), deadline_ms, "deadline exceeded");
                StopReason::DeadlineExceeded
            }
        };
        self.finish(run, reason).await
    }

    async fn drive(&self, run: &mut PipelineRun, cancel: &CancellationToken) -> StopReason {
        let run_id = run.run_id();
        let cap = self.config.max_iterations;
        let build_stages: Vec<StageId> = self.graph.build_order().collect();

        run.advance(RunState::RunningInitial);
        for &stage in &build_stages {
            if let Err(cancelled) = cancel.check() {
                info!(%run_id, reason = %cancelled, "stopping at stage boundary");
                return StopReason::Cancelled;
            }
            self.run_stage(run, stage, None, cancel).await;
        }

        loop {
            if let Err(cancelled) = cancel.check() {
                info!(%run_id, reason = %cancelled, "stopping at stage boundary");
                return StopReason::Cancelled;
            }

            run.advance(RunState::QaReview);
            let verify = self.run_stage(run, StageId::Verify, None, cancel).await;
            let report = match verify.valid_data().map(QaReport::from_value) {
                Some(Ok(report)) => report,
                Some(Err(e)) => {
                    warn!(%run_id, error = %e, "verify record is not a report");
                    return StopReason::VerifyUnavailable;
                }
                None => {
                    warn!(%run_id, "verify stage produced no report");
                    return StopReason::VerifyUnavailable;
                }
            };
            let digest = run.record_review(&report);
            let iteration = run.reviews();

            if report.all_checks_pass() && run.all_succeeded(build_stages.iter().copied()) {
                info!(%run_id, iteration, "QA passed");
                run.advance(RunState::Passed);
                return StopReason::Passed;
            }
            info!(%run_id, iteration, failing = report.failing_count(), "QA did not pass");

            if iteration >= cap {
                info!(%run_id, iteration, cap, "iteration cap reached");
                return StopReason::IterationCap;
            }
            if let Some(limit) = self.config.stagnation_limit {
                if run.unchanged_reviews() >= limit {
                    info!(%run_id, iteration, limit, "QA report unchanged, stopping");
                    return StopReason::Stagnated;
                }
            }

            run.advance(RunState::Deciding);
            let decision = self
                .planner
                .decide(&DecisionInput {
                    requirement: run.context().requirement(),
                    report: &report,
                    iteration,
                    cap,
                })
                .await;

            if !decision.should_continue {
                run.push_iteration(decision, Default::default(), digest);
                return StopReason::PlannerDeclined;
            }

            let rerun = self.graph.ordered(&decision.stages_to_rerun);
            let goal = decision.goal.clone();
            run.push_iteration(decision.clone(), decision.stages_to_rerun, digest);

            run.advance(RunState::SelectiveRerun);
            for stage in rerun {
                if let Err(cancelled) = cancel.check() {
                    info!(%run_id, reason = %cancelled, "stopping at stage boundary");
                    return StopReason::Cancelled;
                }
                let feedback = RerunFeedback::new(goal.clone(), report.feedback_for(stage));
                self.run_stage(run, stage, Some(&feedback), cancel).await;
            }
        }
    }

    async fn run_stage(
        &self,
        run: &mut PipelineRun,
        stage: StageId,
        feedback: Option<&RerunFeedback>,
        cancel: &CancellationToken,
    ) -> StageResult {
        let timer = SpanTimer::start(stage.as_str());
        let profile = self.catalog.profile(stage);
        let context = self.context_builder.build(stage, &self.graph, run.context(), feedback);
        let prompt = assemble_prompt(profile, &context);

        let result = self.executor.execute(profile, &prompt, Some(cancel)).await;
        if result.success {
            info!(
                run_id = %run.run_id(),
                %stage,
                attempts = result.attempts,
                rung = ?result.recovered_by,
                duration_ms = timer.finish(),
                "stage completed"
            );
        } else {
            warn!(
                run_id = %run.run_id(),
                %stage,
                attempts = result.attempts,
                error = result.error_detail.as_deref().unwrap_or_default(),
                raw_sha256 = %result.raw_digest(),
                duration_ms = timer.finish(),
                "stage failed"
            );
        }

        if let Err(e) = self.store.record_stage(run.run_id(), stage, &result).await {
            warn!(run_id = %run.run_id(), %stage, error = %e, "failed to record stage artifact");
        }
        run.record_stage(stage, result.clone());
        result
    }

    async fn finish(&self, run: PipelineRun, reason: StopReason) -> PipelineOutcome {
        let outcome = run.into_outcome(reason);
        info!(
            run_id = %outcome.run_id,
            passed = outcome.passed,
            stop_reason = %outcome.stop_reason,
            iterations = outcome.iterations.len(),
            duration_ms = outcome.duration_ms(),
            "run finished"
        );
        if let Err(e) = self.store.record_outcome(&outcome).await {
            warn!(run_id = %outcome.run_id, error = %e, "failed to record outcome");
        }
        outcome
    }
}
