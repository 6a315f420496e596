//! Run state: the per-requirement state machine and its audit log.

use crate::context::PipelineContext;
use crate::core::{StageId, StageResult};
use crate::planner::{ManagerDecision, QaReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::info;
use uuid::Uuid;

/// States of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Context created, nothing executed.
    Init,
    /// Executing every build stage once.
    RunningInitial,
    /// Executing the verify stage.
    QaReview,
    /// Asking the planner what to rerun.
    Deciding,
    /// Re-executing the closed rerun set.
    SelectiveRerun,
    /// QA passed.
    Passed,
    /// Stopped without passing.
    Complete,
}

impl RunState {
    /// Returns true for the two terminal states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Complete)
    }

    /// Returns true if the machine may move from `self` to `next`.
    ///
    /// Any non-terminal state may move to `Complete`.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        use RunState::{Complete, Deciding, Init, Passed, QaReview, RunningInitial, SelectiveRerun};
        match (self, next) {
            (from, Complete) => !from.is_terminal(),
            (Init, RunningInitial)
            | (RunningInitial, QaReview)
            | (QaReview, Passed | Deciding)
            | (Deciding, SelectiveRerun)
            | (SelectiveRerun, QaReview) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::RunningInitial => write!(f, "running_initial"),
            Self::QaReview => write!(f, "qa_review"),
            Self::Deciding => write!(f, "deciding"),
            Self::SelectiveRerun => write!(f, "selective_rerun"),
            Self::Passed => write!(f, "passed"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// QA passed.
    Passed,
    /// The planner chose not to continue or had nothing to rerun.
    PlannerDeclined,
    /// The QA review cap was reached.
    IterationCap,
    /// The verify stage produced no report.
    VerifyUnavailable,
    /// Consecutive QA reports were identical.
    Stagnated,
    /// The run was cancelled.
    Cancelled,
    /// The caller's deadline elapsed.
    DeadlineExceeded,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::PlannerDeclined => write!(f, "planner_declined"),
            Self::IterationCap => write!(f, "iteration_cap"),
            Self::VerifyUnavailable => write!(f, "verify_unavailable"),
            Self::Stagnated => write!(f, "stagnated"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::DeadlineExceeded => write!(f, "deadline_exceeded"),
        }
    }
}

/// One pass of the decide step, appended to the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Position in the log, starting at 1.
    pub index: u32,
    /// The planner's decision.
    pub decision: ManagerDecision,
    /// Stages actually rerun; empty when the run stopped.
    pub resulting_stages: BTreeSet<StageId>,
    /// Hex SHA-256 of the QA report the decision was made on.
    pub report_digest: String,
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
}

/// Final result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    /// Run identifier.
    pub run_id: Uuid,
    /// Whether QA passed.
    pub passed: bool,
    /// Why the run stopped.
    pub stop_reason: StopReason,
    /// Latest result of every stage that was attempted.
    pub stage_results: BTreeMap<StageId, StageResult>,
    /// The decision audit log.
    pub iterations: Vec<IterationRecord>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl PipelineOutcome {
    /// Returns the latest result of `stage`.
    #[must_use]
    pub fn result(&self, stage: StageId) -> Option<&StageResult> {
        self.stage_results.get(&stage)
    }

    /// Returns the stages whose latest result failed.
    #[must_use]
    pub fn failed_stages(&self) -> Vec<StageId> {
        self.stage_results
            .iter()
            .filter(|(_, r)| !r.success)
            .map(|(stage, _)| *stage)
            .collect()
    }

    /// Returns the run duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Mutable state of one run.
///
/// Counters live here, so independent runs never share state.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    run_id: Uuid,
    state: RunState,
    context: PipelineContext,
    stage_results: BTreeMap<StageId, StageResult>,
    iterations: Vec<IterationRecord>,
    reviews: u32,
    last_digest: Option<String>,
    unchanged_reviews: u32,
    started_at: DateTime<Utc>,
}

impl PipelineRun {
    /// Creates a run in [`RunState::Init`] with an empty context.
    #[must_use]
    pub fn new(requirement: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: RunState::Init,
            context: PipelineContext::new(requirement),
            stage_results: BTreeMap::new(),
            iterations: Vec::new(),
            reviews: 0,
            last_digest: None,
            unchanged_reviews: 0,
            started_at: Utc::now(),
        }
    }

    /// Returns the run identifier.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Returns the context.
    #[must_use]
    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    /// Returns the latest result per stage.
    #[must_use]
    pub fn stage_results(&self) -> &BTreeMap<StageId, StageResult> {
        &self.stage_results
    }

    /// Returns the audit log.
    #[must_use]
    pub fn iterations(&self) -> &[IterationRecord] {
        &self.iterations
    }

    /// Returns the number of QA reviews performed.
    #[must_use]
    pub fn reviews(&self) -> u32 {
        self.reviews
    }

    /// Returns how many consecutive reviews produced the same report.
    #[must_use]
    pub fn unchanged_reviews(&self) -> u32 {
        self.unchanged_reviews
    }

    /// Moves to `next`.
    pub fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid transition {} -> {next}",
            self.state
        );
        info!(run_id = %self.run_id, from = %self.state, to = %next, "state transition");
        self.state = next;
    }

    /// Stores a stage result, updating the context on success.
    ///
    /// A failed result replaces the previous result but leaves the last
    /// successful data in the context.
    pub fn record_stage(&mut self, stage: StageId, result: StageResult) {
        if let Some(data) = result.valid_data() {
            self.context.record(stage, data.clone());
        }
        self.stage_results.insert(stage, result);
    }

    /// Counts a QA review and returns the report digest.
    pub fn record_review(&mut self, report: &QaReport) -> String {
        let digest = report.digest();
        self.reviews += 1;
        if self.last_digest.as_deref() == Some(digest.as_str()) {
            self.unchanged_reviews += 1;
        } else {
            self.unchanged_reviews = 1;
            self.last_digest = Some(digest.clone());
        }
        digest
    }

    /// Appends an iteration record and returns its index.
    pub fn push_iteration(
        &mut self,
        decision: ManagerDecision,
        resulting_stages: BTreeSet<StageId>,
        report_digest: String,
    ) -> u32 {
        let index = u32::try_from(self.iterations.len()).map_or(u32::MAX, |n| n + 1);
        self.iterations.push(IterationRecord {
            index,
            decision,
            resulting_stages,
            report_digest,
            timestamp: Utc::now(),
        });
        index
    }

    /// Returns true if every `stage` has succeeded at least once.
    pub fn all_succeeded(&self, mut stages: impl Iterator<Item = StageId>) -> bool {
        stages.all(|stage| self.context.has_output(stage))
    }

    /// Finishes the run and builds its outcome.
    #[must_use]
    pub fn into_outcome(mut self, reason: StopReason) -> PipelineOutcome {
        let terminal = if reason == StopReason::Passed {
            RunState::Passed
        } else {
            RunState::Complete
        };
        if self.state != terminal {
            self.advance(terminal);
        }

        PipelineOutcome {
            run_id: self.run_id,
            passed: reason == StopReason::Passed,
            stop_reason: reason,
            stage_results: self.stage_results,
            iterations: self.iterations,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FailureKind;
    use crate::planner::DecisionOrigin;
    use crate::recovery::RungKind;
    use crate::testing::fixtures;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_transitions() {
        use RunState::*;
        assert!(Init.can_advance_to(RunningInitial));
        assert!(QaReview.can_advance_to(Passed));
        assert!(SelectiveRerun.can_advance_to(QaReview));
        assert!(Deciding.can_advance_to(Complete));
        assert!(!Init.can_advance_to(QaReview));
        assert!(!Passed.can_advance_to(Complete));
        assert!(!Complete.can_advance_to(RunningInitial));
    }

    #[test]
    fn test_failed_rerun_keeps_last_success_in_context() {
        let mut run = PipelineRun::new("todo app");
        let data = fixtures::valid_record(StageId::Design);
        run.record_stage(
            StageId::Design,
            StageResult::recovered(data.clone(), "raw", RungKind::DirectParse),
        );
        run.record_stage(
            StageId::Design,
            StageResult::failed("garbage", FailureKind::Structural, "no valid structure recoverable"),
        );

        assert_eq!(run.context().output(StageId::Design), Some(&data));
        assert!(!run.stage_results()[&StageId::Design].success);
    }

    #[test]
    fn test_iteration_indices_increase() {
        let mut run = PipelineRun::new("x");
        let stop = ManagerDecision::stop("done", DecisionOrigin::Fallback);
        assert_eq!(run.push_iteration(stop.clone(), BTreeSet::new(), "a".into()), 1);
        assert_eq!(run.push_iteration(stop, BTreeSet::new(), "b".into()), 2);
        assert_eq!(
            run.iterations().iter().map(|r| r.index).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_unchanged_reviews_track_digest() {
        let mut run = PipelineRun::new("x");
        let failing = QaReport::from_value(&fixtures::failing_report(&[StageId::Backend])).unwrap();
        let other = QaReport::from_value(&fixtures::failing_report(&[StageId::Design])).unwrap();

        run.record_review(&failing);
        run.record_review(&failing);
        assert_eq!(run.unchanged_reviews(), 2);
        run.record_review(&other);
        assert_eq!(run.unchanged_reviews(), 1);
        assert_eq!(run.reviews(), 3);
    }

    #[test]
    fn test_into_outcome() {
        let mut run = PipelineRun::new("x");
        run.advance(RunState::RunningInitial);
        let outcome = run.into_outcome(StopReason::Cancelled);
        assert!(!outcome.passed);
        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        assert!(outcome.finished_at >= outcome.started_at);

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["stop_reason"], "cancelled");
    }
}
