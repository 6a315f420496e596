//! Artifact store trait and implementations.
//!
//! The orchestrator hands every stage result and the final outcome to an
//! [`ArtifactStore`]. Store errors are logged and suppressed by the caller;
//! persistence never decides the fate of a run.

mod json_file;

pub use json_file::JsonFileArtifactStore;

use crate::core::{StageId, StageResult};
use crate::errors::ArtifactError;
use crate::pipeline::PipelineOutcome;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, Level};
use uuid::Uuid;

/// Receives stage results and run outcomes.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Records the latest result of `stage`.
    async fn record_stage(
        &self,
        run_id: Uuid,
        stage: StageId,
        result: &StageResult,
    ) -> Result<(), ArtifactError>;

    /// Records the final outcome, including the iteration log.
    async fn record_outcome(&self, outcome: &PipelineOutcome) -> Result<(), ArtifactError>;
}

/// A store that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpArtifactStore;

#[async_trait]
impl ArtifactStore for NoOpArtifactStore {
    async fn record_stage(&self, _run_id: Uuid, _stage: StageId, _result: &StageResult) -> Result<(), ArtifactError> {
        Ok(())
    }

    async fn record_outcome(&self, _outcome: &PipelineOutcome) -> Result<(), ArtifactError> {
        Ok(())
    }
}

/// A store that logs artifacts through tracing.
#[derive(Debug, Clone)]
pub struct LoggingArtifactStore {
    level: Level,
}

impl Default for LoggingArtifactStore {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingArtifactStore {
    /// Creates a logging store at `level`. Anything but DEBUG logs at info.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging store.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

#[async_trait]
impl ArtifactStore for LoggingArtifactStore {
    async fn record_stage(&self, run_id: Uuid, stage: StageId, result: &StageResult) -> Result<(), ArtifactError> {
        let raw_sha256 = result.raw_digest();
        if self.level == Level::DEBUG {
            debug!(%run_id, %stage, success = result.success, attempts = result.attempts, %raw_sha256, "stage artifact");
        } else {
            info!(%run_id, %stage, success = result.success, attempts = result.attempts, %raw_sha256, "stage artifact");
        }
        Ok(())
    }

    async fn record_outcome(&self, outcome: &PipelineOutcome) -> Result<(), ArtifactError> {
        let run_id = outcome.run_id;
        let iterations = outcome.iterations.len();
        if self.level == Level::DEBUG {
            debug!(%run_id, passed = outcome.passed, stop_reason = %outcome.stop_reason, iterations, "run outcome");
        } else {
            info!(%run_id, passed = outcome.passed, stop_reason = %outcome.stop_reason, iterations, "run outcome");
        }
        Ok(())
    }
}

/// A store that keeps artifacts in memory, for tests.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    stages: RwLock<Vec<(Uuid, StageId, StageResult)>>,
    outcomes: RwLock<Vec<PipelineOutcome>>,
}

impl InMemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every recorded stage result, in order.
    #[must_use]
    pub fn stage_records(&self) -> Vec<(Uuid, StageId, StageResult)> {
        self.stages.read().clone()
    }

    /// Returns the stages recorded, in order.
    #[must_use]
    pub fn stage_sequence(&self) -> Vec<StageId> {
        self.stages.read().iter().map(|(_, stage, _)| *stage).collect()
    }

    /// Returns every recorded outcome.
    #[must_use]
    pub fn outcomes(&self) -> Vec<PipelineOutcome> {
        self.outcomes.read().clone()
    }

    /// Clears all records.
    pub fn clear(&self) {
        self.stages.write().clear();
        self.outcomes.write().clear();
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn record_stage(&self, run_id: Uuid, stage: StageId, result: &StageResult) -> Result<(), ArtifactError> {
        self.stages.write().push((run_id, stage, result.clone()));
        Ok(())
    }

    async fn record_outcome(&self, outcome: &PipelineOutcome) -> Result<(), ArtifactError> {
        self.outcomes.write().push(outcome.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineRun;
    use crate::pipeline::StopReason;
    use crate::recovery::RungKind;
    use serde_json::json;

    fn result() -> StageResult {
        StageResult::recovered(json!({"files": []}), "{}", RungKind::DirectParse)
    }

    #[tokio::test]
    async fn test_noop_and_logging_stores_accept_everything() {
        let outcome = PipelineRun::new("x").into_outcome(StopReason::Cancelled);
        let stores: Vec<Box<dyn ArtifactStore>> = vec![
            Box::new(NoOpArtifactStore),
            Box::new(LoggingArtifactStore::default()),
            Box::new(LoggingArtifactStore::debug()),
        ];
        for store in stores {
            store.record_stage(Uuid::new_v4(), StageId::Design, &result()).await.unwrap();
            store.record_outcome(&outcome).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_in_memory_store_records_in_order() {
        let store = InMemoryArtifactStore::new();
        let run_id = Uuid::new_v4();
        store.record_stage(run_id, StageId::Requirements, &result()).await.unwrap();
        store.record_stage(run_id, StageId::Design, &result()).await.unwrap();
        store
            .record_outcome(&PipelineRun::new("x").into_outcome(StopReason::IterationCap))
            .await
            .unwrap();

        assert_eq!(store.stage_sequence(), vec![StageId::Requirements, StageId::Design]);
        assert_eq!(store.stage_records()[0].0, run_id);
        assert_eq!(store.outcomes()[0].stop_reason, StopReason::IterationCap);

        store.clear();
        assert!(store.stage_records().is_empty());
    }
}
