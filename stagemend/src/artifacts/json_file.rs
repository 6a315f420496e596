//! JSON files on disk.
//!
//! Each run gets its own directory under the root, so runs sharing a root
//! never overwrite each other:
//!
//! ```text
//! <run_id>/phases/01_requirements.json
//! <run_id>/phases/02_design.json
//! ...
//! <run_id>/outcome.json
//! <run_id>/backend/<files>      (code export only)
//! <run_id>/frontend/<files>     (code export only)
//! ```

use super::ArtifactStore;
use crate::core::{StageId, StageResult};
use crate::errors::ArtifactError;
use crate::pipeline::PipelineOutcome;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Writes stage results and outcomes as pretty-printed JSON.
#[derive(Debug, Clone)]
pub struct JsonFileArtifactStore {
    root: PathBuf,
    export_code: bool,
}

impl JsonFileArtifactStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            export_code: false,
        }
    }

    /// Also writes the generated code files of backend and frontend.
    #[must_use]
    pub fn with_code_export(mut self, enabled: bool) -> Self {
        self.export_code = enabled;
        self
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory holding the artifacts of `run_id`.
    #[must_use]
    pub fn run_dir(&self, run_id: Uuid) -> PathBuf {
        self.root.join(run_id.to_string())
    }

    /// Returns the phase file path for `stage` in `run_id`.
    #[must_use]
    pub fn phase_path(&self, run_id: Uuid, stage: StageId) -> PathBuf {
        self.run_dir(run_id)
            .join("phases")
            .join(format!("{:02}_{stage}.json", stage.ordinal()))
    }

    async fn write_json(path: &Path, value: &impl serde::Serialize) -> Result<(), ArtifactError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let text = serde_json::to_string_pretty(value)?;
        tokio::fs::write(path, text).await?;
        Ok(())
    }

    async fn export_files(&self, run_id: Uuid, stage: StageId, data: &Value) -> Result<(), ArtifactError> {
        let dir = self.run_dir(run_id).join(stage.as_str());
        let files = data.get("files").and_then(Value::as_array).map_or(&[][..], Vec::as_slice);

        for file in files {
            let (Some(name), Some(content)) = (
                file.get("filename").and_then(Value::as_str),
                file.get("content").and_then(Value::as_str),
            ) else {
                continue;
            };
            let relative = safe_relative_path(name)?;
            let path = dir.join(relative);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, content).await?;
            debug!(%run_id, %stage, path = %path.display(), "exported code file");
        }
        Ok(())
    }
}

/// Accepts only relative paths made of normal components.
fn safe_relative_path(name: &str) -> Result<PathBuf, ArtifactError> {
    let path = Path::new(name);
    let safe = !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if safe {
        Ok(path.to_path_buf())
    } else {
        Err(ArtifactError::UnsafePath(name.to_string()))
    }
}

#[async_trait]
impl ArtifactStore for JsonFileArtifactStore {
    async fn record_stage(&self, run_id: Uuid, stage: StageId, result: &StageResult) -> Result<(), ArtifactError> {
        Self::write_json(&self.phase_path(run_id, stage), result).await?;

        if self.export_code && matches!(stage, StageId::Backend | StageId::Frontend) {
            if let Some(data) = result.valid_data() {
                self.export_files(run_id, stage, data).await?;
            }
        }
        Ok(())
    }

    async fn record_outcome(&self, outcome: &PipelineOutcome) -> Result<(), ArtifactError> {
        Self::write_json(&self.run_dir(outcome.run_id).join("outcome.json"), outcome).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FailureKind;
    use crate::pipeline::{PipelineRun, StopReason};
    use crate::recovery::RungKind;
    use crate::testing::fixtures;
    use serde_json::json;

    #[tokio::test]
    async fn test_writes_phase_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileArtifactStore::new(dir.path());
        let result = StageResult::recovered(
            fixtures::valid_record(StageId::Requirements),
            "raw",
            RungKind::DirectParse,
        );

        let run_id = Uuid::new_v4();
        store.record_stage(run_id, StageId::Requirements, &result).await.unwrap();

        let path = dir.path().join(run_id.to_string()).join("phases/01_requirements.json");
        assert_eq!(path, store.phase_path(run_id, StageId::Requirements));
        let back: StageResult = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back, result);
    }

    #[tokio::test]
    async fn test_runs_sharing_a_root_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileArtifactStore::new(dir.path());
        let first = StageResult::failed("first", FailureKind::Structural, "no valid structure recoverable");
        let second = StageResult::failed("second", FailureKind::Semantic, "empty stories");
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        store.record_stage(a, StageId::Requirements, &first).await.unwrap();
        store.record_stage(b, StageId::Requirements, &second).await.unwrap();

        let read = |run_id| -> StageResult {
            let text = std::fs::read_to_string(store.phase_path(run_id, StageId::Requirements)).unwrap();
            serde_json::from_str(&text).unwrap()
        };
        assert_eq!(read(a).raw_text, "first");
        assert_eq!(read(b).raw_text, "second");
    }

    #[tokio::test]
    async fn test_writes_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileArtifactStore::new(dir.path());
        let outcome = PipelineRun::new("x").into_outcome(StopReason::IterationCap);

        store.record_outcome(&outcome).await.unwrap();

        let path = dir.path().join(outcome.run_id.to_string()).join("outcome.json");
        let text = std::fs::read_to_string(path).unwrap();
        let back: PipelineOutcome = serde_json::from_str(&text).unwrap();
        assert_eq!(back.run_id, outcome.run_id);
        assert_eq!(back.stop_reason, StopReason::IterationCap);
    }

    #[tokio::test]
    async fn test_code_export() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileArtifactStore::new(dir.path()).with_code_export(true);
        let data = json!({"files": [
            {"filename": "main.py", "content": "print('hi')"},
            {"filename": "static/app.js", "content": "run()"}
        ]});
        let result = StageResult::recovered(data, "raw", RungKind::DirectParse);

        let run_id = Uuid::new_v4();
        store.record_stage(run_id, StageId::Backend, &result).await.unwrap();

        let backend = store.run_dir(run_id).join("backend");
        assert_eq!(std::fs::read_to_string(backend.join("main.py")).unwrap(), "print('hi')");
        assert_eq!(std::fs::read_to_string(backend.join("static/app.js")).unwrap(), "run()");
    }

    #[tokio::test]
    async fn test_code_export_skips_failed_results() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileArtifactStore::new(dir.path()).with_code_export(true);
        let result = StageResult::failed("junk", FailureKind::Structural, "no valid structure recoverable");

        let run_id = Uuid::new_v4();
        store.record_stage(run_id, StageId::Frontend, &result).await.unwrap();
        assert!(store.phase_path(run_id, StageId::Frontend).ends_with("phases/04_frontend.json"));
        assert!(store.phase_path(run_id, StageId::Frontend).exists());
        assert!(!store.run_dir(run_id).join("frontend").exists());
    }

    #[tokio::test]
    async fn test_code_export_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileArtifactStore::new(dir.path()).with_code_export(true);
        let data = json!({"files": [{"filename": "../evil.py", "content": "x"}]});
        let result = StageResult::recovered(data, "raw", RungKind::DirectParse);

        let err = store.record_stage(Uuid::new_v4(), StageId::Backend, &result).await.unwrap_err();
        assert!(matches!(err, ArtifactError::UnsafePath(p) if p == "../evil.py"));
    }

    #[test]
    fn test_safe_relative_path() {
        assert!(safe_relative_path("src/app.py").is_ok());
        assert!(safe_relative_path("./index.html").is_ok());
        assert!(safe_relative_path("/etc/passwd").is_err());
        assert!(safe_relative_path("a/../../b").is_err());
        assert!(safe_relative_path("").is_err());
    }
}
