//! # Stagemend
//!
//! A resilient stage orchestrator for pipelines whose stages are produced by
//! an unreliable text generator.
//!
//! Stagemend runs a fixed chain of stages (requirements, design, backend,
//! frontend, verify) and provides:
//!
//! - **Structured recovery**: a five-rung ladder that turns malformed,
//!   wrapped or truncated generator text into schema-valid records
//! - **Bounded retries**: per-stage retries with backoff, rejection feedback
//!   and a salvage pass on the last attempt
//! - **Dependency-aware reruns**: QA failures are mapped to owning stages and
//!   closed over the stage graph before anything is rerun
//! - **Auditable runs**: every decision is logged with the digest of the
//!   report it was made on, and artifacts go to a pluggable store
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagemend::prelude::*;
//!
//! let orchestrator = Orchestrator::builder(Arc::new(my_generator))
//!     .with_config(OrchestratorConfig::from_path("stagemend.json")?)
//!     .with_artifact_store(Arc::new(JsonFileArtifactStore::new("out")))
//!     .build()?;
//!
//! let outcome = orchestrator.run_pipeline("Build a todo app").await;
//! println!("{}: {}", outcome.passed, outcome.stop_reason);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod artifacts;
pub mod cancellation;
pub mod context;
pub mod core;
pub mod errors;
pub mod executor;
pub mod generator;
pub mod observability;
pub mod pipeline;
pub mod planner;
pub mod recovery;
pub mod schema;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::artifacts::{
        ArtifactStore, InMemoryArtifactStore, JsonFileArtifactStore, LoggingArtifactStore,
        NoOpArtifactStore,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::core::{FailureKind, StageId, StageResult};
    pub use crate::errors::{
        ArtifactError, ConfigError, GeneratorError, GraphError, OrchestratorError,
    };
    pub use crate::executor::{RetryConfig, StageExecutor};
    pub use crate::generator::{FnGenerator, Generator};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        Orchestrator, OrchestratorConfig, PipelineOutcome, RunState, StopReason,
    };
    pub use crate::planner::{ManagerDecision, QaReport, StageGraph};
    pub use crate::recovery::{RecoveryLadder, RungKind};
    pub use crate::schema::{SchemaDescriptor, StageCatalog, StageProfile};
}
