//! Pipeline execution.
//!
//! This module provides:
//! - Orchestrator configuration
//! - The run state machine and its audit log
//! - The orchestrator that drives initial builds, QA reviews and selective reruns

mod config;
mod orchestrator;
mod run;


pub use config::OrchestratorConfig;
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use run::{IterationRecord, PipelineOutcome, PipelineRun, RunState, StopReason};
