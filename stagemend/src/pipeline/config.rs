//! Orchestrator configuration.

use crate::context::DEFAULT_CONTEXT_BUDGET;
use crate::errors::ConfigError;
use crate::executor::{ExecutorConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Retries per stage after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Maximum number of QA reviews, counting the initial one.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Retries for the decision call.
    #[serde(default = "default_decision_max_retries")]
    pub decision_max_retries: u32,
    /// Per-call generator timeout in seconds. Zero disables the timeout.
    #[serde(default = "default_generator_timeout_secs")]
    pub generator_timeout_secs: u64,
    /// Delay between attempts.
    #[serde(default)]
    pub backoff: RetryConfig,
    /// Whether in-loop attempts may salvage instead of retrying.
    #[serde(default)]
    pub salvage_during_retries: bool,
    /// Per-section character budget for stage context.
    #[serde(default = "default_context_budget_chars")]
    pub context_budget_chars: usize,
    /// Stop after this many consecutive identical QA reports.
    #[serde(default)]
    pub stagnation_limit: Option<u32>,
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_iterations() -> u32 {
    5
}

fn default_decision_max_retries() -> u32 {
    1
}

fn default_generator_timeout_secs() -> u64 {
    120
}

fn default_context_budget_chars() -> usize {
    DEFAULT_CONTEXT_BUDGET
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_iterations: default_max_iterations(),
            decision_max_retries: default_decision_max_retries(),
            generator_timeout_secs: default_generator_timeout_secs(),
            backoff: RetryConfig::default(),
            salvage_during_retries: false,
            context_budget_chars: default_context_budget_chars(),
            stagnation_limit: None,
        }
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON and validates it.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file and validates it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::invalid("max_iterations", "must be at least 1"));
        }
        if self.context_budget_chars == 0 {
            return Err(ConfigError::invalid("context_budget_chars", "must be positive"));
        }
        if self.stagnation_limit.is_some_and(|limit| limit < 2) {
            return Err(ConfigError::invalid("stagnation_limit", "must be at least 2 when set"));
        }
        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return Err(ConfigError::invalid("backoff.max_delay_ms", "must not be below base_delay_ms"));
        }
        Ok(())
    }

    /// Sets the per-stage retry bound.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the QA review cap.
    #[must_use]
    pub fn with_max_iterations(mut self, iterations: u32) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Sets the decision retry bound.
    #[must_use]
    pub fn with_decision_max_retries(mut self, retries: u32) -> Self {
        self.decision_max_retries = retries;
        self
    }

    /// Sets the generator timeout in seconds.
    #[must_use]
    pub fn with_generator_timeout_secs(mut self, secs: u64) -> Self {
        self.generator_timeout_secs = secs;
        self
    }

    /// Sets the backoff between attempts.
    #[must_use]
    pub fn with_backoff(mut self, backoff: RetryConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Lets in-loop attempts use salvage.
    #[must_use]
    pub fn with_salvage_during_retries(mut self, enabled: bool) -> Self {
        self.salvage_during_retries = enabled;
        self
    }

    /// Sets the context budget.
    #[must_use]
    pub fn with_context_budget_chars(mut self, chars: usize) -> Self {
        self.context_budget_chars = chars;
        self
    }

    /// Enables the stagnation stop.
    #[must_use]
    pub fn with_stagnation_limit(mut self, limit: Option<u32>) -> Self {
        self.stagnation_limit = limit;
        self
    }

    /// Returns the generator timeout, if enabled.
    #[must_use]
    pub fn generator_timeout(&self) -> Option<Duration> {
        (self.generator_timeout_secs > 0).then(|| Duration::from_secs(self.generator_timeout_secs))
    }

    /// Derives the stage executor settings.
    #[must_use]
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::new()
            .with_max_retries(self.max_retries)
            .with_generator_timeout(self.generator_timeout())
            .with_backoff(self.backoff.clone())
            .with_salvage_during_retries(self.salvage_during_retries)
    }
}
