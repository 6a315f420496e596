//! The stage executor: one generator call wrapped in bounded retries.
//!
//! Each attempt sends the prompt to the generator, runs the recovery ladder
//! over the returned text and checks the profile's semantic invariants. A
//! rejected attempt feeds its diagnosis into the next prompt. When every
//! attempt is spent, one final full-ladder recovery runs over the last text
//! observed before the executor gives up.

mod backoff;

pub use backoff::{BackoffStrategy, JitterStrategy, RetryConfig};

use crate::cancellation::CancellationToken;
use crate::core::StageResult;
use crate::errors::{GeneratorError, OrchestratorError};
use crate::generator::Generator;
use crate::observability::SpanTimer;
use crate::recovery::{RecoveryLadder, RungKind};
use crate::schema::StageProfile;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Heading of the feedback section appended to a retried prompt.
pub const REJECTION_HEADING: &str = "--- PREVIOUS ATTEMPT REJECTED ---";

const STRUCTURAL_FEEDBACK: &str = "The response could not be read as a JSON document with the \
required shape. Return only the JSON document.";

/// Executor settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Per-call generator timeout. An elapsed timeout is a transient failure.
    pub generator_timeout: Option<Duration>,
    /// Delay between attempts.
    pub backoff: RetryConfig,
    /// Whether in-loop attempts may use salvage instead of retrying.
    pub salvage_during_retries: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            generator_timeout: Some(Duration::from_secs(120)),
            backoff: RetryConfig::default(),
            salvage_during_retries: false,
        }
    }
}

impl ExecutorConfig {
    /// Creates the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry bound.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the generator timeout.
    #[must_use]
    pub fn with_generator_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.generator_timeout = timeout;
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
}

/// Runs stages against a generator.
#[derive(Clone)]
pub struct StageExecutor {
    generator: Arc<dyn Generator>,
    ladder: Arc<RecoveryLadder>,
    config: ExecutorConfig,
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("ladder", &self.ladder)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StageExecutor {
    /// Creates an executor with the standard ladder.
    #[must_use]
    pub fn new(generator: Arc<dyn Generator>, config: ExecutorConfig) -> Self {
        Self {
            generator,
            ladder: Arc::new(RecoveryLadder::standard()),
            config,
        }
    }

    /// Replaces the recovery ladder.
    #[must_use]
    pub fn with_ladder(mut self, ladder: Arc<RecoveryLadder>) -> Self {
        self.ladder = ladder;
        self
    }

    /// Returns the config.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Executes `profile` with the configured retry bound.
    pub async fn execute(
        &self,
        profile: &StageProfile,
        prompt: &str,
        cancel: Option<&CancellationToken>,
    ) -> StageResult {
        self.execute_with_retries(profile, prompt, self.config.max_retries, cancel)
            .await
    }

    /// Executes `profile` with at most `max_retries + 1` generator attempts.
    ///
    /// Never fails: exhaustion yields a failed [`StageResult`] that keeps
    /// the last raw text.
    pub async fn execute_with_retries(
        &self,
        profile: &StageProfile,
        prompt: &str,
        max_retries: u32,
        cancel: Option<&CancellationToken>,
    ) -> StageResult {
        let timer = SpanTimer::start(profile.name.as_str());
        let in_loop_last = if self.config.salvage_during_retries {
            RungKind::Salvage
        } else {
            RungKind::TruncationRepair
        };

        let mut feedback: Option<String> = None;
        let mut last_raw: Option<String> = None;
        let mut last_failure = OrchestratorError::from(GeneratorError::transient("no attempt was made"));
        let mut attempts = 0u32;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                if let Err(cancelled) = cancel.map_or(Ok(()), CancellationToken::check) {
                    info!(stage = %profile.name, attempt, reason = %cancelled, "cancelled between attempts");
                    if last_raw.is_none() {
                        last_failure = cancelled;
                    }
                    break;
                }
                let delay = self.config.backoff.delay_for(attempt - 1);
                if !delay.is_zero() {
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    debug!(stage = %profile.name, delay_ms, "backing off");
                    tokio::time::sleep(delay).await;
                }
            }
            attempts = attempt + 1;

            let full_prompt = with_feedback(prompt, feedback.as_deref());
            let text = match self.call_generator(&full_prompt).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(stage = %profile.name, attempt = attempts, error = %e, "generator call failed");
                    last_failure = e.into();
                    continue;
                }
            };

            let result = self.ladder.recover_up_to(&text, &profile.schema, in_loop_last);
            last_raw = Some(text);

            let rejection = match result.valid_data() {
                None => OrchestratorError::StructuralParseFailure {
                    schema: profile.schema.name.clone(),
                    detail: "no valid structure recoverable".to_string(),
                },
                Some(data) => match profile.check(data) {
                    Ok(()) => {
                        info!(
                            stage = %profile.name,
                            attempt = attempts,
                            rung = ?result.recovered_by,
                            duration_ms = timer.elapsed_ms(),
                            "stage succeeded"
                        );
                        return result.with_attempts(attempts);
                    }
                    Err(violation) => violation.into(),
                },
            };

            warn!(stage = %profile.name, attempt = attempts, error = %rejection, "attempt rejected");
            feedback = Some(rejection_feedback(&rejection));
            let retryable = rejection.is_retryable();
            last_failure = rejection;
            if !retryable {
                break;
            }
        }

        let Some(raw) = last_raw else {
            warn!(stage = %profile.name, attempts, "no response text observed");
            return StageResult::failed(String::new(), last_failure.failure_kind(), last_failure.to_string())
                .with_attempts(attempts);
        };

        let result = self.ladder.recover(&raw, &profile.schema);
        if let Some(data) = result.valid_data() {
            match profile.check(data) {
                Ok(()) => {
                    info!(
                        stage = %profile.name,
                        attempts,
                        rung = ?result.recovered_by,
                        "final recovery succeeded"
                    );
                    return result.with_attempts(attempts);
                }
                Err(violation) => last_failure = violation.into(),
            }
        }

        let kind = last_failure.failure_kind();
        warn!(
            stage = %profile.name,
            attempts,
            failure = %kind,
            duration_ms = timer.finish(),
            "stage exhausted"
        );
        StageResult::failed(raw, kind, format!("failed after {attempts} attempts: {last_failure}"))
            .with_attempts(attempts)
    }

    async fn call_generator(&self, prompt: &str) -> Result<String, GeneratorError> {
        match self.config.generator_timeout {
            Some(limit) => tokio::time::timeout(limit, self.generator.generate(prompt))
                .await
                .unwrap_or_else(|_| {
                    Err(GeneratorError::Timeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)))
                }),
            None => self.generator.generate(prompt).await,
        }
    }
}

/// The diagnosis fed into the next prompt after a rejected attempt.
fn rejection_feedback(rejection: &OrchestratorError) -> String {
    match rejection {
        OrchestratorError::SemanticInvariantViolation(violation) => violation.description.clone(),
        _ => STRUCTURAL_FEEDBACK.to_string(),
    }
}

/// Appends the rejection feedback section to a prompt.
#[must_use]
pub fn with_feedback(prompt: &str, feedback: Option<&str>) -> String {
    match feedback {
        Some(feedback) => format!(
            "{prompt}\n\n{REJECTION_HEADING}\n{feedback}\nReturn a corrected JSON document that fixes this."
        ),
        None => prompt.to_string(),
    }
}
