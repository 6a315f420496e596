//! Mock generators for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::context::TASK_HEADER;
use crate::errors::GeneratorError;
use crate::generator::Generator;

/// A generator that replays a fixed script of responses in order.
///
/// Once the script is exhausted every call fails transiently.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, GeneratorError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    /// Creates a generator from a script of results.
    pub fn new(script: impl IntoIterator<Item = Result<String, GeneratorError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Creates a generator that answers with `texts` in order.
    pub fn from_texts(texts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(texts.into_iter().map(|t| Ok(t.into())))
    }

    /// Returns the number of calls made.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    /// Returns every prompt received, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError> {
        self.prompts.lock().push(prompt.to_string());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(GeneratorError::transient("script exhausted")))
    }
}

/// A generator that always fails transiently.
#[derive(Debug)]
pub struct FailingGenerator {
    message: String,
    calls: Mutex<usize>,
}

impl FailingGenerator {
    /// Creates a new failing generator.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            calls: Mutex::new(0),
        }
    }

    /// Returns the number of calls made.
    #[must_use]
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl Generator for FailingGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, GeneratorError> {
        *self.calls.lock() += 1;
        Err(GeneratorError::transient(self.message.clone()))
    }
}

/// A generator that answers per task, keyed on the prompt's task header.
///
/// Each task has its own queue. The last response queued for a task is
/// sticky and repeats once the earlier ones are consumed. Tasks without
/// responses fail transiently.
#[derive(Debug, Default)]
pub struct RoutedGenerator {
    routes: Mutex<HashMap<String, VecDeque<Result<String, GeneratorError>>>>,
    log: Mutex<Vec<(String, String)>>,
}

impl RoutedGenerator {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a text response for `task`.
    #[must_use]
    pub fn route(self, task: impl Into<String>, text: impl Into<String>) -> Self {
        self.route_result(task, Ok(text.into()))
    }

    /// Queues a result for `task`.
    #[must_use]
    pub fn route_result(self, task: impl Into<String>, result: Result<String, GeneratorError>) -> Self {
        self.routes
            .lock()
            .entry(task.into())
            .or_default()
            .push_back(result);
        self
    }

    /// Returns the tasks called, in order.
    #[must_use]
    pub fn tasks(&self) -> Vec<String> {
        self.log.lock().iter().map(|(task, _)| task.clone()).collect()
    }

    /// Returns the prompts received for `task`, in order.
    #[must_use]
    pub fn prompts_for(&self, task: &str) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|(t, _)| t == task)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }

    /// Returns how often `task` was called.
    #[must_use]
    pub fn calls_for(&self, task: &str) -> usize {
        self.log.lock().iter().filter(|(t, _)| t == task).count()
    }
}

/// Extracts the task name from a prompt's first line.
fn task_of(prompt: &str) -> String {
    prompt
        .lines()
        .next()
        .and_then(|line| line.strip_prefix(TASK_HEADER))
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Generator for RoutedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError> {
        let task = task_of(prompt);
        self.log.lock().push((task.clone(), prompt.to_string()));

        let mut routes = self.routes.lock();
        let Some(queue) = routes.get_mut(&task) else {
            return Err(GeneratorError::transient(format!("no route for task '{task}'")));
        };
        if queue.len() > 1 {
            queue
                .pop_front()
                .unwrap_or_else(|| Err(GeneratorError::transient("empty route")))
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(GeneratorError::transient("empty route")))
        }
    }
}

/// A generator that delays before delegating to an inner generator.
#[derive(Debug)]
pub struct SlowGenerator<G> {
    inner: G,
    delay: Duration,
}

impl<G: Generator> SlowGenerator<G> {
    /// Wraps `inner` with a fixed delay per call.
    #[must_use]
    pub fn new(inner: G, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<G: Generator> Generator for SlowGenerator<G> {
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError> {
        tokio::time::sleep(self.delay).await;
        self.inner.generate(prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_generator_replays_then_fails() {
        let generator = ScriptedGenerator::from_texts(["a", "b"]);
        assert_eq!(generator.generate("1").await.unwrap(), "a");
        assert_eq!(generator.generate("2").await.unwrap(), "b");
        assert!(generator.generate("3").await.is_err());
        assert_eq!(generator.calls(), 3);
        assert_eq!(generator.prompts(), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_failing_generator_counts_calls() {
        let generator = FailingGenerator::new("offline");
        assert_eq!(
            generator.generate("x").await.unwrap_err(),
            GeneratorError::Transient("offline".to_string())
        );
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_routed_generator_last_response_is_sticky() {
        let generator = RoutedGenerator::new()
            .route("design", "first")
            .route("design", "second");

        let prompt = format!("{TASK_HEADER}design\nbody");
        assert_eq!(generator.generate(&prompt).await.unwrap(), "first");
        assert_eq!(generator.generate(&prompt).await.unwrap(), "second");
        assert_eq!(generator.generate(&prompt).await.unwrap(), "second");
        assert_eq!(generator.calls_for("design"), 3);

        let other = format!("{TASK_HEADER}backend\nbody");
        assert!(generator.generate(&other).await.is_err());
        assert_eq!(generator.tasks(), vec!["design", "design", "design", "backend"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_generator_waits() {
        let generator = SlowGenerator::new(ScriptedGenerator::from_texts(["ok"]), Duration::from_secs(5));
        let start = tokio::time::Instant::now();
        assert_eq!(generator.generate("x").await.unwrap(), "ok");
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
