//! The external text generator capability.
//!
//! The orchestrator treats generation as a black box: a prompt goes in and
//! text comes out. Nothing at the type level distinguishes well-formed
//! output from malformed or truncated output.

use crate::errors::GeneratorError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Produces free text for a prompt.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generates a response to `prompt`.
    ///
    /// Errors are treated as transient and consume one retry.
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError>;
}

#[async_trait]
impl<G: Generator + ?Sized> Generator for Arc<G> {
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError> {
        (**self).generate(prompt).await
    }
}

/// A generator backed by a synchronous closure.
pub struct FnGenerator<F>
where
    F: Fn(&str) -> Result<String, GeneratorError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnGenerator<F>
where
    F: Fn(&str) -> Result<String, GeneratorError> + Send + Sync,
{
    /// Creates a new function-based generator.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }

    /// Returns the generator name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<F> fmt::Debug for FnGenerator<F>
where
    F: Fn(&str) -> Result<String, GeneratorError> + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnGenerator")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F> Generator for FnGenerator<F>
where
    F: Fn(&str) -> Result<String, GeneratorError> + Send + Sync,
{
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError> {
        (self.func)(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_generator_echoes() {
        let generator = FnGenerator::new("echo", |prompt: &str| Ok(prompt.to_uppercase()));
        assert_eq!(generator.name(), "echo");
        assert_eq!(generator.generate("hi").await.unwrap(), "HI");
    }

    #[tokio::test]
    async fn test_arc_generator_delegates() {
        let generator: Arc<dyn Generator> =
            Arc::new(FnGenerator::new("down", |_: &str| Err(GeneratorError::transient("503"))));
        let err = generator.generate("x").await.unwrap_err();
        assert_eq!(err, GeneratorError::Transient("503".to_string()));
    }

    #[tokio::test]
    async fn test_mock_generator() {
        let mut mock = MockGenerator::new();
        mock.expect_generate()
            .withf(|prompt: &str| prompt.contains("stories"))
            .times(1)
            .returning(|_| Ok("{}".to_string()));
        assert_eq!(mock.generate("write stories").await.unwrap(), "{}");
    }
}
