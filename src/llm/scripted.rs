//! Scripted LLM provider for tests.
//!
//! Compiled for unit tests and behind the `test-support` feature.

use super::LlmProvider;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// An [`LlmProvider`] that replays canned responses in order.
///
/// Every prompt is recorded. When the script runs out, calls fail with
/// [`Error::OperationFailed`]. An optional delay simulates a slow model.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedLlm {
    /// Creates a provider replaying `responses`.
    #[must_use]
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Creates a provider whose every call fails.
    #[must_use]
    pub fn failing() -> Self {
        Self::default()
    }

    /// Delays every response.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.prompts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| Error::failed("llm_complete", "script exhausted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order_then_fails() {
        let llm = ScriptedLlm::new(vec!["first".to_string(), "second".to_string()]);

        assert_eq!(llm.complete("a").await.unwrap(), "first");
        assert_eq!(llm.complete("b").await.unwrap(), "second");
        assert!(llm.complete("c").await.is_err());
        assert_eq!(llm.prompts(), vec!["a", "b", "c"]);
        assert_eq!(llm.call_count(), 3);
    }
}
