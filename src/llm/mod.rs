//! LLM client abstraction.
//!
//! The memory engine treats the language model as a black-box text
//! generator. Callers supply an [`LlmProvider`]; the engine bounds every call
//! with [`complete_within`] and parses structured answers with
//! [`extract_json_from_response`].

#[cfg(any(test, feature = "test-support"))]
mod scripted;

#[cfg(any(test, feature = "test-support"))]
pub use scripted::ScriptedLlm;

use crate::{Error, Result};
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// The provider name, used as a metrics label.
    fn name(&self) -> &'static str;

    /// Generates a completion for the given prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the completion fails.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Generates a completion with a system prompt.
    ///
    /// Default implementation concatenates system and user prompts.
    /// Providers should override this to use native system prompt support.
    ///
    /// # Errors
    ///
    /// Returns an error if the completion fails.
    async fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        let combined = format!("{system}\n\n---\n\nUser message:\n{user}");
        self.complete(&combined).await
    }
}

/// Runs one completion bounded by `timeout`, recording request metrics.
///
/// `operation` labels the metrics (`resolution`, `extraction`, `summary`).
///
/// # Errors
///
/// Returns [`Error::Timeout`] when the budget expires, otherwise the
/// provider's error.
pub async fn complete_within(
    llm: &dyn LlmProvider,
    operation: &'static str,
    system: &str,
    user: &str,
    timeout: Duration,
) -> Result<String> {
    let start = Instant::now();
    let outcome = tokio::time::timeout(timeout, llm.complete_with_system(system, user)).await;
    let elapsed = start.elapsed();

    let (status, result) = match outcome {
        Ok(Ok(text)) => ("success", Ok(text)),
        Ok(Err(err)) => ("error", Err(err)),
        Err(_) => (
            "timeout",
            Err(Error::Timeout {
                operation: format!("llm_{operation}"),
                after: timeout,
            }),
        ),
    };

    metrics::counter!(
        "llm_requests_total",
        "provider" => llm.name(),
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "llm_request_duration_ms",
        "provider" => llm.name(),
        "operation" => operation,
        "status" => status
    )
    .record(elapsed.as_secs_f64() * 1000.0);

    result
}

/// Extracts the JSON payload from an LLM response.
///
/// Handles fenced code blocks (with or without a `json` marker) and prose
/// around a bare object or array. Whichever of `{` or `[` appears first
/// decides the payload kind. Returns the trimmed input when nothing
/// JSON-like is found.
#[must_use]
pub fn extract_json_from_response(response: &str) -> &str {
    let trimmed = response.trim();

    let body = match trimmed.find("```") {
        Some(fence) => {
            let after = &trimmed[fence + 3..];
            let after = after.strip_prefix("json").unwrap_or(after);
            after.find("```").map_or(after, |end| &after[..end]).trim()
        },
        None => trimmed,
    };

    let first_object = body.find('{');
    let first_array = body.find('[');
    let (open, close) = match (first_object, first_array) {
        (Some(o), Some(a)) if a < o => ('[', ']'),
        (Some(_), _) => ('{', '}'),
        (None, Some(_)) => ('[', ']'),
        (None, None) => return body,
    };

    match (body.find(open), body.rfind(close)) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => body,
    }
}
