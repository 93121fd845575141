//! LLM transport capability.
//!
//! The pipeline owns no transport globals: everything that talks to a
//! model goes through the [`LlmClient`] trait, and implementations (an
//! OpenAI-compatible HTTP client for local and cloud streams, a scripted
//! mock for tests) are interchangeable behind it. Calls carry explicit
//! deadlines and yield typed failures.

pub mod mock;
pub mod openai_compat;

pub use mock::MockClient;
pub use openai_compat::OpenAiCompatClient;

use crate::core::TokenUsage;
use crate::error::TransportError;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// System-level instructions.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Role of the sender.
    pub role: Role,
    /// Plain UTF-8 content.
    pub content: String,
}

impl ChatMessage {
    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Input to an LLM invocation.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Ordered conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Whether to request strict JSON output from the provider.
    pub json_output: bool,
    /// Per-call deadline.
    pub deadline: Duration,
}

impl ChatRequest {
    /// Creates a JSON-output request.
    #[must_use]
    pub fn json(model: &str, messages: Vec<ChatMessage>, deadline: Duration) -> Self {
        Self {
            model: model.to_string(),
            messages,
            json_output: true,
            deadline,
        }
    }
}

/// Output of an LLM invocation: the parsed JSON value plus usage if the
/// provider reported it.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// Parsed structured output.
    pub value: serde_json::Value,
    /// Token usage, when reported.
    pub usage: Option<TokenUsage>,
}

/// Capability trait for LLM transports.
///
/// Implementations must honor the request deadline and map every failure
/// into a typed [`TransportError`].
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Sends a chat request and returns parsed structured output.
    ///
    /// # Errors
    ///
    /// Returns a typed transport error on timeout, HTTP failure, provider
    /// rejection, or unparseable output.
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome, TransportError>;

    /// Provider name for logs and observability.
    fn provider(&self) -> &str;
}

/// Selects a transport implementation by provider name.
///
/// # Errors
///
/// Returns [`TransportError::UnknownProvider`] for unrecognized names.
pub fn create_client(
    provider: &str,
    base_url: &str,
    api_key: &str,
) -> Result<Arc<dyn LlmClient>, TransportError> {
    match provider {
        "openai-compat" => Ok(Arc::new(OpenAiCompatClient::new(base_url, api_key))),
        name => Err(TransportError::UnknownProvider {
            name: name.to_string(),
        }),
    }
}

/// Calls the client with bounded retries and doubling backoff.
///
/// Every transport failure kind is retried except an unknown provider;
/// model-output parse failures get the same treatment as transport
/// failures once the single coercion pass has not helped.
///
/// # Errors
///
/// Returns [`TransportError::RetriesExhausted`] carrying the last error
/// once `max_retries` attempts have failed.
pub async fn chat_with_retry(
    client: &dyn LlmClient,
    request: ChatRequest,
    max_retries: u32,
    backoff_ms: u64,
) -> Result<ChatOutcome, TransportError> {
    let attempts = max_retries.max(1);
    let mut last_error = String::new();

    for attempt in 0..attempts {
        if attempt > 0 {
            let backoff = backoff_ms.saturating_mul(1_u64 << (attempt - 1).min(16));
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }
        match client.chat(request.clone()).await {
            Ok(outcome) => return Ok(outcome),
            Err(err @ TransportError::UnknownProvider { .. }) => return Err(err),
            Err(err) => {
                tracing::warn!(
                    provider = client.provider(),
                    model = %request.model,
                    attempt = attempt + 1,
                    error = %err,
                    "LLM call failed"
                );
                last_error = err.to_string();
            }
        }
    }

    Err(TransportError::RetriesExhausted {
        attempts,
        last: last_error,
    })
}

/// Extracts a JSON value from raw model text.
///
/// Strips Markdown code fences and leading prose, then parses the first
/// JSON object or array found. Providers that ignore the JSON response
/// format still usually wrap valid JSON this way.
///
/// # Errors
///
/// Returns [`TransportError::SchemaParse`] if no JSON value can be found.
pub fn parse_json_response(raw: &str) -> Result<serde_json::Value, TransportError> {
    let trimmed = raw.trim();

    // Fast path: the whole body is JSON.
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    // Strip ```json ... ``` fences.
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```")
            && let Ok(value) = serde_json::from_str(after[..end].trim())
        {
            return Ok(value);
        }
    }

    // Last resort: first brace/bracket onward, tolerating trailing prose.
    for open in ['{', '['] {
        if let Some(start) = trimmed.find(open) {
            let mut deserializer = serde_json::Deserializer::from_str(&trimmed[start..]);
            if let Ok(value) =
                <serde_json::Value as serde::Deserialize>::deserialize(&mut deserializer)
            {
                return Ok(value);
            }
        }
    }

    let preview: String = trimmed.chars().take(120).collect();
    Err(TransportError::SchemaParse(format!(
        "no JSON value in model output: {preview}"
    )))
}

/// Thread-safe accumulator for transport-reported token usage.
#[derive(Debug, Default)]
pub struct UsageTracker {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    calls: AtomicU64,
}

impl UsageTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records usage from one call; absent usage still counts the call.
    pub fn record(&self, usage: Option<TokenUsage>) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(usage) = usage {
            self.prompt_tokens
                .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
            self.completion_tokens
                .fetch_add(usage.completion_tokens, Ordering::Relaxed);
        }
    }

    /// Returns the accumulated totals.
    #[must_use]
    pub fn snapshot(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            calls: self.calls.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_constructors() {
        assert_eq!(ChatMessage::system("s").role, Role::System);
        assert_eq!(ChatMessage::user("u").role, Role::User);
        assert_eq!(ChatMessage::assistant("a").role, Role::Assistant);
    }

    #[test]
    fn test_parse_json_plain() {
        let value = parse_json_response(r#"{"a": 1}"#).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_parse_json_fenced() {
        let raw = "Here is the result:\n```json\n{\"a\": 1}\n```\nDone.";
        let value = parse_json_response(raw).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_parse_json_with_leading_prose() {
        let raw = "Sure! [0, 1, 0]";
        let value = parse_json_response(raw).unwrap();
        assert_eq!(value, json!([0, 1, 0]));
    }

    #[test]
    fn test_parse_json_trailing_prose() {
        let raw = r#"{"score": 0.9} I hope this helps!"#;
        let value = parse_json_response(raw).unwrap();
        assert_eq!(value, json!({"score": 0.9}));
    }

    #[test]
    fn test_parse_json_garbage_rejected() {
        let result = parse_json_response("no structure here at all");
        assert!(matches!(result, Err(TransportError::SchemaParse(_))));
    }

    #[test]
    fn test_usage_tracker() {
        let tracker = UsageTracker::new();
        tracker.record(Some(TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 30,
            calls: 1,
        }));
        tracker.record(None);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.prompt_tokens, 100);
        assert_eq!(snapshot.completion_tokens, 30);
        assert_eq!(snapshot.calls, 2);
    }

    #[test]
    fn test_create_client_unknown_provider() {
        let result = create_client("carrier-pigeon", "", "");
        assert!(matches!(
            result,
            Err(TransportError::UnknownProvider { .. })
        ));
    }

    #[tokio::test]
    async fn test_retry_returns_first_success() {
        let mock = MockClient::new();
        mock.push_err(TransportError::Http {
            status: Some(503),
            message: "unavailable".to_string(),
        });
        mock.push_ok(json!({"ok": true}));

        let request = ChatRequest::json("m", vec![ChatMessage::user("hi")], Duration::from_secs(5));
        let outcome = chat_with_retry(&mock, request, 3, 1).await.unwrap();
        assert_eq!(outcome.value, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_retry_exhaustion() {
        let mock = MockClient::new();
        for _ in 0..3 {
            mock.push_err(TransportError::Timeout { seconds: 1 });
        }
        let request = ChatRequest::json("m", vec![ChatMessage::user("hi")], Duration::from_secs(5));
        let result = chat_with_retry(&mock, request, 3, 1).await;
        assert!(matches!(
            result,
            Err(TransportError::RetriesExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_retry_does_not_mask_unknown_provider() {
        let mock = MockClient::new();
        mock.push_err(TransportError::UnknownProvider {
            name: "x".to_string(),
        });
        let request = ChatRequest::json("m", vec![], Duration::from_secs(5));
        let result = chat_with_retry(&mock, request, 3, 1).await;
        assert!(matches!(
            result,
            Err(TransportError::UnknownProvider { .. })
        ));
    }
}
