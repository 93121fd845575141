//! Scripted mock transport for tests.
//!
//! Push responses in the order the code under test will consume them.
//! Every received request is recorded so tests can assert on prompts.

use crate::core::TokenUsage;
use crate::error::TransportError;
use crate::llm::{ChatOutcome, ChatRequest, LlmClient};
use std::collections::VecDeque;
use std::sync::Mutex;

enum Scripted {
    Ok {
        value: serde_json::Value,
        usage: Option<TokenUsage>,
    },
    Err(TransportError),
}

/// A scripted [`LlmClient`] for tests.
///
/// # Examples
///
/// ```
/// use sr_extract::llm::MockClient;
/// use serde_json::json;
///
/// let mock = MockClient::new();
/// mock.push_ok(json!({"answer": 42}));
/// ```
#[derive(Default)]
pub struct MockClient {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockClient {
    /// Creates a client with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful response without usage.
    pub fn push_ok(&self, value: serde_json::Value) {
        self.push(Scripted::Ok { value, usage: None });
    }

    /// Queues a successful response with reported usage.
    pub fn push_ok_with_usage(&self, value: serde_json::Value, usage: TokenUsage) {
        self.push(Scripted::Ok {
            value,
            usage: Some(usage),
        });
    }

    /// Queues a transport failure.
    pub fn push_err(&self, error: TransportError) {
        self.push(Scripted::Err(error));
    }

    fn push(&self, entry: Scripted) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(entry);
        }
    }

    /// Returns copies of every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Returns how many scripted responses remain unconsumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl LlmClient for MockClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome, TransportError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());
        match next {
            Some(Scripted::Ok { value, usage }) => Ok(ChatOutcome { value, usage }),
            Some(Scripted::Err(error)) => Err(error),
            None => Err(TransportError::Api("mock script exhausted".to_string())),
        }
    }

    fn provider(&self) -> &str {
        "mock"
    }
}
