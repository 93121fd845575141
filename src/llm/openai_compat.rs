//! OpenAI-compatible HTTP transport.
//!
//! One client type serves both streams: point it at a local
//! OpenAI-compatible endpoint (Ollama, llama.cpp server) for the local
//! tiers, or at a hosted API for the cloud tiers. The pipeline never sees
//! the provider, only the [`LlmClient`] capability.

use crate::core::TokenUsage;
use crate::error::TransportError;
use crate::llm::{ChatOutcome, ChatRequest, LlmClient, Role, parse_json_response};
use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, ResponseFormat,
};

/// Transport backed by any OpenAI-compatible chat completion endpoint.
pub struct OpenAiCompatClient {
    client: Client<OpenAIConfig>,
    provider: String,
}

impl OpenAiCompatClient {
    /// Creates a client for the given base URL.
    ///
    /// An empty `base_url` uses the provider default; an empty `api_key`
    /// is accepted for local endpoints that ignore authentication.
    #[must_use]
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if !base_url.is_empty() {
            config = config.with_api_base(base_url);
        }
        Self {
            client: Client::with_config(config),
            provider: "openai-compat".to_string(),
        }
    }

    fn convert_messages(
        request: &ChatRequest,
    ) -> Result<Vec<ChatCompletionRequestMessage>, TransportError> {
        let mut messages = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            let converted = match message.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(message.content.clone())
                    .build()
                    .map(ChatCompletionRequestMessage::System),
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(message.content.clone())
                    .build()
                    .map(ChatCompletionRequestMessage::User),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(message.content.clone())
                    .build()
                    .map(ChatCompletionRequestMessage::Assistant),
            };
            messages.push(converted.map_err(|e| TransportError::Api(e.to_string()))?);
        }
        Ok(messages)
    }

    fn map_error(err: &OpenAIError) -> TransportError {
        match err {
            OpenAIError::ApiError(api) => TransportError::Api(api.message.clone()),
            OpenAIError::Reqwest(detail) => TransportError::Http {
                status: None,
                message: detail.to_string(),
            },
            OpenAIError::JSONDeserialize(detail) => {
                TransportError::SchemaParse(detail.to_string())
            }
            other => TransportError::Api(other.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome, TransportError> {
        let messages = Self::convert_messages(&request)?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&request.model).messages(messages);
        if request.json_output {
            builder.response_format(ResponseFormat::JsonObject);
        }
        let api_request = builder
            .build()
            .map_err(|e| TransportError::Api(e.to_string()))?;

        let deadline = request.deadline;
        let response =
            tokio::time::timeout(deadline, self.client.chat().create(api_request))
                .await
                .map_err(|_| TransportError::Timeout {
                    seconds: deadline.as_secs(),
                })?
                .map_err(|e| Self::map_error(&e))?;

        let usage = response.usage.as_ref().map(|u| TokenUsage {
            prompt_tokens: u64::from(u.prompt_tokens),
            completion_tokens: u64::from(u.completion_tokens),
            calls: 1,
        });

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .ok_or_else(|| {
                TransportError::SchemaParse("model returned no content".to_string())
            })?;

        let value = parse_json_response(content)?;
        Ok(ChatOutcome { value, usage })
    }

    fn provider(&self) -> &str {
        &self.provider
    }
}
