use crate::config::LlmConfig;
use crate::services::embedding_service::EmbeddingService;
use crate::services::language_model::{
    parse_structured, CompletionOptions, LanguageModel, ModelError,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat completion client; embeddings are delegated to [`EmbeddingService`].
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
    embeddings: EmbeddingService,
}

impl LlmService {
    pub fn new(config: LlmConfig, embeddings: EmbeddingService) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
            embeddings,
        }
    }

    /// Generate completion without streaming (wait for full response)
    pub async fn generate_chat(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: usize,
        temperature: f32,
    ) -> Result<String, ModelError> {
        debug!("Starting chat generation with {} messages", messages.len());

        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens,
            temperature,
            stream: false,
        };

        let mut builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.config.base_url))
            .json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout(self.config.timeout_seconds)
            } else {
                ModelError::Transport(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status { status, body });
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Parse(format!("chat completion: {}", e)))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ModelError::EmptyResponse)
    }
}

#[async_trait]
impl LanguageModel for LlmService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        self.embeddings.embed(text).await
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ModelError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &options.system {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(prompt));

        self.generate_chat(
            messages,
            options.max_tokens.unwrap_or(self.config.max_tokens),
            options.temperature.unwrap_or(self.config.temperature),
        )
        .await
    }

    async fn complete_structured(&self, prompt: &str, schema: &Value) -> Result<Value, ModelError> {
        let system = format!(
            "You are a precise extraction engine. Reply with exactly one JSON object that \
             matches this JSON schema and nothing else:\n{}",
            schema
        );
        let raw = self
            .generate_chat(
                vec![ChatMessage::system(system), ChatMessage::user(prompt)],
                self.config.max_tokens,
                0.0,
            )
            .await?;

        parse_structured(&raw)
    }
}
