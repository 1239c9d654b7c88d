//! External transformation service
//!
//! [`TransformService`] is the seam the call adapter wraps. The production
//! implementation, [`ChatTransformClient`], sends one chat-completions request
//! per value and returns the trimmed reply.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ServiceConfig;

/// Longest response body excerpt carried inside an error
const ERROR_BODY_LIMIT: usize = 200;

/// Failure of a single service call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Credentials rejected; retrying cannot help
    #[error("unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ServiceError {
    /// Everything except an authorisation failure is worth another attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ServiceError::Unauthorized { .. })
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::Transport(err.to_string())
    }
}

/// Transforms one field value
#[async_trait]
pub trait TransformService: Send + Sync {
    /// Transform `input`, the raw value of `field`
    async fn transform(&self, field: &str, input: &str) -> Result<String, ServiceError>;
}

// ============================================================================
// Chat-completions client
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Translation client for an OpenAI-compatible chat-completions endpoint
pub struct ChatTransformClient {
    client: Client,
    config: ServiceConfig,
    system_prompt: String,
}

impl ChatTransformClient {
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        let system_prompt = format!(
            "Translate the following text to {}. Only return the translation.",
            config.target_language
        );

        Ok(Self {
            client,
            config,
            system_prompt,
        })
    }

    pub fn from_env() -> crate::error::Result<Self> {
        Ok(Self::new(ServiceConfig::from_env()?)?)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}

#[async_trait]
impl TransformService for ChatTransformClient {
    async fn transform(&self, field: &str, input: &str) -> Result<String, ServiceError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: input,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        debug!(field, status = status.as_u16(), "Transformation service responded");

        if !status.is_success() {
            let message = excerpt(&response.text().await.unwrap_or_default());
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceError::Unauthorized {
                    status: status.as_u16(),
                    message,
                },
                StatusCode::TOO_MANY_REQUESTS => ServiceError::RateLimited(message),
                _ => ServiceError::Status {
                    status: status.as_u16(),
                    message,
                },
            });
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::MalformedResponse(e.to_string()))?;

        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| ServiceError::MalformedResponse("no message content".to_string()))
    }
}
