pub mod models;
pub mod openai;

use openai::OpenAiClient;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::AppConfig;
use models::Message;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Network Error: {0}")]
    Network(String),
    #[error("API Error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Rate Limited")]
    RateLimited,
    #[error("Invalid Response: {0}")]
    InvalidResponse(String),
    #[error("Request cancelled")]
    Cancelled,
}

/// Remote chat-completion and image-generation endpoints.
///
/// Every call is a single round trip. Failures are returned to the caller
/// as they are and never retried here.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Sends the whole conversation and returns the first reply choice.
    async fn complete_chat(&self, model: &str, messages: &[Message]) -> Result<Message, LlmError>;

    /// Returns the URLs of `count` generated images.
    async fn generate_images(&self, prompt: &str, count: u32) -> Result<Vec<String>, LlmError>;

    async fn list_models(&self) -> Result<Vec<String>, LlmError>;
}

pub struct ClientFactory;

impl ClientFactory {
    pub fn create(config: &AppConfig) -> Arc<dyn CompletionClient> {
        let cfg = &config.openai;
        Arc::new(OpenAiClient::new(
            cfg.api_key.clone(),
            cfg.api_base.clone(),
            cfg.organization.clone(),
        ))
    }
}
