use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::llm::{
    models::{
        ChatCompletionRequest, ChatCompletionResponse, ImageGenerationRequest,
        ImageGenerationResponse, Message, ModelList,
    },
    CompletionClient, LlmError,
};

pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    organization: Option<String>,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: String, organization: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            organization,
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Authorization", format!("Bearer {}", self.api_key));
        match &self.organization {
            Some(org) => request.header("OpenAI-Organization", org),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, LlmError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let response = check_status(response).await?;

        response
            .json::<T>()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

async fn check_status(response: Response) -> Result<Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), "OpenAI request failed: {}", body);
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LlmError::RateLimited);
    }
    Err(LlmError::Api { status: status.as_u16(), body })
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete_chat(&self, model: &str, messages: &[Message]) -> Result<Message, LlmError> {
        let body = ChatCompletionRequest { model, messages };
        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);

        let completion: ChatCompletionResponse = self.send(request).await?;
        if let Some(usage) = &completion.usage {
            debug!(
                model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat completion finished"
            );
        }

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("completion returned no choices".to_string()))?;
        if let Some(reason) = &choice.finish_reason {
            debug!(finish_reason = %reason, "first choice selected");
        }
        Ok(choice.message)
    }

    async fn generate_images(&self, prompt: &str, count: u32) -> Result<Vec<String>, LlmError> {
        let body = ImageGenerationRequest { prompt, n: count };
        let request = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .json(&body);

        let images: ImageGenerationResponse = self.send(request).await?;
        Ok(images.data.into_iter().map(|image| image.url).collect())
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let request = self.client.get(format!("{}/models", self.base_url));

        let models: ModelList = self.send(request).await?;
        Ok(models.data.into_iter().map(|model| model.id).collect())
    }
}
