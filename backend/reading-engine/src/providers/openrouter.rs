use async_trait::async_trait;
use std::time::Duration;

use super::openai::{chat_completion, chat_model, chat_text};
use super::{http_client, Provider, ProviderError, ProviderKind, RawResult};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// OpenRouter speaks the OpenAI chat-completions dialect.
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenRouterClient {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: http_client(timeout)?,
            api_key,
            base_url: base_url.unwrap_or_else(|| OPENROUTER_BASE_URL.to_string()),
        })
    }
}

#[async_trait]
impl Provider for OpenRouterClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenRouter
    }

    async fn get_response(&self, model: &str, prompt: &str) -> Result<RawResult, ProviderError> {
        chat_completion(&self.http, &self.base_url, &self.api_key, model, prompt).await
    }

    fn extract_text(&self, raw: &RawResult) -> Result<String, ProviderError> {
        chat_text(raw)
    }

    fn extract_model_name(&self, raw: &RawResult) -> String {
        chat_model(raw)
    }
}
