//! Text and image generation backends.
//!
//! Every backend implements [`Provider`]: one outbound request per call, no
//! retries, errors surfaced as [`ProviderError`] for the orchestrator to
//! classify. Backends are grouped into weighted [`ProviderPool`]s, one per
//! content kind.

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;

pub mod cloudflare;
pub mod gemini;
pub mod openai;
pub mod openrouter;

pub use cloudflare::CloudflareImageClient;
pub use gemini::GeminiClient;
pub use openai::{OpenAiClient, OpenAiImageClient};
pub use openrouter::OpenRouterClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Gemini,
    OpenRouter,
    Cloudflare,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Cloudflare => "cloudflare",
        }
    }

    /// Free-tier backends are slower and get a fifth of the traffic.
    pub fn default_weight(&self) -> f64 {
        match self {
            ProviderKind::OpenRouter => 0.2,
            _ => 1.0,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited (HTTP 429)")]
    RateLimited,
    #[error("server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },
    #[error("authentication rejected (HTTP {status})")]
    Auth { status: u16 },
    #[error("request rejected (HTTP {status}): {body}")]
    Client { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ProviderError {
    /// Timeout, rate-limit, 5xx and connection failures may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::RateLimited | ProviderError::Server { .. } => {
                true
            }
            ProviderError::Transport(err) => err.is_connect() || err.is_request(),
            ProviderError::Malformed(_) => true,
            ProviderError::Auth { .. } | ProviderError::Client { .. } => false,
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            429 => ProviderError::RateLimited,
            401 | 403 => ProviderError::Auth {
                status: status.as_u16(),
            },
            code if status.is_server_error() => ProviderError::Server { status: code, body },
            code => ProviderError::Client { status: code, body },
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Malformed(err.to_string())
        } else {
            ProviderError::Transport(err)
        }
    }
}

/// Unparsed provider payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResult {
    Json(serde_json::Value),
    Binary { bytes: Vec<u8>, model: String },
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn get_response(&self, model: &str, prompt: &str) -> Result<RawResult, ProviderError>;

    fn extract_text(&self, raw: &RawResult) -> Result<String, ProviderError>;

    fn extract_model_name(&self, raw: &RawResult) -> String;
}

/// Sends a JSON POST and maps HTTP failures onto [`ProviderError`].
pub(crate) async fn post_json(
    request: reqwest::RequestBuilder,
    body: &serde_json::Value,
) -> Result<serde_json::Value, ProviderError> {
    let response = request
        .json(body)
        .send()
        .await
        .map_err(ProviderError::from_reqwest)?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ProviderError::from_status(status, body));
    }

    response
        .json::<serde_json::Value>()
        .await
        .map_err(ProviderError::from_reqwest)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

#[derive(Clone)]
pub struct ProviderSlot {
    pub model: String,
    pub weight: f64,
    pub client: Arc<dyn Provider>,
}

impl ProviderSlot {
    pub fn new(client: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        let weight = client.kind().default_weight();
        Self {
            model: model.into(),
            weight,
            client,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn kind(&self) -> ProviderKind {
        self.client.kind()
    }
}

impl fmt::Debug for ProviderSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSlot")
            .field("kind", &self.kind())
            .field("model", &self.model)
            .field("weight", &self.weight)
            .finish()
    }
}

/// Weighted set of interchangeable providers for one content kind.
#[derive(Debug, Clone, Default)]
pub struct ProviderPool {
    slots: Vec<ProviderSlot>,
}

impl ProviderPool {
    pub fn new(slots: Vec<ProviderSlot>) -> Self {
        Self {
            slots: slots.into_iter().filter(|s| s.weight > 0.0).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[ProviderSlot] {
        &self.slots
    }

    /// Weighted random pick; `None` only for an empty pool.
    pub fn choose(&self) -> Option<&ProviderSlot> {
        let mut rng = rand::rng();
        self.slots.choose_weighted(&mut rng, |slot| slot.weight).ok()
    }
}

/// Text and image pools built from configuration.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    pub text: ProviderPool,
    pub image: ProviderPool,
}

impl ProviderRegistry {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.providers.request_timeout_seconds);
        let mut text = Vec::new();
        let mut image = Vec::new();

        if let Some(openai) = &config.providers.openai {
            let client = Arc::new(OpenAiClient::new(
                openai.api_key.clone(),
                openai.base_url.clone(),
                timeout,
            )?);
            text.push(
                ProviderSlot::new(client, openai.text_model.clone())
                    .with_weight(openai.weight.unwrap_or(1.0)),
            );
            let images = Arc::new(OpenAiImageClient::new(
                openai.api_key.clone(),
                openai.base_url.clone(),
                timeout,
            )?);
            image.push(ProviderSlot::new(images, openai.image_model.clone()));
        }

        if let Some(gemini) = &config.providers.gemini {
            let client = Arc::new(GeminiClient::new(
                gemini.api_key.clone(),
                gemini.proxy_url.clone(),
                timeout,
            )?);
            text.push(
                ProviderSlot::new(client, gemini.text_model.clone())
                    .with_weight(gemini.weight.unwrap_or(1.0)),
            );
        }

        if let Some(openrouter) = &config.providers.openrouter {
            let client = Arc::new(OpenRouterClient::new(
                openrouter.api_key.clone(),
                openrouter.base_url.clone(),
                timeout,
            )?);
            text.push(
                ProviderSlot::new(client, openrouter.text_model.clone()).with_weight(
                    openrouter
                        .weight
                        .unwrap_or(ProviderKind::OpenRouter.default_weight()),
                ),
            );
        }

        if let Some(cloudflare) = &config.providers.cloudflare {
            let client = Arc::new(CloudflareImageClient::new(
                cloudflare.api_key.clone(),
                cloudflare.account_id.clone(),
                timeout,
            )?);
            image.push(
                ProviderSlot::new(client, cloudflare.image_model.clone())
                    .with_weight(cloudflare.weight.unwrap_or(1.0)),
            );
        }

        let registry = Self {
            text: ProviderPool::new(text),
            image: ProviderPool::new(image),
        };

        if registry.text.is_empty() {
            anyhow::bail!("At least one text provider must be configured");
        }
        if registry.image.is_empty() {
            anyhow::bail!("At least one image provider must be configured");
        }

        for slot in registry.text.slots() {
            tracing::info!(provider = %slot.kind(), model = %slot.model, weight = slot.weight, "Text provider enabled");
        }
        for slot in registry.image.slots() {
            tracing::info!(provider = %slot.kind(), model = %slot.model, weight = slot.weight, "Image provider enabled");
        }

        Ok(registry)
    }
}
