use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use super::{http_client, post_json, Provider, ProviderError, ProviderKind, RawResult};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const TEMPERATURE: f64 = 0.8;
const MAX_TOKENS: u32 = 1200;
const IMAGE_SIZE: &str = "1024x1024";

/// Chat-completions call shared by OpenAI-compatible backends.
pub(crate) async fn chat_completion(
    http: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    prompt: &str,
) -> Result<RawResult, ProviderError> {
    let body = json!({
        "model": model,
        "messages": [{ "role": "user", "content": prompt }],
        "temperature": TEMPERATURE,
        "max_tokens": MAX_TOKENS,
    });

    let request = http
        .post(format!("{}/chat/completions", base_url.trim_end_matches('/')))
        .bearer_auth(api_key);

    post_json(request, &body).await.map(RawResult::Json)
}

pub(crate) fn chat_text(raw: &RawResult) -> Result<String, ProviderError> {
    let RawResult::Json(value) = raw else {
        return Err(ProviderError::Malformed("expected JSON chat completion".into()));
    };
    value
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| ProviderError::Malformed("no choices in chat completion".into()))
}

pub(crate) fn chat_model(raw: &RawResult) -> String {
    match raw {
        RawResult::Json(value) => value
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        RawResult::Binary { model, .. } => model.clone(),
    }
}

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: http_client(timeout)?,
            api_key,
            base_url: base_url.unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
        })
    }
}

#[async_trait]
impl Provider for OpenAiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
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

/// Image generation endpoint; the extracted "text" is the image URL.
pub struct OpenAiImageClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiImageClient {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: http_client(timeout)?,
            api_key,
            base_url: base_url.unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
        })
    }
}

#[async_trait]
impl Provider for OpenAiImageClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn get_response(&self, model: &str, prompt: &str) -> Result<RawResult, ProviderError> {
        let body = json!({
            "model": model,
            "prompt": prompt,
            "n": 1,
            "size": IMAGE_SIZE,
            "quality": "standard",
        });
        let request = self
            .http
            .post(format!(
                "{}/images/generations",
                self.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.api_key);

        let mut value = post_json(request, &body).await?;
        // The images endpoint does not echo the model.
        if let Some(object) = value.as_object_mut() {
            object
                .entry("model")
                .or_insert_with(|| serde_json::Value::String(model.to_string()));
        }
        Ok(RawResult::Json(value))
    }

    fn extract_text(&self, raw: &RawResult) -> Result<String, ProviderError> {
        let RawResult::Json(value) = raw else {
            return Err(ProviderError::Malformed("expected JSON image response".into()));
        };
        value
            .pointer("/data/0/url")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Malformed("no image url in response".into()))
    }

    fn extract_model_name(&self, raw: &RawResult) -> String {
        chat_model(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_chat_content_and_model() {
        let raw = RawResult::Json(json!({
            "model": "gpt-4.1-nano",
            "choices": [{ "message": { "role": "assistant", "content": "  {\"text\": \"hi\"}\n" } }]
        }));
        assert_eq!(chat_text(&raw).unwrap(), "{\"text\": \"hi\"}");
        assert_eq!(chat_model(&raw), "gpt-4.1-nano");
    }

    #[test]
    fn empty_choices_is_malformed() {
        let raw = RawResult::Json(json!({ "choices": [] }));
        assert!(matches!(chat_text(&raw), Err(ProviderError::Malformed(_))));
    }

    #[test]
    fn image_url_is_extracted() {
        let client =
            OpenAiImageClient::new("key".into(), None, Duration::from_secs(5)).unwrap();
        let raw = RawResult::Json(json!({
            "model": "dall-e-3",
            "data": [{ "url": "https://img.example/card.png" }]
        }));
        assert_eq!(
            client.extract_text(&raw).unwrap(),
            "https://img.example/card.png"
        );
        assert_eq!(client.extract_model_name(&raw), "dall-e-3");
    }
}
