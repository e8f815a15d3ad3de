use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use super::{http_client, post_json, Provider, ProviderError, ProviderKind, RawResult};

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    /// Model path is appended directly, e.g. `.../models/` + `gemini-2.0-flash-001:generateContent`.
    proxy_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, proxy_url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: http_client(timeout)?,
            api_key,
            proxy_url,
        })
    }
}

#[async_trait]
impl Provider for GeminiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn get_response(&self, model: &str, prompt: &str) -> Result<RawResult, ProviderError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });
        let request = self
            .http
            .post(format!("{}{}", self.proxy_url, model))
            .query(&[("key", self.api_key.as_str())]);

        post_json(request, &body).await.map(RawResult::Json)
    }

    fn extract_text(&self, raw: &RawResult) -> Result<String, ProviderError> {
        let RawResult::Json(value) = raw else {
            return Err(ProviderError::Malformed("expected JSON from Gemini".into()));
        };
        value
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| ProviderError::Malformed("no candidates in Gemini response".into()))
    }

    fn extract_model_name(&self, raw: &RawResult) -> String {
        match raw {
            RawResult::Json(value) => value
                .get("modelVersion")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            RawResult::Binary { model, .. } => model.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_candidate_text_and_model_version() {
        let client = GeminiClient::new(
            "key".into(),
            "https://proxy.example/v1beta/models/".into(),
            Duration::from_secs(5),
        )
        .unwrap();
        let raw = RawResult::Json(json!({
            "modelVersion": "gemini-2.0-flash-001",
            "candidates": [{ "content": { "parts": [{ "text": "```json\n{}\n```" }] } }]
        }));
        assert_eq!(client.extract_text(&raw).unwrap(), "```json\n{}\n```");
        assert_eq!(client.extract_model_name(&raw), "gemini-2.0-flash-001");
    }
}
