use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use super::{http_client, Provider, ProviderError, ProviderKind, RawResult};

const CLOUDFLARE_API: &str = "https://api.cloudflare.com/client/v4/accounts";

/// Workers AI image model; returns raw image bytes.
pub struct CloudflareImageClient {
    http: reqwest::Client,
    api_key: String,
    account_id: String,
}

impl CloudflareImageClient {
    pub fn new(api_key: String, account_id: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: http_client(timeout)?,
            api_key,
            account_id,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/{}/ai/run/@cf/{}", CLOUDFLARE_API, self.account_id, model)
    }
}

#[async_trait]
impl Provider for CloudflareImageClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Cloudflare
    }

    async fn get_response(&self, model: &str, prompt: &str) -> Result<RawResult, ProviderError> {
        let response = self
            .http
            .post(self.endpoint(model))
            .bearer_auth(&self.api_key)
            .json(&json!({ "prompt": prompt }))
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

        let model_name = response
            .url()
            .path_segments()
            .and_then(|segments| segments.last())
            .unwrap_or(model)
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(ProviderError::from_reqwest)?;

        if bytes.is_empty() {
            return Err(ProviderError::Malformed("empty image payload".into()));
        }

        Ok(RawResult::Binary {
            bytes: bytes.to_vec(),
            model: model_name,
        })
    }

    fn extract_text(&self, _raw: &RawResult) -> Result<String, ProviderError> {
        Err(ProviderError::Malformed(
            "Cloudflare image models return binary payloads".into(),
        ))
    }

    fn extract_model_name(&self, raw: &RawResult) -> String {
        match raw {
            RawResult::Binary { model, .. } => model.clone(),
            RawResult::Json(value) => value
                .get("modelVersion")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_includes_account_and_model() {
        let client = CloudflareImageClient::new(
            "key".into(),
            "acc123".into(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.endpoint("bytedance/stable-diffusion-xl-lightning"),
            "https://api.cloudflare.com/client/v4/accounts/acc123/ai/run/@cf/bytedance/stable-diffusion-xl-lightning"
        );
    }

    #[test]
    fn binary_payload_echoes_model() {
        let client =
            CloudflareImageClient::new("key".into(), "acc".into(), Duration::from_secs(5)).unwrap();
        let raw = RawResult::Binary {
            bytes: vec![1, 2, 3],
            model: "stable-diffusion-xl-lightning".into(),
        };
        assert_eq!(client.extract_model_name(&raw), "stable-diffusion-xl-lightning");
        assert!(client.extract_text(&raw).is_err());
    }
}
