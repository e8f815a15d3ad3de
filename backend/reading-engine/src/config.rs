use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::utils::retry::RetryConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub bind_addr: String,
    pub catalog_path: Option<String>,
    /// `user:password` guarding `/metrics`; open when unset.
    pub metrics_auth: Option<String>,
    pub providers: ProvidersConfig,
    pub engine: EngineSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    pub request_timeout_seconds: u64,
    pub openai: Option<OpenAiSettings>,
    pub gemini: Option<GeminiSettings>,
    pub openrouter: Option<OpenRouterSettings>,
    pub cloudflare: Option<CloudflareSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub base_url: Option<String>,
    pub text_model: String,
    pub image_model: String,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiSettings {
    pub api_key: String,
    pub proxy_url: String,
    pub text_model: String,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenRouterSettings {
    pub api_key: String,
    pub base_url: Option<String>,
    pub text_model: String,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudflareSettings {
    pub api_key: String,
    pub account_id: String,
    pub image_model: String,
    pub weight: Option<f64>,
}

/// Tunables of the reading session engine.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    pub max_retries: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub lock_ttl_seconds: u64,
    pub active_question_ttl_seconds: u64,
    pub session_ttl_seconds: u64,
    pub max_mistakes: u32,
    pub streak_bonus: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base_ms: 1000,
            backoff_max_ms: 16_000,
            lock_ttl_seconds: 600,
            active_question_ttl_seconds: 600,
            session_ttl_seconds: 86_400,
            max_mistakes: 3,
            streak_bonus: 5,
        }
    }
}

impl EngineSettings {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retries.max(1),
            base_backoff: Duration::from_millis(self.backoff_base_ms),
            max_backoff: Duration::from_millis(self.backoff_max_ms.max(self.backoff_base_ms)),
            jitter_max: None,
        }
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds)
    }

    pub fn active_question_ttl(&self) -> Duration {
        Duration::from_secs(self.active_question_ttl_seconds)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "reading_engine".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| {
                let host = env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
                let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
                match env::var("REDIS_PASSWORD") {
                    Ok(password) => format!("redis://:{}@{}:{}/0", password, host, port),
                    Err(_) => format!("redis://{}:{}/0", host, port),
                }
            });

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let catalog_path = settings
            .get_string("catalog.path")
            .or_else(|_| env::var("CATALOG_PATH"))
            .ok();

        let metrics_auth = lookup(&settings, "server.metrics_auth", "METRICS_AUTH");

        let providers = ProvidersConfig {
            request_timeout_seconds: settings
                .get_int("providers.request_timeout_seconds")
                .ok()
                .and_then(|v| u64::try_from(v).ok())
                .unwrap_or(60),
            openai: lookup(&settings, "providers.openai.api_key", "OPENAI_API_KEY").map(
                |api_key| OpenAiSettings {
                    api_key,
                    base_url: lookup(&settings, "providers.openai.base_url", "OPENAI_BASE_URL"),
                    text_model: lookup(&settings, "providers.openai.text_model", "OPENAI_TEXT_MODEL")
                        .unwrap_or_else(|| "gpt-4.1-nano-2025-04-14".to_string()),
                    image_model: lookup(
                        &settings,
                        "providers.openai.image_model",
                        "OPENAI_IMAGE_MODEL",
                    )
                    .unwrap_or_else(|| "dall-e-3".to_string()),
                    weight: settings.get_float("providers.openai.weight").ok(),
                },
            ),
            gemini: lookup(&settings, "providers.gemini.api_key", "GEMINI_API_KEY").and_then(
                |api_key| {
                    let proxy_url =
                        lookup(&settings, "providers.gemini.proxy_url", "GEMINI_PROXY_URL")?;
                    Some(GeminiSettings {
                        api_key,
                        proxy_url,
                        text_model: lookup(
                            &settings,
                            "providers.gemini.text_model",
                            "GEMINI_TEXT_MODEL",
                        )
                        .unwrap_or_else(|| "gemini-2.0-flash-001:generateContent".to_string()),
                        weight: settings.get_float("providers.gemini.weight").ok(),
                    })
                },
            ),
            openrouter: lookup(&settings, "providers.openrouter.api_key", "OPENROUTER_API_KEY")
                .map(|api_key| OpenRouterSettings {
                    api_key,
                    base_url: lookup(
                        &settings,
                        "providers.openrouter.base_url",
                        "OPENROUTER_BASE_URL",
                    ),
                    text_model: lookup(
                        &settings,
                        "providers.openrouter.text_model",
                        "OPENROUTER_TEXT_MODEL",
                    )
                    .unwrap_or_else(|| "deepseek/deepseek-r1:free".to_string()),
                    weight: settings.get_float("providers.openrouter.weight").ok(),
                }),
            cloudflare: lookup(&settings, "providers.cloudflare.api_key", "CLOUDFLARE_API_KEY")
                .and_then(|api_key| {
                    let account_id = lookup(
                        &settings,
                        "providers.cloudflare.account_id",
                        "CLOUDFLARE_ACCOUNT_ID",
                    )?;
                    Some(CloudflareSettings {
                        api_key,
                        account_id,
                        image_model: lookup(
                            &settings,
                            "providers.cloudflare.image_model",
                            "CLOUDFLARE_IMAGE_MODEL",
                        )
                        .unwrap_or_else(|| "bytedance/stable-diffusion-xl-lightning".to_string()),
                        weight: settings.get_float("providers.cloudflare.weight").ok(),
                    })
                }),
        };

        let engine = settings
            .get::<EngineSettings>("engine")
            .unwrap_or_default();

        Ok(Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            bind_addr,
            catalog_path,
            metrics_auth,
            providers,
            engine,
        })
    }
}

/// Settings key first, then the plain environment variable; blanks count as unset.
fn lookup(settings: &config::Config, key: &str, env_var: &str) -> Option<String> {
    settings
        .get_string(key)
        .or_else(|_| env::var(env_var))
        .ok()
        .filter(|value| !value.trim().is_empty())
}
