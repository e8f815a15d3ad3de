use std::sync::Arc;

use crate::errors::{EngineError, EngineResult};
use crate::metrics::{record_generation_attempt, track_provider_call};
use crate::models::{GeneratedContent, UserId};
use crate::providers::{ProviderError, ProviderPool, ProviderSlot};
use crate::services::normalizer;
use crate::services::prompt::{PromptBuilder, ResolvedTopic};
use crate::store::HistorySink;
use crate::utils::time::Clock;
use crate::utils::retry::{retry_async_when, RetryConfig};

/// Maps a provider failure onto the retry taxonomy.
pub fn classify(provider: &'static str, err: ProviderError) -> EngineError {
    if err.is_transient() {
        EngineError::ProviderTransient {
            provider,
            source: err,
        }
    } else {
        EngineError::ProviderFatal {
            provider,
            source: err,
        }
    }
}

fn outcome_label(result: &EngineResult<GeneratedContent>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(EngineError::ProviderTransient { .. }) => "transient",
        Err(EngineError::Validation(_)) => "invalid",
        Err(_) => "fatal",
    }
}

/// Prompt → provider → normalizer, under retry with exponential backoff.
pub struct GenerationService {
    pool: ProviderPool,
    prompts: Arc<PromptBuilder>,
    history: Arc<dyn HistorySink>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
}

impl GenerationService {
    pub fn new(
        pool: ProviderPool,
        prompts: Arc<PromptBuilder>,
        history: Arc<dyn HistorySink>,
        clock: Arc<dyn Clock>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            pool,
            prompts,
            history,
            clock,
            retry,
        }
    }

    /// Every attempt picks a provider and builds a fresh prompt. Transient and
    /// validation failures are retried; the last one is wrapped in
    /// [`EngineError::GenerationFailed`]. Anything else is returned as is.
    pub async fn generate(
        &self,
        user_id: UserId,
        topic: &ResolvedTopic,
        age: u32,
    ) -> EngineResult<GeneratedContent> {
        if self.pool.is_empty() {
            return Err(EngineError::NoProvider("text"));
        }

        let mut attempts = 0usize;
        let result = retry_async_when(self.retry.clone(), EngineError::is_retryable, || {
            attempts += 1;
            let attempt = attempts;
            async move { self.attempt(user_id, topic, age, attempt).await }
        })
        .await;

        match result {
            Ok(content) => {
                self.remember(user_id, &content.text);
                Ok(content)
            }
            Err(err) if err.is_retryable() => {
                tracing::error!(user_id, topic = %topic.topic, attempts, error = %err, "Text generation failed");
                Err(EngineError::GenerationFailed {
                    attempts,
                    source: Box::new(err),
                })
            }
            Err(err) => {
                tracing::error!(user_id, topic = %topic.topic, error = %err, "Text generation aborted");
                Err(err)
            }
        }
    }

    async fn attempt(
        &self,
        user_id: UserId,
        topic: &ResolvedTopic,
        age: u32,
        attempt: usize,
    ) -> EngineResult<GeneratedContent> {
        let slot = self.pool.choose().ok_or(EngineError::NoProvider("text"))?;
        let provider = slot.kind().as_str();
        let prompt = self.prompts.text_prompt(topic, age, self.clock.now());

        tracing::debug!(user_id, attempt, provider, model = %slot.model, "Requesting text");
        let result = self.call(slot, provider, &prompt).await;
        record_generation_attempt(provider, outcome_label(&result));

        if let Err(err) = &result {
            tracing::warn!(user_id, attempt, provider, error = %err, "Generation attempt failed");
        }
        result
    }

    async fn call(
        &self,
        slot: &ProviderSlot,
        provider: &'static str,
        prompt: &str,
    ) -> EngineResult<GeneratedContent> {
        let raw = track_provider_call(provider, slot.client.get_response(&slot.model, prompt))
            .await
            .map_err(|e| classify(provider, e))?;
        let text = slot
            .client
            .extract_text(&raw)
            .map_err(|e| classify(provider, e))?;
        let model = slot.client.extract_model_name(&raw);
        Ok(normalizer::normalize(&text, &model)?)
    }

    /// Fire-and-forget; a history failure never fails the generation.
    fn remember(&self, user_id: UserId, text: &str) {
        let history = self.history.clone();
        let text = text.to_string();
        tokio::spawn(async move {
            if let Err(e) = history.remember_text(user_id, &text).await {
                tracing::warn!(user_id, error = %e, "Failed to store text history");
            }
        });
    }
}
