use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;

use crate::errors::{EngineError, EngineResult};
use crate::metrics::{record_generation_attempt, track_provider_call, CARDS_GENERATED_TOTAL};
use crate::models::{CardRecord, UserId};
use crate::providers::{ProviderPool, RawResult};
use crate::services::generation_service::classify;
use crate::services::prompt::PromptBuilder;
use crate::store::ReadingRepository;
use crate::utils::retry::{retry_async_when, RetryConfig};
use crate::utils::time::Clock;

/// What a won round leaves behind for the card step.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PendingCard {
    pub topic: String,
    pub title: String,
    pub age: u32,
}

pub struct CardService {
    pool: ProviderPool,
    prompts: Arc<PromptBuilder>,
    repo: Arc<dyn ReadingRepository>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
}

impl CardService {
    pub fn new(
        pool: ProviderPool,
        prompts: Arc<PromptBuilder>,
        repo: Arc<dyn ReadingRepository>,
        clock: Arc<dyn Clock>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            pool,
            prompts,
            repo,
            clock,
            retry,
        }
    }

    /// `Ok(None)` when the user already owns this card.
    pub async fn generate(&self, user_id: UserId, card: &PendingCard) -> EngineResult<Option<CardRecord>> {
        if self.repo.card_exists(user_id, &card.topic, &card.title).await? {
            tracing::info!(user_id, title = %card.title, "Card already collected");
            return Ok(None);
        }
        if self.pool.is_empty() {
            return Err(EngineError::NoProvider("image"));
        }

        let mut attempts = 0usize;
        let result = retry_async_when(self.retry.clone(), EngineError::is_retryable, || {
            attempts += 1;
            async move { self.render(card).await }
        })
        .await;

        let (image_url, model, provider) = match result {
            Ok(rendered) => rendered,
            Err(err) if err.is_retryable() => {
                return Err(EngineError::GenerationFailed {
                    attempts,
                    source: Box::new(err),
                })
            }
            Err(err) => return Err(err),
        };

        let record = CardRecord {
            user_id,
            topic: card.topic.clone(),
            title: card.title.clone(),
            image_url,
            model,
            created_at: self.clock.now(),
        };
        self.repo.save_card(&record).await?;

        CARDS_GENERATED_TOTAL.with_label_values(&[provider]).inc();
        tracing::info!(user_id, title = %record.title, provider, "Card generated");
        Ok(Some(record))
    }

    async fn render(&self, card: &PendingCard) -> EngineResult<(String, String, &'static str)> {
        let slot = self.pool.choose().ok_or(EngineError::NoProvider("image"))?;
        let provider = slot.kind().as_str();
        let prompt = self.prompts.card_prompt(&card.title, card.age);

        let raw = match track_provider_call(provider, slot.client.get_response(&slot.model, &prompt)).await {
            Ok(raw) => raw,
            Err(e) => {
                let err = classify(provider, e);
                record_generation_attempt(provider, if err.is_retryable() { "transient" } else { "fatal" });
                return Err(err);
            }
        };
        record_generation_attempt(provider, "success");

        let model = slot.client.extract_model_name(&raw);
        let url = match &raw {
            RawResult::Binary { bytes, .. } => format!("data:image/png;base64,{}", STANDARD.encode(bytes)),
            RawResult::Json(_) => slot
                .client
                .extract_text(&raw)
                .map_err(|e| classify(provider, e))?,
        };
        Ok((url, model, provider))
    }
}
