use std::sync::Arc;

use crate::errors::{EngineError, EngineResult};
use crate::metrics::QUOTA_REJECTIONS_TOTAL;
use crate::models::{QuotaRecord, UserId};
use crate::store::ReadingRepository;
use crate::utils::time::{local_day_bounds, Clock};

/// Generations allowed per user and topic per server-local calendar day.
pub const DAILY_LIMIT_PER_TOPIC: u32 = 5;

pub struct QuotaService {
    repo: Arc<dyn ReadingRepository>,
    clock: Arc<dyn Clock>,
}

impl QuotaService {
    pub fn new(repo: Arc<dyn ReadingRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    pub async fn count_today(&self, user_id: UserId, topic: &str) -> EngineResult<u64> {
        let (from, to) = local_day_bounds(self.clock.today());
        Ok(self
            .repo
            .count_quota_records(user_id, topic, from, to)
            .await?)
    }

    pub async fn has_exceeded(&self, user_id: UserId, topic: &str) -> EngineResult<bool> {
        Ok(self.count_today(user_id, topic).await? >= u64::from(DAILY_LIMIT_PER_TOPIC))
    }

    pub async fn ensure_available(&self, user_id: UserId, topic: &str) -> EngineResult<()> {
        if self.has_exceeded(user_id, topic).await? {
            QUOTA_REJECTIONS_TOTAL.inc();
            tracing::info!(user_id, topic, "Daily topic quota reached");
            return Err(EngineError::QuotaExceeded {
                topic: topic.to_string(),
                limit: DAILY_LIMIT_PER_TOPIC,
            });
        }
        Ok(())
    }

    /// Appends one generation event; awaited so the next check sees it.
    pub async fn record(&self, user_id: UserId, topic: &str) -> EngineResult<()> {
        self.repo
            .append_quota_record(&QuotaRecord {
                user_id,
                topic: topic.to_string(),
                created_at: self.clock.now(),
            })
            .await?;
        Ok(())
    }
}
