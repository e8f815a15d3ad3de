//! Storage seams of the engine.
//!
//! [`KeyValueStore`] holds everything ephemeral (locks, flags, in-flight
//! sessions), [`ReadingRepository`] everything durable, and [`HistorySink`]
//! receives accepted texts. Redis and MongoDB back them in production; the
//! in-memory versions back tests and local runs.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::models::{CardRecord, QuotaRecord, RewardLine, StreakRecord, UserId, UserProgress};

pub mod memory;
pub mod mongo_store;
pub mod redis_store;

pub use memory::{MemoryHistory, MemoryKeyValueStore, MemoryRepository};
pub use mongo_store::{MongoHistory, MongoRepository};
pub use redis_store::RedisKeyValueStore;

/// Cap on remembered texts per user.
pub const HISTORY_LIMIT: usize = 10_000;

/// Session ids kept on ledger and theme rows to make re-applying a no-op.
pub const APPLIED_SESSIONS_KEPT: i32 = 500;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Atomic set-if-absent with expiry. `true` when this call created the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// `true` when a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Increments an integer value, keeping its expiry. Missing keys start at 0.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Number of live keys starting with `prefix`.
    async fn scan_count(&self, prefix: &str) -> Result<u64>;
}

#[async_trait]
pub trait ReadingRepository: Send + Sync {
    async fn append_quota_record(&self, record: &QuotaRecord) -> Result<()>;

    /// Records for `user_id` + `topic` created in `[from, to)`.
    async fn count_quota_records(
        &self,
        user_id: UserId,
        topic: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64>;

    async fn get_streak(&self, user_id: UserId) -> Result<Option<StreakRecord>>;

    async fn save_streak(&self, record: &StreakRecord) -> Result<()>;

    /// `false` when a line for the same session already exists.
    async fn insert_reward_line(&self, line: &RewardLine) -> Result<bool>;

    async fn find_reward_line(&self, session_id: &str) -> Result<Option<RewardLine>>;

    async fn mark_reward_credited(&self, session_id: &str) -> Result<()>;

    /// Adds `session_id`'s points to the user's ledger row and returns the new
    /// total, or `None` when that session was already applied.
    async fn add_points(
        &self,
        user_id: UserId,
        session_id: &str,
        points: i64,
    ) -> Result<Option<i64>>;

    /// `false` when `session_id` was already counted for this theme.
    async fn increment_theme(
        &self,
        user_id: UserId,
        topic: &str,
        session_id: &str,
    ) -> Result<bool>;

    async fn record_answer(&self, user_id: UserId, correct: bool) -> Result<()>;

    async fn card_exists(&self, user_id: UserId, topic: &str, title: &str) -> Result<bool>;

    async fn save_card(&self, card: &CardRecord) -> Result<()>;

    async fn user_progress(&self, user_id: UserId) -> Result<UserProgress>;
}

#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Keeps unique texts only, at most [`HISTORY_LIMIT`] per user.
    async fn remember_text(&self, user_id: UserId, text: &str) -> Result<()>;
}
