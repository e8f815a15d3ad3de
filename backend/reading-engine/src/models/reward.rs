use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::UserId;

/// One successful generation. Only appended and counted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaRecord {
    pub user_id: UserId,
    pub topic: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreakRecord {
    pub user_id: UserId,
    pub last_reward_date: NaiveDate,
    pub current_streak: u32,
}

/// Per-session audit line; `session_id` is unique.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardLine {
    pub session_id: String,
    pub user_id: UserId,
    pub topic: String,
    pub points: u32,
    pub streak_bonus: u32,
    pub mistakes: u32,
    pub total_questions: u32,
    pub word_count: u32,
    /// Streak state this settlement moves to; `None` when today was already counted.
    #[serde(default)]
    pub streak: Option<StreakRecord>,
    /// Set once every write the line describes has been applied.
    pub credited: bool,
    pub created_at: DateTime<Utc>,
}

impl RewardLine {
    pub fn earned(&self) -> u32 {
        self.points + self.streak_bonus
    }

    pub fn outcome(&self) -> RewardOutcome {
        RewardOutcome {
            points: self.points,
            streak_bonus: self.streak_bonus,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardOutcome {
    pub points: u32,
    pub streak_bonus: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardRecord {
    pub user_id: UserId,
    pub topic: String,
    pub title: String,
    /// Remote URL or an inline `data:` URL for binary payloads.
    pub image_url: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProgress {
    pub user_id: UserId,
    pub points: i64,
    pub streak: u32,
    pub answered_total: u32,
    pub answered_correct: u32,
    pub themes: BTreeMap<String, u32>,
    pub card_count: u64,
}
