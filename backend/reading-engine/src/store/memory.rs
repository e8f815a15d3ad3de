//! In-process stores for tests and local runs. Expiry follows the tokio clock,
//! so paused-time tests can fast-forward TTLs.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{HistorySink, KeyValueStore, ReadingRepository, HISTORY_LIMIT};
use crate::models::{CardRecord, QuotaRecord, RewardLine, StreakRecord, UserId, UserProgress};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(at) => at > now,
            None => true,
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn expiry(ttl: Option<Duration>) -> Option<Instant> {
    ttl.map(|ttl| Instant::now() + ttl)
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: expiry(ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: expiry(Some(ttl)),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries.remove(key).is_some_and(|entry| entry.is_live(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries.get(key).is_some_and(|entry| entry.is_live(now)))
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let (current, expires_at) = match entries.get(key).filter(|entry| entry.is_live(now)) {
            Some(entry) => (
                entry
                    .value
                    .parse::<i64>()
                    .map_err(|_| anyhow::anyhow!("value at {} is not an integer", key))?,
                entry.expires_at,
            ),
            None => (0, None),
        };
        let next = current + 1;
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn scan_count(&self, prefix: &str) -> Result<u64> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
            .count() as u64)
    }
}

#[derive(Debug, Default)]
struct RepositoryState {
    quota: Vec<QuotaRecord>,
    streaks: HashMap<UserId, StreakRecord>,
    reward_lines: HashMap<String, RewardLine>,
    ledger: HashMap<UserId, i64>,
    ledger_sessions: HashSet<String>,
    themes: HashMap<UserId, BTreeMap<String, u32>>,
    theme_sessions: HashSet<String>,
    answers: HashMap<UserId, (u32, u32)>,
    cards: Vec<CardRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: Mutex<RepositoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reward_lines_for(&self, user_id: UserId) -> Vec<RewardLine> {
        let state = self.state.lock().await;
        let mut lines: Vec<RewardLine> = state
            .reward_lines
            .values()
            .filter(|line| line.user_id == user_id)
            .cloned()
            .collect();
        lines.sort_by_key(|line| line.created_at);
        lines
    }

    pub async fn cards_for(&self, user_id: UserId) -> Vec<CardRecord> {
        let state = self.state.lock().await;
        state
            .cards
            .iter()
            .filter(|card| card.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ReadingRepository for MemoryRepository {
    async fn append_quota_record(&self, record: &QuotaRecord) -> Result<()> {
        self.state.lock().await.quota.push(record.clone());
        Ok(())
    }

    async fn count_quota_records(
        &self,
        user_id: UserId,
        topic: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state
            .quota
            .iter()
            .filter(|r| {
                r.user_id == user_id && r.topic == topic && r.created_at >= from && r.created_at < to
            })
            .count() as u64)
    }

    async fn get_streak(&self, user_id: UserId) -> Result<Option<StreakRecord>> {
        Ok(self.state.lock().await.streaks.get(&user_id).cloned())
    }

    async fn save_streak(&self, record: &StreakRecord) -> Result<()> {
        self.state
            .lock()
            .await
            .streaks
            .insert(record.user_id, record.clone());
        Ok(())
    }

    async fn insert_reward_line(&self, line: &RewardLine) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.reward_lines.contains_key(&line.session_id) {
            return Ok(false);
        }
        state
            .reward_lines
            .insert(line.session_id.clone(), line.clone());
        Ok(true)
    }

    async fn find_reward_line(&self, session_id: &str) -> Result<Option<RewardLine>> {
        Ok(self.state.lock().await.reward_lines.get(session_id).cloned())
    }

    async fn mark_reward_credited(&self, session_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(line) = state.reward_lines.get_mut(session_id) {
            line.credited = true;
        }
        Ok(())
    }

    async fn add_points(
        &self,
        user_id: UserId,
        session_id: &str,
        points: i64,
    ) -> Result<Option<i64>> {
        let mut state = self.state.lock().await;
        if !state.ledger_sessions.insert(session_id.to_string()) {
            return Ok(None);
        }
        let total = state.ledger.entry(user_id).or_insert(0);
        *total += points;
        Ok(Some(*total))
    }

    async fn increment_theme(
        &self,
        user_id: UserId,
        topic: &str,
        session_id: &str,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.theme_sessions.insert(session_id.to_string()) {
            return Ok(false);
        }
        *state
            .themes
            .entry(user_id)
            .or_default()
            .entry(topic.to_string())
            .or_insert(0) += 1;
        Ok(true)
    }

    async fn record_answer(&self, user_id: UserId, correct: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let (total, ok) = state.answers.entry(user_id).or_insert((0, 0));
        *total += 1;
        if correct {
            *ok += 1;
        }
        Ok(())
    }

    async fn card_exists(&self, user_id: UserId, topic: &str, title: &str) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state
            .cards
            .iter()
            .any(|c| c.user_id == user_id && c.topic == topic && c.title == title))
    }

    async fn save_card(&self, card: &CardRecord) -> Result<()> {
        self.state.lock().await.cards.push(card.clone());
        Ok(())
    }

    async fn user_progress(&self, user_id: UserId) -> Result<UserProgress> {
        let state = self.state.lock().await;
        let (answered_total, answered_correct) =
            state.answers.get(&user_id).copied().unwrap_or_default();
        Ok(UserProgress {
            user_id,
            points: state.ledger.get(&user_id).copied().unwrap_or(0),
            streak: state
                .streaks
                .get(&user_id)
                .map(|s| s.current_streak)
                .unwrap_or(0),
            answered_total,
            answered_correct,
            themes: state.themes.get(&user_id).cloned().unwrap_or_default(),
            card_count: state.cards.iter().filter(|c| c.user_id == user_id).count() as u64,
        })
    }
}

#[derive(Debug, Default)]
pub struct MemoryHistory {
    texts: Mutex<HashMap<UserId, VecDeque<String>>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn texts_for(&self, user_id: UserId) -> Vec<String> {
        let texts = self.texts.lock().await;
        texts
            .get(&user_id)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl HistorySink for MemoryHistory {
    async fn remember_text(&self, user_id: UserId, text: &str) -> Result<()> {
        let mut texts = self.texts.lock().await;
        let list = texts.entry(user_id).or_default();
        if list.iter().any(|t| t == text) {
            return Ok(());
        }
        list.push_back(text.to_string());
        while list.len() > HISTORY_LIMIT {
            list.pop_front();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_respects_ttl() {
        let store = MemoryKeyValueStore::new();
        assert!(store
            .set_if_absent("lock", "1", Duration::from_secs(600))
            .await
            .unwrap());
        assert!(!store
            .set_if_absent("lock", "1", Duration::from_secs(600))
            .await
            .unwrap());

        tokio::time::advance(Duration::from_secs(601)).await;
        assert!(!store.exists("lock").await.unwrap());
        assert!(store
            .set_if_absent("lock", "1", Duration::from_secs(600))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn scan_count_matches_prefix() {
        let store = MemoryKeyValueStore::new();
        store.set("reading:session:1", "{}", None).await.unwrap();
        store.set("reading:session:2", "{}", None).await.unwrap();
        store.set("users:1:is_generating_text", "1", None).await.unwrap();

        assert_eq!(store.scan_count("reading:session:").await.unwrap(), 2);
        assert!(store.delete("reading:session:1").await.unwrap());
        assert!(!store.delete("reading:session:1").await.unwrap());
        assert_eq!(store.scan_count("reading:session:").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn incr_starts_from_zero() {
        let store = MemoryKeyValueStore::new();
        assert_eq!(store.incr("counter").await.unwrap(), 1);
        assert_eq!(store.incr("counter").await.unwrap(), 2);

        store.set("text", "abc", None).await.unwrap();
        assert!(store.incr("text").await.is_err());
    }

    #[tokio::test]
    async fn session_is_credited_once() {
        let repo = MemoryRepository::new();
        assert_eq!(repo.add_points(7, "s1", 10).await.unwrap(), Some(10));
        assert_eq!(repo.add_points(7, "s1", 10).await.unwrap(), None);
        assert_eq!(repo.add_points(7, "s2", 4).await.unwrap(), Some(14));

        assert!(repo.increment_theme(7, "Volcanoes", "s1").await.unwrap());
        assert!(!repo.increment_theme(7, "Volcanoes", "s1").await.unwrap());

        let progress = repo.user_progress(7).await.unwrap();
        assert_eq!(progress.points, 14);
        assert_eq!(progress.themes.get("Volcanoes"), Some(&1));
    }

    #[tokio::test]
    async fn history_keeps_unique_texts() {
        let history = MemoryHistory::new();
        history.remember_text(7, "once").await.unwrap();
        history.remember_text(7, "once").await.unwrap();
        history.remember_text(7, "twice").await.unwrap();
        assert_eq!(history.texts_for(7).await, vec!["once", "twice"]);
    }
}
