#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reading_engine::{
    config::EngineSettings,
    models::{
        AnswerOutcome, CardRecord, QuestionView, QuotaRecord, RewardLine, StreakRecord, UserId,
        UserProgress,
    },
    providers::{
        Provider, ProviderError, ProviderKind, ProviderPool, ProviderRegistry, ProviderSlot,
        RawResult,
    },
    services::{prompt::PromptBuilder, EngineDeps, ReadingEngine},
    store::{MemoryHistory, MemoryKeyValueStore, MemoryRepository, ReadingRepository},
    utils::time::ManualClock,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const USER: UserId = 4242;
pub const CATEGORY: &str = "Nature";
pub const TOPIC: &str = "Volcanoes";
pub const AGE: u32 = 10;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Provider that replays queued responses, then falls back to a default one.
pub struct ScriptedProvider {
    kind: ProviderKind,
    queue: Mutex<VecDeque<Result<RawResult, ProviderError>>>,
    fallback: Value,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn text() -> Self {
        Self::new(ProviderKind::OpenAi, Value::String(passage_payload(100)))
    }

    pub fn image() -> Self {
        Self::new(
            ProviderKind::Cloudflare,
            json!({ "url": "https://cards.example/volcano.png" }),
        )
    }

    fn new(kind: ProviderKind, fallback: Value) -> Self {
        Self {
            kind,
            queue: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_ok(&self, raw: RawResult) {
        self.queue.lock().unwrap().push_back(Ok(raw));
    }

    pub fn push_text(&self, text: &str) {
        self.push_ok(RawResult::Json(Value::String(text.to_string())));
    }

    pub fn push_err(&self, err: ProviderError) {
        self.queue.lock().unwrap().push_back(Err(err));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn get_response(&self, _model: &str, _prompt: &str) -> Result<RawResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.queue.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(RawResult::Json(self.fallback.clone())))
    }

    fn extract_text(&self, raw: &RawResult) -> Result<String, ProviderError> {
        match raw {
            RawResult::Json(Value::String(text)) => Ok(text.clone()),
            RawResult::Json(value) => value
                .get("url")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ProviderError::Malformed("no text in scripted payload".into())),
            RawResult::Binary { .. } => {
                Err(ProviderError::Malformed("binary payload has no text".into()))
            }
        }
    }

    fn extract_model_name(&self, raw: &RawResult) -> String {
        match raw {
            RawResult::Binary { model, .. } => model.clone(),
            RawResult::Json(_) => "scripted-model".to_string(),
        }
    }
}

/// A well-formed `{text, card, qa}` answer of `words` words. Correct options
/// start with "Right", the rest with "Wrong".
pub fn passage_payload(words: usize) -> String {
    let text = (0..words)
        .map(|i| if i % 10 == 9 { "lava." } else { "lava" })
        .collect::<Vec<_>>()
        .join(" ");
    json!({
        "text": text,
        "card": "Lava",
        "qa": (1..=3)
            .map(|n| json!({
                "question": format!("Question {}?", n),
                "options": [format!("Right {}", n), format!("Wrong {}a", n), format!("Wrong {}b", n)],
            }))
            .collect::<Vec<_>>(),
    })
    .to_string()
}

pub fn right_option(question: &QuestionView) -> usize {
    question
        .options
        .iter()
        .position(|o| o.starts_with("Right"))
        .expect("scripted question has a right option")
}

pub fn wrong_option(question: &QuestionView) -> usize {
    question
        .options
        .iter()
        .position(|o| o.starts_with("Wrong"))
        .expect("scripted question has a wrong option")
}

pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        backoff_base_ms: 1,
        backoff_max_ms: 2,
        ..EngineSettings::default()
    }
}

/// Repository operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepoOp {
    SaveStreak,
    InsertRewardLine,
    MarkRewardCredited,
    AddPoints,
    IncrementTheme,
}

/// Wraps [`MemoryRepository`] and fails chosen operations a set number of
/// times before passing them through, as a dropped Mongo connection would.
pub struct FlakyRepository {
    inner: Arc<MemoryRepository>,
    failures: Mutex<HashMap<RepoOp, usize>>,
}

impl FlakyRepository {
    pub fn new(inner: Arc<MemoryRepository>) -> Self {
        Self {
            inner,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn fail_next(&self, op: RepoOp) {
        *self.failures.lock().unwrap().entry(op).or_insert(0) += 1;
    }

    fn check(&self, op: RepoOp) -> anyhow::Result<()> {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&op) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(anyhow!("mongo connection reset during {:?}", op))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ReadingRepository for FlakyRepository {
    async fn append_quota_record(&self, record: &QuotaRecord) -> anyhow::Result<()> {
        self.inner.append_quota_record(record).await
    }

    async fn count_quota_records(
        &self,
        user_id: UserId,
        topic: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        self.inner.count_quota_records(user_id, topic, from, to).await
    }

    async fn get_streak(&self, user_id: UserId) -> anyhow::Result<Option<StreakRecord>> {
        self.inner.get_streak(user_id).await
    }

    async fn save_streak(&self, record: &StreakRecord) -> anyhow::Result<()> {
        self.check(RepoOp::SaveStreak)?;
        self.inner.save_streak(record).await
    }

    async fn insert_reward_line(&self, line: &RewardLine) -> anyhow::Result<bool> {
        self.check(RepoOp::InsertRewardLine)?;
        self.inner.insert_reward_line(line).await
    }

    async fn find_reward_line(&self, session_id: &str) -> anyhow::Result<Option<RewardLine>> {
        self.inner.find_reward_line(session_id).await
    }

    async fn mark_reward_credited(&self, session_id: &str) -> anyhow::Result<()> {
        self.check(RepoOp::MarkRewardCredited)?;
        self.inner.mark_reward_credited(session_id).await
    }

    async fn add_points(
        &self,
        user_id: UserId,
        session_id: &str,
        points: i64,
    ) -> anyhow::Result<Option<i64>> {
        self.check(RepoOp::AddPoints)?;
        self.inner.add_points(user_id, session_id, points).await
    }

    async fn increment_theme(
        &self,
        user_id: UserId,
        topic: &str,
        session_id: &str,
    ) -> anyhow::Result<bool> {
        self.check(RepoOp::IncrementTheme)?;
        self.inner.increment_theme(user_id, topic, session_id).await
    }

    async fn record_answer(&self, user_id: UserId, correct: bool) -> anyhow::Result<()> {
        self.inner.record_answer(user_id, correct).await
    }

    async fn card_exists(&self, user_id: UserId, topic: &str, title: &str) -> anyhow::Result<bool> {
        self.inner.card_exists(user_id, topic, title).await
    }

    async fn save_card(&self, card: &CardRecord) -> anyhow::Result<()> {
        self.inner.save_card(card).await
    }

    async fn user_progress(&self, user_id: UserId) -> anyhow::Result<UserProgress> {
        self.inner.user_progress(user_id).await
    }
}

pub struct Harness {
    pub engine: ReadingEngine,
    pub kv: Arc<MemoryKeyValueStore>,
    pub repo: Arc<MemoryRepository>,
    /// What the engine actually talks to; delegates to `repo`.
    pub faults: Arc<FlakyRepository>,
    pub history: Arc<MemoryHistory>,
    pub clock: Arc<ManualClock>,
    pub text: Arc<ScriptedProvider>,
    pub image: Arc<ScriptedProvider>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_text_provider(ScriptedProvider::text())
    }

    pub fn with_text_provider(text: ScriptedProvider) -> Self {
        init_tracing();

        let kv = Arc::new(MemoryKeyValueStore::new());
        let repo = Arc::new(MemoryRepository::new());
        let faults = Arc::new(FlakyRepository::new(repo.clone()));
        let history = Arc::new(MemoryHistory::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap(),
        ));
        let text = Arc::new(text);
        let image = Arc::new(ScriptedProvider::image());

        let engine = ReadingEngine::new(EngineDeps {
            kv: kv.clone(),
            repo: faults.clone(),
            history: history.clone(),
            clock: clock.clone(),
            providers: ProviderRegistry {
                text: ProviderPool::new(vec![ProviderSlot::new(text.clone(), "scripted-text")]),
                image: ProviderPool::new(vec![ProviderSlot::new(image.clone(), "scripted-image")]),
            },
            prompts: PromptBuilder::default(),
            settings: fast_settings(),
        });

        Self {
            engine,
            kv,
            repo,
            faults,
            history,
            clock,
            text,
            image,
        }
    }

    /// Starts a round on the default topic and returns its first question.
    pub async fn start(&self) -> QuestionView {
        self.engine
            .start_session(USER, CATEGORY, TOPIC, AGE)
            .await
            .expect("session starts")
            .first_question
    }

    /// Plays a full round with `mistakes` wrong answers before the right one.
    pub async fn play_round(&self, mistakes: usize) -> AnswerOutcome {
        let mut question = self.start().await;
        for _ in 0..mistakes {
            match self
                .engine
                .submit_answer(USER, wrong_option(&question))
                .await
                .expect("answer accepted")
            {
                AnswerOutcome::NextQuestion { question: next } => question = next,
                completed => return completed,
            }
        }
        self.engine
            .submit_answer(USER, right_option(&question))
            .await
            .expect("answer accepted")
    }
}
