//! Front-end facing entry points of the reading session engine.

use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineSettings;
use crate::errors::{EngineError, EngineResult};
use crate::metrics::{self, SESSIONS_ACTIVE, SESSIONS_TOTAL};
use crate::models::{
    AnswerOutcome, CardRecord, LockKind, QuestionView, ReadingSession, SessionStatus,
    SessionSummary, UserId, UserProgress,
};
use crate::providers::ProviderRegistry;
use crate::services::card_service::{CardService, PendingCard};
use crate::services::generation_service::GenerationService;
use crate::services::lock_service::LockService;
use crate::services::prompt::PromptBuilder;
use crate::services::quiz_service::{QuizMachine, RoundContext, Transition};
use crate::services::quota_service::QuotaService;
use crate::services::reward_service::RewardService;
use crate::store::{HistorySink, KeyValueStore, ReadingRepository};
use crate::utils::time::Clock;

pub const SESSION_KEY_PREFIX: &str = "reading:session:";
pub const PENDING_CARD_KEY_PREFIX: &str = "reading:card:";

/// Collaborators the engine is assembled from.
pub struct EngineDeps {
    pub kv: Arc<dyn KeyValueStore>,
    pub repo: Arc<dyn ReadingRepository>,
    pub history: Arc<dyn HistorySink>,
    pub clock: Arc<dyn Clock>,
    pub providers: ProviderRegistry,
    pub prompts: PromptBuilder,
    pub settings: EngineSettings,
}

pub struct ReadingEngine {
    kv: Arc<dyn KeyValueStore>,
    repo: Arc<dyn ReadingRepository>,
    clock: Arc<dyn Clock>,
    prompts: Arc<PromptBuilder>,
    locks: LockService,
    quota: QuotaService,
    generation: GenerationService,
    quiz: QuizMachine,
    rewards: RewardService,
    cards: CardService,
    session_ttl: Duration,
}

fn session_key(user_id: UserId) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, user_id)
}

fn pending_card_key(user_id: UserId) -> String {
    format!("{}{}", PENDING_CARD_KEY_PREFIX, user_id)
}

impl ReadingEngine {
    pub fn new(deps: EngineDeps) -> Self {
        let EngineDeps {
            kv,
            repo,
            history,
            clock,
            providers,
            prompts,
            settings,
        } = deps;
        let prompts = Arc::new(prompts);
        let retry = settings.retry_config();

        Self {
            locks: LockService::new(
                kv.clone(),
                settings.lock_ttl(),
                settings.active_question_ttl(),
            ),
            quota: QuotaService::new(repo.clone(), clock.clone()),
            generation: GenerationService::new(
                providers.text,
                prompts.clone(),
                history,
                clock.clone(),
                retry.clone(),
            ),
            quiz: QuizMachine::new(settings.max_mistakes),
            rewards: RewardService::new(repo.clone(), clock.clone(), settings.streak_bonus),
            cards: CardService::new(
                providers.image,
                prompts.clone(),
                repo.clone(),
                clock.clone(),
                retry,
            ),
            session_ttl: settings.session_ttl(),
            kv,
            repo,
            clock,
            prompts,
        }
    }

    /// Generates a passage for `topic` and opens a quiz round on it.
    ///
    /// Rejected with [`EngineError::AlreadyInProgress`] while another text
    /// generation runs for the user and with [`EngineError::QuotaExceeded`]
    /// once the topic's daily limit is used up. A previous unfinished round is
    /// discarded when generation starts.
    pub async fn start_session(
        &self,
        user_id: UserId,
        category: &str,
        topic: &str,
        age: u32,
    ) -> EngineResult<SessionSummary> {
        self.locks
            .with_lock(user_id, LockKind::Text, async {
                let resolved = self.prompts.resolve(category, topic)?;
                self.quota.ensure_available(user_id, &resolved.topic).await?;

                self.discard_session(user_id, "replaced").await?;
                self.locks.clear_active_question(user_id).await?;

                let content = self.generation.generate(user_id, &resolved, age).await?;
                self.quota.record(user_id, &resolved.topic).await?;

                let session = self.quiz.begin(
                    RoundContext {
                        user_id,
                        category: resolved.category.clone(),
                        topic: resolved.topic.clone(),
                        age,
                        started_at: self.clock.now(),
                    },
                    content,
                );
                let first_question = session
                    .question_view()
                    .ok_or_else(|| anyhow::anyhow!("Generated session has no questions"))?;

                self.save_session(&session).await?;
                self.locks.set_active_question(user_id).await?;

                SESSIONS_TOTAL.with_label_values(&["created"]).inc();
                SESSIONS_ACTIVE.inc();
                tracing::info!(
                    user_id,
                    session_id = %session.id,
                    topic = %session.topic,
                    model = %session.model,
                    words = session.word_count,
                    "Reading session started"
                );

                Ok(SessionSummary {
                    session_id: session.id,
                    topic: session.topic,
                    full_text: session.full_text,
                    word_count: session.word_count,
                    card_title: session.card_title,
                    first_question,
                })
            })
            .await
    }

    /// Applies one answer to the user's round. A completed round is settled
    /// and removed; settlement is resumed if a previous attempt failed midway.
    pub async fn submit_answer(
        &self,
        user_id: UserId,
        option_index: usize,
    ) -> EngineResult<AnswerOutcome> {
        self.locks
            .with_lock(user_id, LockKind::Answer, async {
                if self.locks.is_busy(user_id, LockKind::Text).await? {
                    return Err(EngineError::AlreadyInProgress(LockKind::Text));
                }
                let mut session = self
                    .load_session(user_id)
                    .await?
                    .ok_or(EngineError::SessionNotFound)?;

                if session.status == SessionStatus::Completed {
                    tracing::warn!(user_id, session_id = %session.id, "Resuming settlement");
                    return self.finish(&session).await;
                }

                let transition = self.quiz.answer(&mut session, option_index)?;
                self.save_session(&session).await?;

                let correct = matches!(transition, Transition::Finished { won: true });
                self.repo.record_answer(user_id, correct).await?;
                metrics::record_answer(correct);

                match transition {
                    Transition::Next(question) => {
                        self.locks.touch_active_question(user_id).await?;
                        Ok(AnswerOutcome::NextQuestion { question })
                    }
                    Transition::Finished { .. } => self.finish(&session).await,
                }
            })
            .await
    }

    async fn finish(&self, session: &ReadingSession) -> EngineResult<AnswerOutcome> {
        let reward = self.rewards.settle(session).await?;

        if session.won {
            let pending = PendingCard {
                topic: session.topic.clone(),
                title: session.card_title.clone(),
                age: session.age,
            };
            let payload = serde_json::to_string(&pending).map_err(anyhow::Error::from)?;
            self.kv
                .set(&pending_card_key(session.user_id), &payload, Some(self.session_ttl))
                .await?;
        }

        self.kv.delete(&session_key(session.user_id)).await?;
        self.locks.clear_active_question(session.user_id).await?;

        SESSIONS_TOTAL
            .with_label_values(&[if session.won { "won" } else { "lost" }])
            .inc();
        SESSIONS_ACTIVE.dec();
        tracing::info!(
            user_id = session.user_id,
            session_id = %session.id,
            won = session.won,
            mistakes = session.mistake_count,
            points = reward.points,
            streak_bonus = reward.streak_bonus,
            "Reading session completed"
        );

        Ok(AnswerOutcome::Completed {
            won: session.won,
            mistakes: session.mistake_count,
            total_questions: session.total_questions(),
            word_count: session.word_count,
            points: reward.points,
            streak_bonus: reward.streak_bonus,
            card_eligible: session.won,
        })
    }

    pub async fn is_busy(&self, user_id: UserId, kind: LockKind) -> EngineResult<bool> {
        self.locks.is_busy(user_id, kind).await
    }

    /// The question currently on screen, for re-rendering.
    pub async fn current_question(&self, user_id: UserId) -> EngineResult<QuestionView> {
        let session = self
            .load_session(user_id)
            .await?
            .ok_or(EngineError::SessionNotFound)?;
        if session.status != SessionStatus::QuestionShown {
            return Err(EngineError::SessionNotFound);
        }
        session.question_view().ok_or(EngineError::SessionNotFound)
    }

    /// Drops the round without reward. `false` when there was none.
    pub async fn abandon(&self, user_id: UserId) -> EngineResult<bool> {
        let removed = self.discard_session(user_id, "abandoned").await?;
        self.locks.clear_active_question(user_id).await?;
        if removed {
            tracing::info!(user_id, "Reading session abandoned");
        }
        Ok(removed)
    }

    /// Draws the card earned by the last won round. `Ok(None)` for a duplicate.
    pub async fn generate_card(&self, user_id: UserId) -> EngineResult<Option<CardRecord>> {
        self.locks
            .with_lock(user_id, LockKind::Image, async {
                let key = pending_card_key(user_id);
                let payload = self.kv.get(&key).await?.ok_or(EngineError::NoCardPending)?;
                let pending: PendingCard =
                    serde_json::from_str(&payload).map_err(anyhow::Error::from)?;

                let card = self.cards.generate(user_id, &pending).await?;
                self.kv.delete(&key).await?;
                Ok(card)
            })
            .await
    }

    pub async fn generations_today(&self, user_id: UserId, topic: &str) -> EngineResult<u64> {
        self.quota.count_today(user_id, topic).await
    }

    pub async fn user_progress(&self, user_id: UserId) -> EngineResult<UserProgress> {
        Ok(self.repo.user_progress(user_id).await?)
    }

    /// Rounds currently held in the key-value store.
    pub async fn active_sessions(&self) -> EngineResult<u64> {
        Ok(self.kv.scan_count(SESSION_KEY_PREFIX).await?)
    }

    pub async fn load_session(&self, user_id: UserId) -> EngineResult<Option<ReadingSession>> {
        let Some(raw) = self.kv.get(&session_key(user_id)).await? else {
            return Ok(None);
        };
        let session = serde_json::from_str(&raw).map_err(anyhow::Error::from)?;
        Ok(Some(session))
    }

    async fn save_session(&self, session: &ReadingSession) -> EngineResult<()> {
        let raw = serde_json::to_string(session).map_err(anyhow::Error::from)?;
        self.kv
            .set(&session_key(session.user_id), &raw, Some(self.session_ttl))
            .await?;
        Ok(())
    }

    async fn discard_session(&self, user_id: UserId, reason: &str) -> EngineResult<bool> {
        let removed = self.kv.delete(&session_key(user_id)).await?;
        if removed {
            SESSIONS_TOTAL.with_label_values(&[reason]).inc();
            SESSIONS_ACTIVE.dec();
        }
        Ok(removed)
    }
}
