use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument, UpdateOptions};
use mongodb::{Database, IndexModel};
use std::collections::BTreeMap;

use super::{HistorySink, ReadingRepository, APPLIED_SESSIONS_KEPT, HISTORY_LIMIT};
use crate::metrics::track_db_operation;
use crate::models::{CardRecord, QuotaRecord, RewardLine, StreakRecord, UserId, UserProgress};
use crate::utils::time::chrono_to_bson;

const QUOTA_RECORDS: &str = "quota_records";
const REWARD_LEDGER: &str = "reward_ledger";
const REWARD_LINES: &str = "reward_lines";
const STREAKS: &str = "streaks";
const THEME_STATS: &str = "theme_stats";
const ANSWER_STATS: &str = "answer_stats";
const CARDS: &str = "cards";
const HISTORY: &str = "history";

const DATE_FORMAT: &str = "%Y-%m-%d";

// Guarded upserts surface a duplicate `_id` as a command error from findAndModify.
fn is_duplicate_key(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == 11000,
        ErrorKind::Command(command_error) => command_error.code == 11000,
        _ => false,
    }
}

fn bson_to_chrono(value: mongodb::bson::DateTime) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(value.timestamp_millis())
        .ok_or_else(|| anyhow!("Timestamp out of range"))
}

fn as_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

#[derive(Clone)]
pub struct MongoRepository {
    mongo: Database,
}

impl MongoRepository {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    /// Indexes backing the per-day quota count and card de-duplication.
    pub async fn ensure_indexes(&self) -> Result<()> {
        self.mongo
            .collection::<Document>(QUOTA_RECORDS)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "topic": 1, "created_at": 1 })
                    .build(),
            )
            .await
            .context("Failed to create quota_records index")?;

        self.mongo
            .collection::<Document>(CARDS)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "topic": 1, "title": 1 })
                    .build(),
            )
            .await
            .context("Failed to create cards index")?;

        Ok(())
    }

    fn reward_line_from_doc(document: &Document) -> Result<RewardLine> {
        let user_id = document.get_i64("user_id")?;
        let streak = match document.get_str("streak_date") {
            Ok(date) => Some(StreakRecord {
                user_id,
                last_reward_date: NaiveDate::parse_from_str(date, DATE_FORMAT)
                    .context("Stored reward line streak date is malformed")?,
                current_streak: as_u32(document.get_i64("streak_length")?),
            }),
            Err(_) => None,
        };
        Ok(RewardLine {
            session_id: document.get_str("_id")?.to_string(),
            user_id,
            topic: document.get_str("topic")?.to_string(),
            points: as_u32(document.get_i64("points")?),
            streak_bonus: as_u32(document.get_i64("streak_bonus")?),
            mistakes: as_u32(document.get_i64("mistakes")?),
            total_questions: as_u32(document.get_i64("total_questions")?),
            word_count: as_u32(document.get_i64("word_count")?),
            streak,
            credited: document.get_bool("credited").unwrap_or(false),
            created_at: bson_to_chrono(*document.get_datetime("created_at")?)?,
        })
    }
}

#[async_trait]
impl ReadingRepository for MongoRepository {
    async fn append_quota_record(&self, record: &QuotaRecord) -> Result<()> {
        let collection = self.mongo.collection::<Document>(QUOTA_RECORDS);
        track_db_operation("insert_one", QUOTA_RECORDS, async {
            collection
                .insert_one(doc! {
                    "user_id": record.user_id,
                    "topic": &record.topic,
                    "created_at": chrono_to_bson(record.created_at),
                })
                .await
                .context("Failed to append quota record")?;
            Ok(())
        })
        .await
    }

    async fn count_quota_records(
        &self,
        user_id: UserId,
        topic: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64> {
        let collection = self.mongo.collection::<Document>(QUOTA_RECORDS);
        track_db_operation("count_documents", QUOTA_RECORDS, async {
            collection
                .count_documents(doc! {
                    "user_id": user_id,
                    "topic": topic,
                    "created_at": { "$gte": chrono_to_bson(from), "$lt": chrono_to_bson(to) },
                })
                .await
                .context("Failed to count quota records")
        })
        .await
    }

    async fn get_streak(&self, user_id: UserId) -> Result<Option<StreakRecord>> {
        let collection = self.mongo.collection::<Document>(STREAKS);
        let found = track_db_operation("find_one", STREAKS, async {
            collection
                .find_one(doc! { "_id": user_id })
                .await
                .context("Failed to load streak")
        })
        .await?;

        let Some(document) = found else {
            return Ok(None);
        };

        let last_reward_date = NaiveDate::parse_from_str(document.get_str("last_reward_date")?, DATE_FORMAT)
            .context("Stored streak date is malformed")?;
        Ok(Some(StreakRecord {
            user_id,
            last_reward_date,
            current_streak: as_u32(document.get_i64("current_streak")?),
        }))
    }

    async fn save_streak(&self, record: &StreakRecord) -> Result<()> {
        let collection = self.mongo.collection::<Document>(STREAKS);
        track_db_operation("update_one", STREAKS, async {
            collection
                .update_one(
                    doc! { "_id": record.user_id },
                    doc! { "$set": {
                        "last_reward_date": record.last_reward_date.format(DATE_FORMAT).to_string(),
                        "current_streak": i64::from(record.current_streak),
                    } },
                )
                .with_options(UpdateOptions::builder().upsert(true).build())
                .await
                .context("Failed to save streak")?;
            Ok(())
        })
        .await
    }

    async fn insert_reward_line(&self, line: &RewardLine) -> Result<bool> {
        let collection = self.mongo.collection::<Document>(REWARD_LINES);
        track_db_operation("insert_one", REWARD_LINES, async {
            let mut document = doc! {
                "_id": &line.session_id,
                "user_id": line.user_id,
                "topic": &line.topic,
                "points": i64::from(line.points),
                "streak_bonus": i64::from(line.streak_bonus),
                "mistakes": i64::from(line.mistakes),
                "total_questions": i64::from(line.total_questions),
                "word_count": i64::from(line.word_count),
                "credited": line.credited,
                "created_at": chrono_to_bson(line.created_at),
            };
            if let Some(streak) = &line.streak {
                document.insert(
                    "streak_date",
                    streak.last_reward_date.format(DATE_FORMAT).to_string(),
                );
                document.insert("streak_length", i64::from(streak.current_streak));
            }
            let result = collection.insert_one(document).await;

            match result {
                Ok(_) => Ok(true),
                Err(err) if is_duplicate_key(&err) => Ok(false),
                Err(err) => Err(anyhow::Error::new(err).context("Failed to insert reward line")),
            }
        })
        .await
    }

    async fn find_reward_line(&self, session_id: &str) -> Result<Option<RewardLine>> {
        let collection = self.mongo.collection::<Document>(REWARD_LINES);
        let found = track_db_operation("find_one", REWARD_LINES, async {
            collection
                .find_one(doc! { "_id": session_id })
                .await
                .context("Failed to load reward line")
        })
        .await?;

        found.as_ref().map(Self::reward_line_from_doc).transpose()
    }

    async fn mark_reward_credited(&self, session_id: &str) -> Result<()> {
        let collection = self.mongo.collection::<Document>(REWARD_LINES);
        track_db_operation("update_one", REWARD_LINES, async {
            collection
                .update_one(doc! { "_id": session_id }, doc! { "$set": { "credited": true } })
                .await
                .context("Failed to mark reward line credited")?;
            Ok(())
        })
        .await
    }

    // The `$ne` filter misses once the session is recorded, and the upsert
    // then collides on `_id`, which is how a repeat is detected.
    async fn add_points(
        &self,
        user_id: UserId,
        session_id: &str,
        points: i64,
    ) -> Result<Option<i64>> {
        let collection = self.mongo.collection::<Document>(REWARD_LEDGER);
        track_db_operation("find_one_and_update", REWARD_LEDGER, async {
            let result = collection
                .find_one_and_update(
                    doc! { "_id": user_id, "applied_sessions": { "$ne": session_id } },
                    doc! {
                        "$inc": { "points": points },
                        "$set": { "updated_at": chrono_to_bson(Utc::now()) },
                        "$push": { "applied_sessions": {
                            "$each": [session_id],
                            "$slice": -APPLIED_SESSIONS_KEPT,
                        } },
                    },
                )
                .with_options(
                    FindOneAndUpdateOptions::builder()
                        .upsert(true)
                        .return_document(ReturnDocument::After)
                        .build(),
                )
                .await;

            match result {
                Ok(Some(document)) => Ok(Some(document.get_i64("points")?)),
                Ok(None) => Err(anyhow!("Ledger row missing after upsert")),
                Err(err) if is_duplicate_key(&err) => Ok(None),
                Err(err) => Err(anyhow::Error::new(err).context("Failed to credit points")),
            }
        })
        .await
    }

    async fn increment_theme(
        &self,
        user_id: UserId,
        topic: &str,
        session_id: &str,
    ) -> Result<bool> {
        let collection = self.mongo.collection::<Document>(THEME_STATS);
        track_db_operation("update_one", THEME_STATS, async {
            let result = collection
                .update_one(
                    doc! {
                        "_id": format!("{}:{}", user_id, topic),
                        "applied_sessions": { "$ne": session_id },
                    },
                    doc! {
                        "$inc": { "count": 1_i64 },
                        "$setOnInsert": { "user_id": user_id, "topic": topic },
                        "$push": { "applied_sessions": {
                            "$each": [session_id],
                            "$slice": -APPLIED_SESSIONS_KEPT,
                        } },
                    },
                )
                .with_options(UpdateOptions::builder().upsert(true).build())
                .await;

            match result {
                Ok(_) => Ok(true),
                Err(err) if is_duplicate_key(&err) => Ok(false),
                Err(err) => Err(anyhow::Error::new(err).context("Failed to increment theme counter")),
            }
        })
        .await
    }

    async fn record_answer(&self, user_id: UserId, correct: bool) -> Result<()> {
        let collection = self.mongo.collection::<Document>(ANSWER_STATS);
        let correct_inc: i64 = if correct { 1 } else { 0 };
        track_db_operation("update_one", ANSWER_STATS, async {
            collection
                .update_one(
                    doc! { "_id": user_id },
                    doc! { "$inc": { "q_tot": 1_i64, "q_ok": correct_inc } },
                )
                .with_options(UpdateOptions::builder().upsert(true).build())
                .await
                .context("Failed to record answer stats")?;
            Ok(())
        })
        .await
    }

    async fn card_exists(&self, user_id: UserId, topic: &str, title: &str) -> Result<bool> {
        let collection = self.mongo.collection::<Document>(CARDS);
        let count = track_db_operation("count_documents", CARDS, async {
            collection
                .count_documents(doc! { "user_id": user_id, "topic": topic, "title": title })
                .await
                .context("Failed to look up card")
        })
        .await?;
        Ok(count > 0)
    }

    async fn save_card(&self, card: &CardRecord) -> Result<()> {
        let collection = self.mongo.collection::<Document>(CARDS);
        track_db_operation("insert_one", CARDS, async {
            collection
                .insert_one(doc! {
                    "user_id": card.user_id,
                    "topic": &card.topic,
                    "title": &card.title,
                    "image_url": &card.image_url,
                    "model": &card.model,
                    "created_at": chrono_to_bson(card.created_at),
                })
                .await
                .context("Failed to save card")?;
            Ok(())
        })
        .await
    }

    async fn user_progress(&self, user_id: UserId) -> Result<UserProgress> {
        let mut progress = UserProgress {
            user_id,
            ..UserProgress::default()
        };

        let ledger = self.mongo.collection::<Document>(REWARD_LEDGER);
        if let Some(row) = ledger
            .find_one(doc! { "_id": user_id })
            .await
            .context("Failed to load ledger")?
        {
            progress.points = row.get_i64("points").unwrap_or(0);
        }

        if let Some(streak) = self.get_streak(user_id).await? {
            progress.streak = streak.current_streak;
        }

        let answers = self.mongo.collection::<Document>(ANSWER_STATS);
        if let Some(row) = answers
            .find_one(doc! { "_id": user_id })
            .await
            .context("Failed to load answer stats")?
        {
            progress.answered_total = as_u32(row.get_i64("q_tot").unwrap_or(0));
            progress.answered_correct = as_u32(row.get_i64("q_ok").unwrap_or(0));
        }

        let themes: Vec<Document> = self
            .mongo
            .collection::<Document>(THEME_STATS)
            .find(doc! { "user_id": user_id })
            .await
            .context("Failed to load theme counters")?
            .try_collect()
            .await
            .context("Failed to read theme counters")?;
        progress.themes = themes
            .iter()
            .filter_map(|row| {
                let topic = row.get_str("topic").ok()?.to_string();
                Some((topic, as_u32(row.get_i64("count").unwrap_or(0))))
            })
            .collect::<BTreeMap<_, _>>();

        progress.card_count = self
            .mongo
            .collection::<Document>(CARDS)
            .count_documents(doc! { "user_id": user_id })
            .await
            .context("Failed to count cards")?;

        Ok(progress)
    }
}

/// Per-user list of accepted texts, one document per user.
#[derive(Clone)]
pub struct MongoHistory {
    mongo: Database,
}

impl MongoHistory {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }
}

#[async_trait]
impl HistorySink for MongoHistory {
    async fn remember_text(&self, user_id: UserId, text: &str) -> Result<()> {
        let collection = self.mongo.collection::<Document>(HISTORY);
        let keep_last = -(HISTORY_LIMIT as i64);
        track_db_operation("update_one", HISTORY, async {
            let result = collection
                .update_one(
                    doc! { "_id": user_id, "texts": { "$ne": text } },
                    doc! { "$push": { "texts": { "$each": [text], "$slice": keep_last } } },
                )
                .with_options(UpdateOptions::builder().upsert(true).build())
                .await;

            match result {
                Ok(_) => Ok(()),
                // upsert collided with the user's document: the text is already there
                Err(err) if is_duplicate_key(&err) => Ok(()),
                Err(err) => Err(anyhow::Error::new(err).context("Failed to remember text")),
            }
        })
        .await
    }
}
