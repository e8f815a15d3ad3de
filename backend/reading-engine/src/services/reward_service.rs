use anyhow::anyhow;
use chrono::NaiveDate;
use std::sync::Arc;

use crate::errors::EngineResult;
use crate::metrics::record_points;
use crate::models::{ReadingSession, RewardLine, RewardOutcome, StreakRecord, UserId};
use crate::store::ReadingRepository;
use crate::utils::time::Clock;

/// `max(1, ⌊words / 10⌋)`, scaled down by half the mistake ratio; nothing when every answer was wrong.
pub fn calculate_points(word_count: usize, mistakes: u32, total_questions: usize) -> u32 {
    let base = ((word_count as f64 * 0.1).floor() as u32).max(1);
    if total_questions == 0 {
        return base;
    }
    if mistakes as usize >= total_questions {
        return 0;
    }
    let ratio = f64::from(mistakes) / total_questions as f64;
    ((f64::from(base) * (1.0 - 0.5 * ratio)).floor() as u32).max(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreakUpdate {
    /// Record to persist, `None` when the streak was already counted today.
    pub record: Option<StreakRecord>,
    pub bonus: u32,
}

/// Bonus only when the previous reward was exactly yesterday.
pub fn advance_streak(
    previous: Option<&StreakRecord>,
    user_id: UserId,
    today: NaiveDate,
    bonus: u32,
) -> StreakUpdate {
    let fresh = |streak: u32| StreakRecord {
        user_id,
        last_reward_date: today,
        current_streak: streak,
    };

    match previous {
        Some(prev) if prev.last_reward_date == today => StreakUpdate {
            record: None,
            bonus: 0,
        },
        Some(prev) if today.pred_opt() == Some(prev.last_reward_date) => StreakUpdate {
            record: Some(fresh(prev.current_streak + 1)),
            bonus,
        },
        _ => StreakUpdate {
            record: Some(fresh(1)),
            bonus: 0,
        },
    }
}

/// Turns a completed session into ledger, streak and counter writes.
pub struct RewardService {
    repo: Arc<dyn ReadingRepository>,
    clock: Arc<dyn Clock>,
    streak_bonus: u32,
}

impl RewardService {
    pub fn new(repo: Arc<dyn ReadingRepository>, clock: Arc<dyn Clock>, streak_bonus: u32) -> Self {
        Self {
            repo,
            clock,
            streak_bonus,
        }
    }

    /// Idempotent per session id. The reward line is written first and fixes
    /// every amount; each later write is guarded by the session id so a retry
    /// after any failure applies the missing steps exactly once.
    pub async fn settle(&self, session: &ReadingSession) -> EngineResult<RewardOutcome> {
        let line = match self.repo.find_reward_line(&session.id).await? {
            Some(existing) => existing,
            None => self.open_line(session).await?,
        };
        self.credit(&line).await
    }

    async fn open_line(&self, session: &ReadingSession) -> EngineResult<RewardLine> {
        let streak = self.repo.get_streak(session.user_id).await?;
        let update = advance_streak(
            streak.as_ref(),
            session.user_id,
            self.clock.today(),
            self.streak_bonus,
        );

        let line = RewardLine {
            session_id: session.id.clone(),
            user_id: session.user_id,
            topic: session.topic.clone(),
            points: calculate_points(
                session.word_count,
                session.mistake_count,
                session.total_questions(),
            ),
            streak_bonus: update.bonus,
            mistakes: session.mistake_count,
            total_questions: session.total_questions() as u32,
            word_count: session.word_count as u32,
            streak: update.record,
            credited: false,
            created_at: self.clock.now(),
        };

        if self.repo.insert_reward_line(&line).await? {
            return Ok(line);
        }

        // lost a race with another settlement of the same session
        self.repo
            .find_reward_line(&session.id)
            .await?
            .ok_or_else(|| anyhow!("Reward line for session {} vanished", session.id).into())
    }

    async fn credit(&self, line: &RewardLine) -> EngineResult<RewardOutcome> {
        if line.credited {
            tracing::debug!(session_id = %line.session_id, "Session already settled");
            return Ok(line.outcome());
        }

        if let Some(record) = &line.streak {
            let current = self.repo.get_streak(line.user_id).await?;
            if current.map_or(true, |c| c.last_reward_date < record.last_reward_date) {
                self.repo.save_streak(record).await?;
            }
        }

        let earned = line.earned();
        if earned > 0 {
            match self
                .repo
                .add_points(line.user_id, &line.session_id, i64::from(earned))
                .await?
            {
                Some(total) => {
                    tracing::info!(
                        user_id = line.user_id,
                        points = line.points,
                        streak_bonus = line.streak_bonus,
                        total,
                        "Points credited"
                    );
                    record_points(line.points, line.streak_bonus);
                }
                None => tracing::debug!(session_id = %line.session_id, "Points already credited"),
            }
        }
        self.repo
            .increment_theme(line.user_id, &line.topic, &line.session_id)
            .await?;
        self.repo.mark_reward_credited(&line.session_id).await?;

        Ok(line.outcome())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn points_follow_mistake_ratio() {
        assert_eq!(calculate_points(100, 0, 3), 10);
        assert_eq!(calculate_points(100, 1, 3), 8);
        assert_eq!(calculate_points(100, 2, 3), 6);
        assert_eq!(calculate_points(100, 3, 3), 0);
    }

    #[test]
    fn short_texts_still_earn_a_point() {
        assert_eq!(calculate_points(5, 0, 3), 1);
        assert_eq!(calculate_points(12, 2, 3), 1);
    }

    #[test]
    fn first_reward_starts_streak_without_bonus() {
        let update = advance_streak(None, 1, day(10), 5);
        assert_eq!(update.bonus, 0);
        assert_eq!(update.record.unwrap().current_streak, 1);
    }

    #[test]
    fn consecutive_day_grants_bonus() {
        let prev = StreakRecord {
            user_id: 1,
            last_reward_date: day(10),
            current_streak: 1,
        };
        let update = advance_streak(Some(&prev), 1, day(11), 5);
        assert_eq!(update.bonus, 5);
        assert_eq!(update.record.unwrap().current_streak, 2);
    }

    #[test]
    fn gap_resets_streak() {
        let prev = StreakRecord {
            user_id: 1,
            last_reward_date: day(10),
            current_streak: 4,
        };
        let update = advance_streak(Some(&prev), 1, day(12), 5);
        assert_eq!(update.bonus, 0);
        assert_eq!(update.record.unwrap().current_streak, 1);
    }

    #[test]
    fn same_day_leaves_streak_alone() {
        let prev = StreakRecord {
            user_id: 1,
            last_reward_date: day(10),
            current_streak: 3,
        };
        let update = advance_streak(Some(&prev), 1, day(10), 5);
        assert_eq!(update, StreakUpdate { record: None, bonus: 0 });
    }
}
