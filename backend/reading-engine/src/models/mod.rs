use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub mod answer;
pub mod content;
pub mod reward;

pub use answer::{AnswerOutcome, QuestionView, SessionSummary};
pub use content::{GeneratedContent, QuizQuestion};
pub use reward::{CardRecord, QuotaRecord, RewardLine, RewardOutcome, StreakRecord, UserProgress};

/// Chat-platform user identifier.
pub type UserId = i64;

/// In-flight quiz round. Stored as JSON in the key-value store under the user id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadingSession {
    pub id: String,
    pub user_id: UserId,
    pub topic: String,
    pub category: String,
    /// Reader age the passage was written for.
    pub age: u32,
    pub questions: Vec<QuizQuestion>,
    /// Indices into `questions` already shown to the user.
    pub asked: BTreeSet<usize>,
    pub current_question: usize,
    /// Options of the current question in the order the user sees them.
    pub shown_options: Vec<String>,
    pub current_correct_option: String,
    pub mistake_count: u32,
    /// Meaningful once `status` is `Completed`.
    #[serde(default)]
    pub won: bool,
    pub card_title: String,
    pub word_count: usize,
    pub full_text: String,
    pub model: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
}

impl ReadingSession {
    pub fn total_questions(&self) -> usize {
        self.questions.len()
    }

    pub fn current(&self) -> Option<&QuizQuestion> {
        self.questions.get(self.current_question)
    }

    pub fn question_view(&self) -> Option<QuestionView> {
        let question = self.current()?;
        Some(QuestionView {
            question: question.question.clone(),
            options: self.shown_options.clone(),
            number: self.asked.len(),
            mistakes: self.mistake_count,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    AwaitingFirstQuestion,
    QuestionShown,
    Completed,
}

/// Class of per-user work guarded by the concurrency guard.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    Text,
    Image,
    /// A question is on screen and waits for an answer.
    AnswerPending,
    /// One answer is being evaluated.
    Answer,
}

impl LockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockKind::Text => "text",
            LockKind::Image => "image",
            LockKind::AnswerPending => "answer_pending",
            LockKind::Answer => "answer",
        }
    }

    pub fn wait_message(&self) -> &'static str {
        match self {
            LockKind::Text => "Please wait until the text has been generated!",
            LockKind::Image => "Please wait until the card has been generated!",
            LockKind::AnswerPending => "Please read the text and answer the question first!",
            LockKind::Answer => "Your answer is being checked, one moment!",
        }
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
