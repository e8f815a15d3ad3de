use serde::{Deserialize, Serialize};

/// Question as rendered for the user, options already shuffled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionView {
    pub question: String,
    pub options: Vec<String>,
    /// 1-based position of this question within the round.
    pub number: usize,
    pub mistakes: u32,
}

/// What the front-end receives after a successful `start_session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub topic: String,
    pub full_text: String,
    pub word_count: usize,
    pub card_title: String,
    pub first_question: QuestionView,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerOutcome {
    NextQuestion {
        question: QuestionView,
    },
    Completed {
        won: bool,
        mistakes: u32,
        total_questions: usize,
        word_count: usize,
        points: u32,
        streak_bonus: u32,
        /// A won round may be turned into a card image.
        card_eligible: bool,
    },
}

impl AnswerOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, AnswerOutcome::Completed { .. })
    }
}
