//! Quiz round state machine.
//!
//! `AwaitingFirstQuestion → QuestionShown → Completed`. Pure: no I/O, the
//! engine persists the session between transitions.

use chrono::{DateTime, Utc};
use rand::seq::{IndexedRandom, SliceRandom};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::errors::{EngineError, EngineResult};
use crate::models::{GeneratedContent, QuestionView, ReadingSession, SessionStatus, UserId};

/// Result of one answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Next(QuestionView),
    Finished { won: bool },
}

/// Everything needed to open a round besides the generated content.
#[derive(Debug, Clone)]
pub struct RoundContext {
    pub user_id: UserId,
    pub category: String,
    pub topic: String,
    pub age: u32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct QuizMachine {
    max_mistakes: u32,
}

impl QuizMachine {
    pub fn new(max_mistakes: u32) -> Self {
        Self {
            max_mistakes: max_mistakes.max(1),
        }
    }

    pub fn max_mistakes(&self) -> u32 {
        self.max_mistakes
    }

    /// Builds the session and puts its first question on screen.
    pub fn begin(&self, ctx: RoundContext, content: GeneratedContent) -> ReadingSession {
        let word_count = content.word_count();
        let mut session = ReadingSession {
            id: Uuid::new_v4().to_string(),
            user_id: ctx.user_id,
            topic: ctx.topic,
            category: ctx.category,
            age: ctx.age,
            questions: content.qa,
            asked: BTreeSet::new(),
            current_question: 0,
            shown_options: Vec::new(),
            current_correct_option: String::new(),
            mistake_count: 0,
            won: false,
            card_title: content.card,
            word_count,
            full_text: content.text,
            model: content.model,
            status: SessionStatus::AwaitingFirstQuestion,
            started_at: ctx.started_at,
        };

        if let Some(first) = pick_unasked(&session) {
            show_question(&mut session, first);
        }
        session
    }

    /// Applies the option the user tapped, by its index in the shown order.
    pub fn answer(&self, session: &mut ReadingSession, chosen: usize) -> EngineResult<Transition> {
        if session.status != SessionStatus::QuestionShown {
            return Err(EngineError::SessionNotFound);
        }
        let picked = session
            .shown_options
            .get(chosen)
            .ok_or(EngineError::InvalidOption {
                index: chosen,
                available: session.shown_options.len(),
            })?;

        if *picked == session.current_correct_option {
            session.status = SessionStatus::Completed;
            session.won = true;
            return Ok(Transition::Finished { won: true });
        }

        session.mistake_count += 1;
        if session.mistake_count >= self.max_mistakes {
            session.status = SessionStatus::Completed;
            return Ok(Transition::Finished { won: false });
        }

        match pick_unasked(session) {
            Some(next) => {
                show_question(session, next);
                session
                    .question_view()
                    .map(Transition::Next)
                    .ok_or(EngineError::SessionNotFound)
            }
            // every question was used up before the mistake ceiling
            None => {
                session.status = SessionStatus::Completed;
                Ok(Transition::Finished { won: false })
            }
        }
    }
}

fn pick_unasked(session: &ReadingSession) -> Option<usize> {
    let unasked: Vec<usize> = (0..session.questions.len())
        .filter(|idx| !session.asked.contains(idx))
        .collect();
    unasked.choose(&mut rand::rng()).copied()
}

fn show_question(session: &mut ReadingSession, idx: usize) {
    let Some(question) = session.questions.get(idx) else {
        return;
    };
    let mut options = question.options.clone();
    options.shuffle(&mut rand::rng());

    session.current_correct_option = question.correct_option().to_string();
    session.shown_options = options;
    session.current_question = idx;
    session.asked.insert(idx);
    session.status = SessionStatus::QuestionShown;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuizQuestion;

    fn content() -> GeneratedContent {
        let q = |n: usize| QuizQuestion {
            question: format!("Question {}", n),
            options: vec![format!("right {}", n), format!("wrong {}a", n), format!("wrong {}b", n)],
        };
        GeneratedContent {
            text: "word ".repeat(100),
            card: "Lava".to_string(),
            qa: vec![q(0), q(1), q(2)],
            model: "test".to_string(),
        }
    }

    fn ctx() -> RoundContext {
        RoundContext {
            user_id: 1,
            category: "Nature".into(),
            topic: "Volcanoes".into(),
            age: 10,
            started_at: Utc::now(),
        }
    }

    fn correct_index(session: &ReadingSession) -> usize {
        session
            .shown_options
            .iter()
            .position(|o| *o == session.current_correct_option)
            .unwrap()
    }

    fn wrong_index(session: &ReadingSession) -> usize {
        session
            .shown_options
            .iter()
            .position(|o| *o != session.current_correct_option)
            .unwrap()
    }

    #[test]
    fn begin_shows_one_question() {
        let session = QuizMachine::new(3).begin(ctx(), content());
        assert_eq!(session.status, SessionStatus::QuestionShown);
        assert_eq!(session.asked.len(), 1);
        assert_eq!(session.word_count, 100);
        assert!(session.asked.contains(&session.current_question));
        assert!(session.current_correct_option.starts_with("right"));
    }

    #[test]
    fn correct_answer_wins() {
        let machine = QuizMachine::new(3);
        let mut session = machine.begin(ctx(), content());
        let idx = correct_index(&session);
        assert_eq!(
            machine.answer(&mut session, idx).unwrap(),
            Transition::Finished { won: true }
        );
        assert_eq!(session.mistake_count, 0);
        assert!(session.won);
    }

    #[test]
    fn wrong_answer_moves_to_unasked_question() {
        let machine = QuizMachine::new(3);
        let mut session = machine.begin(ctx(), content());
        let first = session.current_question;
        let idx = wrong_index(&session);

        match machine.answer(&mut session, idx).unwrap() {
            Transition::Next(view) => {
                assert_eq!(view.number, 2);
                assert_eq!(view.mistakes, 1);
            }
            other => panic!("unexpected transition {:?}", other),
        }
        assert_ne!(session.current_question, first);
        assert_eq!(session.asked.len(), 2);
    }

    #[test]
    fn three_mistakes_end_the_round() {
        let machine = QuizMachine::new(3);
        let mut session = machine.begin(ctx(), content());

        for _ in 0..2 {
            let idx = wrong_index(&session);
            assert!(matches!(
                machine.answer(&mut session, idx).unwrap(),
                Transition::Next(_)
            ));
        }
        let idx = wrong_index(&session);
        assert_eq!(
            machine.answer(&mut session, idx).unwrap(),
            Transition::Finished { won: false }
        );
        assert_eq!(session.mistake_count, 3);
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[test]
    fn mistake_ceiling_below_pool_still_terminates() {
        let machine = QuizMachine::new(2);
        let mut session = machine.begin(ctx(), content());
        let idx = wrong_index(&session);
        machine.answer(&mut session, idx).unwrap();
        let idx = wrong_index(&session);
        assert_eq!(
            machine.answer(&mut session, idx).unwrap(),
            Transition::Finished { won: false }
        );
        assert_eq!(session.asked.len(), 2);
    }

    #[test]
    fn exhausted_pool_ends_the_round() {
        let machine = QuizMachine::new(10);
        let mut session = machine.begin(ctx(), content());
        for _ in 0..2 {
            let idx = wrong_index(&session);
            machine.answer(&mut session, idx).unwrap();
        }
        let idx = wrong_index(&session);
        assert_eq!(
            machine.answer(&mut session, idx).unwrap(),
            Transition::Finished { won: false }
        );
    }

    #[test]
    fn out_of_range_option_is_rejected() {
        let machine = QuizMachine::new(3);
        let mut session = machine.begin(ctx(), content());
        assert!(matches!(
            machine.answer(&mut session, 7),
            Err(EngineError::InvalidOption { index: 7, available: 3 })
        ));
        assert_eq!(session.mistake_count, 0);
    }

    #[test]
    fn completed_session_accepts_no_answers() {
        let machine = QuizMachine::new(3);
        let mut session = machine.begin(ctx(), content());
        let idx = correct_index(&session);
        machine.answer(&mut session, idx).unwrap();
        assert!(matches!(
            machine.answer(&mut session, 0),
            Err(EngineError::SessionNotFound)
        ));
    }
}
