use thiserror::Error;

use crate::models::LockKind;
use crate::providers::ProviderError;

/// Structural problem found while normalizing a provider payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid generated content: field `{field}` {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Timeout, rate-limit or 5xx from a provider. Retried by the orchestrator.
    #[error("provider {provider} transient failure: {source}")]
    ProviderTransient {
        provider: &'static str,
        #[source]
        source: ProviderError,
    },

    /// Non-retryable provider failure (auth, 4xx other than rate-limit).
    #[error("provider {provider} fatal failure: {source}")]
    ProviderFatal {
        provider: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("generation failed after {attempts} attempts: {source}")]
    GenerationFailed {
        attempts: usize,
        #[source]
        source: Box<EngineError>,
    },

    #[error("{0} generation already in progress")]
    AlreadyInProgress(LockKind),

    #[error("daily limit of {limit} generations reached for topic {topic}")]
    QuotaExceeded { topic: String, limit: u32 },

    #[error("unknown category {0}")]
    UnknownCategory(String),

    #[error("unknown topic {topic} in category {category}")]
    UnknownTopic { category: String, topic: String },

    #[error("no active reading session")]
    SessionNotFound,

    #[error("no card waiting to be generated")]
    NoCardPending,

    #[error("option index {index} is out of range (0..{available})")]
    InvalidOption { index: usize, available: usize },

    #[error("no {0} provider configured")]
    NoProvider(&'static str),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether the orchestrator may spend another attempt after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ProviderTransient { .. } | EngineError::Validation(_)
        )
    }

    /// Plain-language message for the chat front-end.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::AlreadyInProgress(kind) => kind.wait_message().to_string(),
            EngineError::QuotaExceeded { .. } => {
                "You have answered every question on this topic today. Try again tomorrow!"
                    .to_string()
            }
            EngineError::SessionNotFound => {
                "This quiz is over. Pick a topic to start a new one.".to_string()
            }
            EngineError::NoCardPending => {
                "Win a quiz round first to earn a card!".to_string()
            }
            EngineError::InvalidOption { .. } => "Please pick one of the offered answers.".to_string(),
            EngineError::GenerationFailed { .. }
            | EngineError::ProviderTransient { .. }
            | EngineError::Validation(_) => {
                "Text generation failed. Please try again in a couple of minutes!".to_string()
            }
            _ => "Something went wrong. Please try again later.".to_string(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
