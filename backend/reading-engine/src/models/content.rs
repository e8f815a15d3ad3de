use serde::{Deserialize, Serialize};

/// A comprehension question. By prompt contract `options[0]` is the correct answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
}

impl QuizQuestion {
    pub fn correct_option(&self) -> &str {
        self.options.first().map(String::as_str).unwrap_or_default()
    }
}

/// Canonical passage produced by a provider after normalization and validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratedContent {
    /// Passage text, already split into display paragraphs.
    pub text: String,
    /// Keyword from the passage, used as the card title.
    pub card: String,
    pub qa: Vec<QuizQuestion>,
    /// Model name echoed by the provider.
    #[serde(default)]
    pub model: String,
}

impl GeneratedContent {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}
