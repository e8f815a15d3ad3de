//! Topic catalog and prompt construction.

use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::Deserialize;

use crate::errors::{EngineError, EngineResult};

pub const MIN_TEXT_LENGTH: f64 = 150.0;
pub const MAX_TEXT_LENGTH: f64 = 1000.0;
pub const MIN_AGE: u32 = 6;
pub const MAX_AGE: u32 = 25;

const READING_TEMPLATE: &str = r#"You are an experienced author and subject expert. Write an informative, well-structured and engaging text on the topic "{topic}" with the context "{instruction}" for a {age}-year-old reader (maximum number of characters: {length}). The text must read as one coherent piece. Rely only on verified sources, encyclopedias and scientific journals.
Structure: pick one interesting fact, example, question, problem or paradox from the topic and tell about it, then briefly compare it with similar phenomena in other countries, epochs or fields.
Style: under 12 years plain and friendly with simple examples and small stories; 13 to 17 lively with some analysis and links to modern interests; adults neutral or professional.
Do not describe the topic itself. Avoid clichés. Explain difficult terms with simple words or analogies.
After the text write exactly 3 questions that can only be answered from the text. Every question has three options: the first is always correct, the other two are plausible but wrong. No option is longer than four words.
Answer with a single valid JSON object and nothing else:
{"text": "<the whole text on one line, paragraphs separated by \n\n>", "card": "<one word or phrase from the text>", "qa": [{"question": "<string>", "options": ["<string>", "<string>", "<string>"]}, {"question": "<string>", "options": ["<string>", "<string>", "<string>"]}, {"question": "<string>", "options": ["<string>", "<string>", "<string>"]}]}
Rules: all keys and strings in double quotes; exactly three items in qa; exactly three items in every options list; card must occur in text; no markdown, comments or real line breaks inside "text"."#;

const SCHOOL_TEMPLATE: &str = r#"You are an experienced teacher. Explain a question from the school curriculum in the subject {instruction} for a {age}-year-old pupil (maximum number of characters: {length}). Take the pupil's age and grade into account. Rely only on verified sources, encyclopedias and school textbooks.
Style: under 12 years plain and friendly. Do not describe the topic itself. Avoid clichés.
After the text give 3 questions strictly about its content, each with 3 options of at most 4 words, where the first option is correct and the other two are plausible but wrong.
Answer with a single valid JSON object only:
{"text": "<string>", "card": "<key word or phrase from the text>", "qa": [{"question": "<string>", "options": ["<string>", "<string>", "<string>"]}, ... exactly 3 items]}
Rules: all keys and strings in double quotes; exactly three items in qa; exactly three items in every options list; card must occur in text; no comments, explanations or markdown."#;

const CARD_TEMPLATE: &str = r#"Create a high-resolution image on the theme of "{title}" for an audience aged {age} years.
Format: {format}.
Art style: {style}.
Use an artistic approach with an emotional atmosphere, detailed elements and thoughtful composition. Pick a color palette and imagery that appeal to this age group without overload. Convey the main idea through expressive details and original symbols, avoid clichés and overused techniques. If needed, add the theme title as text integrated into the composition."#;

const CARD_FORMATS: [&str; 3] = ["collectible card, portrait orientation", "square poster", "book illustration"];
const CARD_STYLES: [&str; 4] = ["watercolor", "digital painting", "paper cut-out", "retro comic"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTemplate {
    #[default]
    Reading,
    School,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicEntry {
    pub name: String,
    pub instruction: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryEntry {
    pub name: String,
    #[serde(default)]
    pub template: PromptTemplate,
    pub topics: Vec<TopicEntry>,
}

/// Category → topic → instruction map.
#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    pub categories: Vec<CategoryEntry>,
}

/// Topic resolved against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTopic {
    pub category: String,
    pub topic: String,
    pub instruction: String,
    pub template: PromptTemplate,
}

impl Catalog {
    /// Reads a TOML (or any format the `config` crate knows) catalog file.
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?
            .try_deserialize()
    }

    pub fn builtin() -> Self {
        let topic = |name: &str, instruction: &str| TopicEntry {
            name: name.to_string(),
            instruction: instruction.to_string(),
        };
        Self {
            categories: vec![
                CategoryEntry {
                    name: "Nature".to_string(),
                    template: PromptTemplate::Reading,
                    topics: vec![
                        topic("Volcanoes", "how volcanoes form and why they erupt"),
                        topic("Oceans", "life in the deep ocean"),
                        topic("Animals", "unusual animal behaviour"),
                    ],
                },
                CategoryEntry {
                    name: "Space".to_string(),
                    template: PromptTemplate::Reading,
                    topics: vec![
                        topic("Planets", "planets of the solar system"),
                        topic("Stars", "how stars are born and die"),
                    ],
                },
                CategoryEntry {
                    name: "History".to_string(),
                    template: PromptTemplate::Reading,
                    topics: vec![
                        topic("Inventions", "inventions that changed everyday life"),
                        topic("Ancient worlds", "daily life in ancient civilizations"),
                    ],
                },
                CategoryEntry {
                    name: "School".to_string(),
                    template: PromptTemplate::School,
                    topics: vec![
                        topic("Mathematics", "mathematics"),
                        topic("Biology", "biology"),
                        topic("Geography", "geography"),
                    ],
                },
            ],
        }
    }

    /// Looks a topic up; a leading emoji on the category name is ignored.
    pub fn resolve(&self, category: &str, topic: &str) -> EngineResult<ResolvedTopic> {
        let wanted = strip_leading_emoji(category);
        let entry = self
            .categories
            .iter()
            .find(|c| strip_leading_emoji(&c.name).eq_ignore_ascii_case(wanted))
            .ok_or_else(|| EngineError::UnknownCategory(wanted.to_string()))?;

        let found = entry
            .topics
            .iter()
            .find(|t| t.name.trim().eq_ignore_ascii_case(topic.trim()))
            .ok_or_else(|| EngineError::UnknownTopic {
                category: wanted.to_string(),
                topic: topic.to_string(),
            })?;

        Ok(ResolvedTopic {
            category: strip_leading_emoji(&entry.name).to_string(),
            topic: found.name.clone(),
            instruction: found.instruction.clone(),
            template: entry.template,
        })
    }
}

/// "🌋 Nature" → "Nature".
pub fn strip_leading_emoji(name: &str) -> &str {
    name.trim_start_matches(|c: char| !c.is_alphanumeric()).trim()
}

/// Character budget grows exponentially from 150 at age 6 to 1000 at age 25.
pub fn length_by_age(age: u32) -> usize {
    let age = age.clamp(MIN_AGE, MAX_AGE);
    let exponent = f64::from(age - MIN_AGE) / f64::from(MAX_AGE - MIN_AGE);
    let value = MIN_TEXT_LENGTH
        + (MAX_TEXT_LENGTH - MIN_TEXT_LENGTH) * (exponent.exp() - 1.0) / (std::f64::consts::E - 1.0);
    // guards against exp(1) landing a hair below e
    (value + 1e-9) as usize
}

fn seed_prefix(now: DateTime<Utc>) -> String {
    let mut rng = rand::rng();
    format!("[SEED:{}-{}]", rng.random_range(1000..=9999), now.timestamp())
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    catalog: Catalog,
}

impl PromptBuilder {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn resolve(&self, category: &str, topic: &str) -> EngineResult<ResolvedTopic> {
        self.catalog.resolve(category, topic)
    }

    /// Text prompt, prefixed with a fresh seed so repeated calls differ.
    pub fn text_prompt(&self, resolved: &ResolvedTopic, age: u32, now: DateTime<Utc>) -> String {
        let template = match resolved.template {
            PromptTemplate::Reading => READING_TEMPLATE,
            PromptTemplate::School => SCHOOL_TEMPLATE,
        };
        let body = template
            .replace("{topic}", &resolved.topic)
            .replace("{instruction}", &resolved.instruction)
            .replace("{age}", &age.to_string())
            .replace("{length}", &length_by_age(age).to_string());
        format!("{} {}", seed_prefix(now), body)
    }

    pub fn card_prompt(&self, title: &str, age: u32) -> String {
        let mut rng = rand::rng();
        let format = CARD_FORMATS.choose(&mut rng).copied().unwrap_or(CARD_FORMATS[0]);
        let style = CARD_STYLES.choose(&mut rng).copied().unwrap_or(CARD_STYLES[0]);
        CARD_TEMPLATE
            .replace("{title}", title)
            .replace("{age}", &age.to_string())
            .replace("{format}", format)
            .replace("{style}", style)
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(Catalog::builtin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn length_is_bounded_by_age() {
        assert_eq!(length_by_age(6), 150);
        assert_eq!(length_by_age(25), 1000);
        assert_eq!(length_by_age(3), 150);
        assert_eq!(length_by_age(60), 1000);
        assert!(length_by_age(12) < length_by_age(18));
    }

    #[test]
    fn emoji_prefix_is_ignored() {
        assert_eq!(strip_leading_emoji("🌋 Nature"), "Nature");
        assert_eq!(strip_leading_emoji("Nature"), "Nature");

        let catalog = Catalog::builtin();
        let resolved = catalog.resolve("🌋 Nature", "Volcanoes").unwrap();
        assert_eq!(resolved.category, "Nature");
        assert_eq!(resolved.template, PromptTemplate::Reading);
    }

    #[test]
    fn unknown_names_are_rejected() {
        let catalog = Catalog::builtin();
        assert!(matches!(
            catalog.resolve("Cooking", "Bread"),
            Err(EngineError::UnknownCategory(_))
        ));
        assert!(matches!(
            catalog.resolve("Nature", "Bread"),
            Err(EngineError::UnknownTopic { .. })
        ));
    }

    #[test]
    fn school_category_uses_school_template() {
        let builder = PromptBuilder::default();
        let resolved = builder.resolve("School", "Biology").unwrap();
        let prompt = builder.text_prompt(&resolved, 10, Utc::now());
        assert!(prompt.starts_with("[SEED:"));
        assert!(prompt.contains("school curriculum"));
        assert!(prompt.contains("10-year-old"));
    }

    #[test]
    fn reading_prompt_carries_topic_and_length() {
        let builder = PromptBuilder::default();
        let resolved = builder.resolve("Space", "Stars").unwrap();
        let prompt = builder.text_prompt(&resolved, 25, Utc::now());
        assert!(prompt.contains("\"Stars\""));
        assert!(prompt.contains("maximum number of characters: 1000"));
    }

    #[test]
    fn seed_uses_given_time() {
        let builder = PromptBuilder::default();
        let resolved = builder.resolve("Space", "Stars").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();

        let prompt = builder.text_prompt(&resolved, 12, now);

        let seed = prompt.split(' ').next().unwrap();
        assert!(seed.ends_with(&format!("-{}]", now.timestamp())), "{}", seed);
    }

    #[test]
    fn sample_catalog_file_loads() {
        let catalog = Catalog::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/config/catalog.toml"))
            .unwrap();
        let resolved = catalog.resolve("School", "mathematics").unwrap();
        assert_eq!(resolved.topic, "Mathematics");
        assert_eq!(resolved.template, PromptTemplate::School);
        assert_eq!(catalog.resolve("Nature", "Oceans").unwrap().category, "Nature");
    }
}
