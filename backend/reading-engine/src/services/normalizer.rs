//! Turns raw model output into a validated [`GeneratedContent`].
//!
//! Models wrap JSON in code fences, use single quotes, leave trailing commas
//! and emit raw newlines inside strings. All of that is repaired
//! deterministically before parsing; anything still structurally wrong is a
//! [`ValidationError`] naming the offending field.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::errors::ValidationError;
use crate::models::{GeneratedContent, QuizQuestion};

pub const QUESTIONS_PER_TEXT: usize = 3;
pub const OPTIONS_PER_QUESTION: usize = 3;
const SENTENCES_PER_PARAGRAPH: usize = 3;

lazy_static! {
    static ref FENCE_OPEN: Regex = Regex::new(r"(?i)^```(?:json)?\s*").unwrap();
    static ref FENCE_CLOSE: Regex = Regex::new(r"\s*```$").unwrap();
    static ref SENTENCE: Regex = Regex::new(r"[^.!?]+[.!?]").unwrap();
}

/// Full pipeline: repair, parse, validate, paragraph the text.
pub fn normalize(raw: &str, model: &str) -> Result<GeneratedContent, ValidationError> {
    let value = parse_payload(raw)?;
    let mut content = validate(&value)?;
    content.text = split_into_paragraphs(&content.text);
    content.model = model.to_string();
    Ok(content)
}

/// Strips fences, cuts the outermost object and parses it, repairing on failure.
pub fn parse_payload(raw: &str) -> Result<Value, ValidationError> {
    let trimmed = raw.trim();
    let unfenced = FENCE_OPEN.replace(trimmed, "");
    let unfenced = FENCE_CLOSE.replace(&unfenced, "");
    let body = extract_object(unfenced.trim())
        .ok_or_else(|| ValidationError::new("payload", "contains no JSON object"))?;

    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return Ok(value);
    }

    let repaired = repair_json(body);
    serde_json::from_str::<Value>(&repaired)
        .map_err(|e| ValidationError::new("payload", format!("is not valid JSON: {}", e)))
}

fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Single-pass repair outside and inside string literals:
/// single-quoted strings become double-quoted, raw control characters inside
/// strings are escaped and commas before `]` or `}` are dropped.
pub fn repair_json(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    // quote char of the string we are in, if any
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match quote {
            Some(q) => {
                if c == '\\' && i + 1 < chars.len() {
                    let next = chars[i + 1];
                    if next == '\'' {
                        out.push('\'');
                    } else {
                        out.push(c);
                        out.push(next);
                    }
                    i += 2;
                    continue;
                }
                if c == q {
                    out.push('"');
                    quote = None;
                } else if c == '"' {
                    out.push_str("\\\"");
                } else if c == '\n' || c == '\r' {
                    if c == '\r' && chars.get(i + 1) == Some(&'\n') {
                        i += 1;
                    }
                    out.push_str("\\n");
                } else if c == '\t' {
                    out.push_str("\\t");
                } else if c.is_control() {
                    out.push_str(&format!("\\u{:04x}", c as u32));
                } else {
                    out.push(c);
                }
            }
            None => match c {
                '"' | '\'' => {
                    out.push('"');
                    quote = Some(c);
                }
                ',' => {
                    let next_significant = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                    if !matches!(next_significant, Some(']') | Some('}')) {
                        out.push(c);
                    }
                }
                _ => out.push(c),
            },
        }
        i += 1;
    }

    out
}

/// Checks the `{text, card, qa}` shape and builds the content object.
pub fn validate(value: &Value) -> Result<GeneratedContent, ValidationError> {
    let object = value
        .as_object()
        .ok_or_else(|| ValidationError::new("payload", "must be a JSON object"))?;

    let text = non_empty_string(object.get("text"), "text")?;
    let card = non_empty_string(object.get("card"), "card")?;

    let qa = object
        .get("qa")
        .and_then(Value::as_array)
        .ok_or_else(|| ValidationError::new("qa", "must be a list"))?;
    if qa.len() != QUESTIONS_PER_TEXT {
        return Err(ValidationError::new(
            "qa",
            format!("must have exactly {} items, got {}", QUESTIONS_PER_TEXT, qa.len()),
        ));
    }

    let questions = qa
        .iter()
        .enumerate()
        .map(|(idx, item)| validate_question(idx, item))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(GeneratedContent {
        text,
        card,
        qa: questions,
        model: String::new(),
    })
}

fn validate_question(idx: usize, item: &Value) -> Result<QuizQuestion, ValidationError> {
    let field = format!("qa[{}]", idx);
    let object = item
        .as_object()
        .ok_or_else(|| ValidationError::new(&field, "must be an object"))?;

    let question = non_empty_string(object.get("question"), &format!("{}.question", field))?;

    let options_field = format!("{}.options", field);
    let options = object
        .get("options")
        .and_then(Value::as_array)
        .ok_or_else(|| ValidationError::new(&options_field, "must be a list"))?;
    if options.len() != OPTIONS_PER_QUESTION {
        return Err(ValidationError::new(
            &options_field,
            format!(
                "must have exactly {} items, got {}",
                OPTIONS_PER_QUESTION,
                options.len()
            ),
        ));
    }

    let options = options
        .iter()
        .enumerate()
        .map(|(n, option)| option_text(option, &format!("{}[{}]", options_field, n)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(QuizQuestion { question, options })
}

fn non_empty_string(value: Option<&Value>, field: &str) -> Result<String, ValidationError> {
    match value.and_then(Value::as_str).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        Some(_) => Err(ValidationError::new(field, "must not be empty")),
        None => Err(ValidationError::new(field, "must be a string")),
    }
}

fn option_text(value: &Value, field: &str) -> Result<String, ValidationError> {
    // models sometimes answer with bare numbers
    match value {
        Value::Number(n) => Ok(n.to_string()),
        other => non_empty_string(Some(other), field),
    }
}

/// Groups sentences three per paragraph, paragraphs joined by a blank line.
/// A trailing fragment without closing punctuation counts as a last sentence.
pub fn split_into_paragraphs(text: &str) -> String {
    let mut sentences: Vec<&str> = Vec::new();
    let mut consumed = 0;
    for m in SENTENCE.find_iter(text) {
        sentences.push(m.as_str());
        consumed = m.end();
    }
    let tail = &text[consumed..];
    if tail.chars().any(char::is_alphanumeric) {
        sentences.push(tail);
    }
    let paragraphs: Vec<String> = sentences
        .chunks(SENTENCES_PER_PARAGRAPH)
        .map(|chunk| chunk.concat().trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    if paragraphs.is_empty() {
        text.to_string()
    } else {
        paragraphs.join("\n\n")
    }
}
