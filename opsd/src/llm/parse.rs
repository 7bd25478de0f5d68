//! Structured-response parser
//!
//! Grammar accepted from the generator:
//!
//! ```text
//! response  := reasoning? payload trailing?
//! reasoning := "<think>" text "</think>" | free text
//! payload   := "```" lang? NL json-object "```" | json-object
//! ```
//!
//! The payload must be a single JSON object. Text after it is ignored.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Longest excerpt of offending text kept in an error
const EXCERPT_CHARS: usize = 400;

/// Why a response could not be turned into a JSON object
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty response")]
    Empty,

    #[error("No JSON object found in response: {text}")]
    NoJson { text: String },

    #[error("Malformed JSON ({message}) in: {text}")]
    Malformed { message: String, text: String },

    #[error("Expected a JSON object but found {found}: {text}")]
    NotAnObject { found: String, text: String },

    #[error("Response does not match the expected shape ({message}): {text}")]
    Schema { message: String, text: String },
}

/// A parsed response: optional reasoning plus the JSON object payload
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub reasoning: Option<String>,
    pub value: Map<String, Value>,
}

/// Parse raw generator output into reasoning and a JSON object
pub fn parse_response(raw: &str) -> Result<ParsedResponse, ParseError> {
    debug!(raw_len = raw.len(), "parse_response: called");
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    let (thoughts, rest) = strip_think_blocks(trimmed);

    let (before, payload) = match find_fenced(&rest) {
        Some((before, body)) => {
            debug!("parse_response: using fenced block");
            (before, body)
        }
        None => match find_object(&rest)? {
            Some((before, body)) => {
                debug!("parse_response: using bare object");
                (before, body)
            }
            None => {
                debug!("parse_response: no object found");
                return Err(not_object_or_missing(&rest));
            }
        },
    };

    let value: Value = serde_json::from_str(payload.trim()).map_err(|e| ParseError::Malformed {
        message: e.to_string(),
        text: excerpt(&payload),
    })?;
    let value = match value {
        Value::Object(map) => map,
        other => {
            return Err(ParseError::NotAnObject {
                found: kind_of(&other).to_string(),
                text: excerpt(&payload),
            });
        }
    };

    let reasoning = [thoughts, before.trim().to_string()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    Ok(ParsedResponse {
        reasoning: (!reasoning.is_empty()).then_some(reasoning),
        value,
    })
}

/// Parse and deserialize the payload into `T`
pub fn parse_typed<T: DeserializeOwned>(raw: &str) -> Result<(Option<String>, T), ParseError> {
    let parsed = parse_response(raw)?;
    let object = Value::Object(parsed.value);
    let text = excerpt(&object.to_string());
    let typed = serde_json::from_value(object).map_err(|e| ParseError::Schema {
        message: e.to_string(),
        text,
    })?;
    Ok((parsed.reasoning, typed))
}

/// Remove `<think>…</think>` blocks, returning their joined contents and the remainder
fn strip_think_blocks(text: &str) -> (String, String) {
    let mut thoughts = Vec::new();
    let mut rest = String::new();
    let mut cursor = text;
    while let Some(start) = cursor.find("<think>") {
        rest.push_str(&cursor[..start]);
        let after = &cursor[start + "<think>".len()..];
        match after.find("</think>") {
            Some(end) => {
                thoughts.push(after[..end].trim().to_string());
                cursor = &after[end + "</think>".len()..];
            }
            None => {
                // Unterminated block swallows the rest
                thoughts.push(after.trim().to_string());
                cursor = "";
            }
        }
    }
    rest.push_str(cursor);
    (thoughts.join("\n"), rest)
}

/// Locate the first ``` fenced block; returns (text before, block body)
fn find_fenced(text: &str) -> Option<(String, String)> {
    let open = text.find("```")?;
    let after_ticks = &text[open + 3..];
    // Skip an optional language tag on the opening line
    let body_start = after_ticks.find('\n').map(|i| i + 1)?;
    let body = &after_ticks[body_start..];
    let close = body.find("```")?;
    Some((text[..open].to_string(), body[..close].to_string()))
}

/// Locate the first `{` that opens a valid JSON object; returns (text before, object text)
///
/// Braces in free-text reasoning are skipped. When no candidate parses, the
/// error of the earliest candidate is reported.
fn find_object(text: &str) -> Result<Option<(String, String)>, ParseError> {
    let mut first_error = None;
    for (start, _) in text.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(_))) => {
                let end = start + stream.byte_offset();
                debug!(%start, %end, "find_object: candidate parsed");
                return Ok(Some((text[..start].to_string(), text[start..end].to_string())));
            }
            Some(Ok(_)) | None => {}
            Some(Err(e)) => {
                if first_error.is_none() {
                    let message = if e.is_eof() {
                        "unterminated object".to_string()
                    } else {
                        e.to_string()
                    };
                    first_error = Some(ParseError::Malformed {
                        message,
                        text: excerpt(&text[start..]),
                    });
                }
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

fn not_object_or_missing(text: &str) -> ParseError {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(other) => ParseError::NotAnObject {
            found: kind_of(&other).to_string(),
            text: excerpt(text),
        },
        Err(_) => ParseError::NoJson { text: excerpt(text) },
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn excerpt(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
