//! Tolerant JSON extraction from free-form generated text.
//!
//! The gateway does not guarantee well-formed structured output: replies
//! may carry prose, markdown fences, or trailing commentary around the
//! object we asked for. This module is the single place that turns such a
//! reply into a `serde_json::Value`, with an explicit failure result -
//! callers decide whether a failure triggers a repair re-prompt.
//!
//! Intentionally not too smart: try a fenced ```json block first, then the
//! outermost `{…}` span. Anything beyond that is the model's problem.

use thiserror::Error;

/// Why extraction failed.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("empty output")]
    Empty,

    #[error("no JSON object found in output")]
    NoObject,

    #[error("candidate span is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Extract the JSON object embedded in `text`.
pub fn json_object(text: &str) -> Result<serde_json::Value, ExtractError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExtractError::Empty);
    }

    let candidate = fenced_block(trimmed)
        .or_else(|| brace_span(trimmed))
        .ok_or(ExtractError::NoObject)?;

    let value: serde_json::Value = serde_json::from_str(candidate)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(ExtractError::NoObject)
    }
}

/// Contents of the first ```json fenced block, if any.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```json")?;
    let body = &text[start + 7..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// The outermost `{…}` span, if any.
fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}
