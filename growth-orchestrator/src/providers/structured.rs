//! JSON extraction from model output
//!
//! Models asked for JSON still wrap it in fences or prepend chatter now and
//! then. These helpers recover the object.

use anyhow::{anyhow, Result};
use serde_json::Value;

/// Extract JSON text from markdown code blocks or raw text
///
/// Handles:
/// - ```json blocks
/// - Generic ``` blocks
/// - Raw JSON with leading or trailing prose
pub fn extract_json(text: &str) -> String {
    let body = if let Some(start) = text.find("```json") {
        fenced_body(text, start + 7)
    } else if let Some(start) = text.find("```") {
        fenced_body(text, start + 3)
    } else {
        text.trim()
    };

    match (body.find('{'), body.rfind('}')) {
        (Some(open), Some(close)) if open < close => body[open..=close].to_string(),
        _ => body.to_string(),
    }
}

fn fenced_body(text: &str, body_start: usize) -> &str {
    let end = text[body_start..]
        .rfind("```")
        .map(|pos| pos + body_start)
        .unwrap_or(text.len());
    text[body_start..end].trim()
}

/// Parse a model answer into a JSON object
pub fn parse_object(text: &str) -> Result<Value> {
    let json = extract_json(text);
    let value: Value = serde_json::from_str(&json).map_err(|e| {
        anyhow!(
            "Model answer is not valid JSON ({}): {}",
            e,
            crate::text::preview(&json, 300)
        )
    })?;

    if value.is_object() {
        Ok(value)
    } else {
        Err(anyhow!("Model answer is JSON but not an object"))
    }
}
