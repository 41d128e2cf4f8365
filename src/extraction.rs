//! Structured-output extraction
//!
//! Turns a free-text model response into a JSON array of objects. Every call
//! site that expects structured output from the model goes through
//! `extract_json_array`.

use crate::error::{GreenIndexError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    /// First bracketed array of objects, non-greedy, across newlines.
    static ref BRACKETED_ARRAY: Regex = Regex::new(r"(?s)\[\s*\{.*?\}\s*\]").unwrap();
    static ref EMPTY_ARRAY: Regex = Regex::new(r"\[\s*\]").unwrap();
}

/// Keys a JSON-object response may wrap its array in.
const ARRAY_KEYS: [&str; 3] = ["filters", "results", "data"];

pub const NO_STRUCTURED_OUTPUT: &str = "no structured output found";

/// Extract the array of objects from a model response.
///
/// Accepts, in order: the whole response as a JSON array, the whole response
/// as a JSON object wrapping an array (or a single filter object), and finally
/// the first `[{...}]` block embedded in prose.
pub fn extract_json_array(response: &str) -> Result<Vec<Value>> {
    let cleaned = strip_code_fence(response);

    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        if let Some(items) = unwrap_array(value) {
            return Ok(items);
        }
    }

    if let Some(found) = BRACKETED_ARRAY.find(cleaned) {
        return match serde_json::from_str::<Value>(found.as_str()) {
            Ok(Value::Array(items)) => Ok(items),
            Ok(_) => Err(GreenIndexError::extraction(
                "structured output is not an array",
                response,
            )),
            Err(e) => Err(GreenIndexError::extraction(
                format!("failed to parse structured output: {}", e),
                response,
            )),
        };
    }

    if EMPTY_ARRAY.is_match(cleaned) {
        return Ok(Vec::new());
    }

    Err(GreenIndexError::extraction(NO_STRUCTURED_OUTPUT, response))
}

fn unwrap_array(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => {
            for key in ARRAY_KEYS {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return Some(items);
                }
            }
            if map.contains_key("state") {
                return Some(vec![Value::Object(map)]);
            }
            None
        }
        _ => None,
    }
}

fn strip_code_fence(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}
