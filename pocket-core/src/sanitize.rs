//! Turns raw generated text into what the user sees.

use crate::error::GenerateError;

/// Role and turn delimiters that are control artifacts, never content.
pub const CONTROL_MARKERS: [&str; 6] = [
    "<|im_end|>",
    "<|end|>",
    "<|im_start|>",
    "<|system|>",
    "<|user|>",
    "<|assistant|>",
];

/// Responses shorter than this (bytes) are discarded.
pub const MIN_RESPONSE_LEN: usize = 3;
/// Responses longer than this (bytes) get a closing period when they lack one.
pub const PERIOD_MIN_LEN: usize = 20;

const EDGE_WHITESPACE: [char; 4] = [' ', '\t', '\n', '\r'];
const TERMINATORS: [char; 5] = ['.', '!', '?', '"', '\n'];

pub fn contains_control_marker(text: &str) -> bool {
    CONTROL_MARKERS.iter().any(|m| text.contains(m))
}

/// Excise every control marker, repeating until a pass removes nothing, so
/// markers formed by an excision are removed as well.
pub fn strip_control_markers(text: &str) -> String {
    let mut out = text.to_string();
    loop {
        let mut changed = false;
        for marker in CONTROL_MARKERS {
            if out.contains(marker) {
                out = out.replace(marker, "");
                changed = true;
            }
        }
        if !changed {
            return out;
        }
    }
}

/// Collapse runs of spaces to one. Tabs and newlines are left alone.
fn collapse_spaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_space = false;
    for c in text.chars() {
        if c == ' ' {
            if !prev_space {
                out.push(c);
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    out
}

/// Only plain declarative statements get a period: lists and labels
/// (anything with a colon) and trailing ellipses are left as they are.
fn needs_period(text: &str) -> bool {
    if text.len() <= PERIOD_MIN_LEN {
        return false;
    }
    let ends_open = text.chars().last().is_some_and(|c| !TERMINATORS.contains(&c));
    ends_open && !text.ends_with("...") && !text.contains(':')
}

/// Clean raw generated text, or explain why there is nothing to show.
pub fn clean_response(raw: &str) -> Result<String, GenerateError> {
    if raw.is_empty() {
        return Err(GenerateError::EmptyResponse);
    }

    let stripped = strip_control_markers(raw);
    let mut text = collapse_spaces(stripped.trim_matches(EDGE_WHITESPACE));

    if text.len() < MIN_RESPONSE_LEN {
        return Err(GenerateError::LowQualityResponse { len: text.len() });
    }
    if needs_period(&text) {
        text.push('.');
    }
    Ok(text)
}

/// [`clean_response`] with failures rendered as their fixed message.
pub fn sanitize(raw: &str) -> String {
    clean_response(raw).unwrap_or_else(|e| e.user_message().to_string())
}
