//! Display helpers for presentation layers
//!
//! Rendering itself lives outside this crate; these helpers only decide
//! what text and badge class an entry maps to.

use crate::types::{Payload, UNSERIALIZABLE_PLACEHOLDER};

const TEXT_PREVIEW_CHARS: usize = 120;
const DOCUMENT_PREVIEW_CHARS: usize = 160;

/// Badge class of an event type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warn,
    Info,
    Default,
}

/// Classify an event type by the markers in its name
pub fn severity(kind: &str) -> Severity {
    if kind.contains("ERROR") || kind.contains("FAIL") {
        Severity::Error
    } else if kind.contains("WARN") {
        Severity::Warn
    } else if kind.contains("SNAP") || kind.contains("INIT") {
        Severity::Info
    } else {
        Severity::Default
    }
}

/// Short single-line payload preview
pub fn preview(payload: &Payload) -> String {
    match payload {
        Payload::Empty => "<empty>".to_string(),
        Payload::Text(s) => truncate(s, TEXT_PREVIEW_CHARS),
        Payload::Document(v) => match serde_json::to_string(v) {
            Ok(s) => truncate(&s, DOCUMENT_PREVIEW_CHARS),
            Err(_) => UNSERIALIZABLE_PLACEHOLDER.to_string(),
        },
        Payload::Unrepresentable => UNSERIALIZABLE_PLACEHOLDER.to_string(),
    }
}

/// Text placed on the clipboard for a payload
///
/// Documents are pretty-printed; payloads with no text form yield `None`.
pub fn copy_text(payload: &Payload) -> Option<String> {
    match payload {
        Payload::Text(s) => Some(s.clone()),
        Payload::Document(v) => serde_json::to_string_pretty(v).ok(),
        Payload::Empty | Payload::Unrepresentable => None,
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}
