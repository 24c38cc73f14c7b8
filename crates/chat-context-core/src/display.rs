//! Display mapping for linked contexts.
//!
//! Stored metadata is free-form JSON written by several clients, so titles
//! and subtitles are resolved through fixed ordered fallback lists:
//!
//! | Field | Precedence |
//! |-------|------------|
//! | title | `title` → `name` → `full_name` → `"Untitled"` |
//! | subtitle | `description` → `email` |
//!
//! Missing keys, non-string values, and empty strings are all skipped.

use serde_json::Value;

use crate::models::{ContextKind, DisplayContext, LinkedContext};

pub const TITLE_KEYS: [&str; 3] = ["title", "name", "full_name"];
pub const SUBTITLE_KEYS: [&str; 2] = ["description", "email"];
pub const UNTITLED: &str = "Untitled";

/// Return the first non-empty string value among `keys`, in order.
pub fn first_present<'a>(metadata: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| metadata.get(*key).and_then(Value::as_str))
        .find(|value| !value.trim().is_empty())
}

pub fn display_title(metadata: &Value) -> String {
    first_present(metadata, &TITLE_KEYS)
        .unwrap_or(UNTITLED)
        .to_string()
}

pub fn display_subtitle(metadata: &Value) -> Option<String> {
    first_present(metadata, &SUBTITLE_KEYS).map(str::to_string)
}

/// Map a stored type string to the kind shown in the UI.
///
/// `user`, `thread`, and `file` map to themselves; `url` maps to `topic`;
/// anything else (including `link`) falls back to `topic`.
pub fn display_kind(raw: &str) -> ContextKind {
    match raw {
        "user" => ContextKind::User,
        "thread" => ContextKind::Thread,
        "file" => ContextKind::File,
        "url" => ContextKind::Topic,
        _ => ContextKind::Topic,
    }
}

/// Build the UI-facing view of a linked context.
///
/// The resolved title and subtitle are also written back into the returned
/// metadata under `title` and `description`.
pub fn to_display(linked: LinkedContext) -> DisplayContext {
    let title = display_title(&linked.metadata);
    let subtitle = display_subtitle(&linked.metadata);

    let mut metadata = match linked.metadata {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    metadata.insert("title".to_string(), Value::String(title.clone()));
    match &subtitle {
        Some(s) => {
            metadata.insert("description".to_string(), Value::String(s.clone()));
        }
        None => {
            metadata.remove("description");
        }
    }

    DisplayContext {
        id: linked.id,
        kind: display_kind(&linked.kind),
        title,
        subtitle,
        metadata: Value::Object(metadata),
        link_metadata: linked.link_metadata,
    }
}
