//! Trigger parsing: synchronous classification of composer input.
//!
//! Explicit prefixes win over content detection:
//!
//! | Input | Kind | Confidence |
//! |-------|------|------------|
//! | `@alice` | `user` | 1.0 |
//! | `>standup notes` | `message` | 1.0 |
//! | `#eng` | `topic` | 1.0 |
//! | `https://example.com` | `link` | 1.0 |
//! | anything else | `message` | 0.5 |

use url::Url;

use crate::models::{Classification, ContextKind, ReferenceKind};

/// Confidence assigned when no explicit trigger matched.
pub const FALLBACK_CONFIDENCE: f32 = 0.5;

/// Classify raw input into a reference kind and query fragment.
pub fn classify(input: &str) -> Classification {
    if let Some(rest) = input.strip_prefix('@') {
        return explicit(ReferenceKind::User, rest);
    }
    if let Some(rest) = input.strip_prefix('>') {
        return explicit(ReferenceKind::Message, rest);
    }
    if let Some(rest) = input.strip_prefix('#') {
        return explicit(ReferenceKind::Topic, rest);
    }
    if let Some(url) = parse_url(input) {
        return Classification {
            kind: ReferenceKind::Link,
            confidence: 1.0,
            query: input.to_string(),
            url: Some(url.to_string()),
        };
    }

    Classification {
        kind: ReferenceKind::Message,
        confidence: FALLBACK_CONFIDENCE,
        query: input.to_string(),
        url: None,
    }
}

/// What an explicit trigger resolves to, without any embedding.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerLookup {
    /// Name search over stored contexts of these kinds.
    Contexts {
        kinds: &'static [ContextKind],
        query: String,
    },
    /// A URL offered as a new link context.
    NewLink { url: String },
}

/// The lookup for an explicit trigger, or `None` for fallback classifications.
///
/// `@` searches users, `#` topics, and `>` threads.
///
/// ```rust
/// use chat_context_core::models::ContextKind;
/// use chat_context_core::trigger::{classify, lookup_for, TriggerLookup};
///
/// assert_eq!(
///     lookup_for(&classify("@ada")),
///     Some(TriggerLookup::Contexts { kinds: &[ContextKind::User], query: "ada".into() })
/// );
/// assert_eq!(lookup_for(&classify("plain words")), None);
/// ```
pub fn lookup_for(classification: &Classification) -> Option<TriggerLookup> {
    if classification.confidence < 1.0 {
        return None;
    }
    let kinds: &'static [ContextKind] = match classification.kind {
        ReferenceKind::User => &[ContextKind::User],
        ReferenceKind::Topic => &[ContextKind::Topic],
        ReferenceKind::Message | ReferenceKind::Thread => &[ContextKind::Thread],
        ReferenceKind::File => &[ContextKind::File],
        ReferenceKind::Link => {
            let url = classification
                .url
                .clone()
                .unwrap_or_else(|| classification.query.clone());
            return Some(TriggerLookup::NewLink { url });
        }
        ReferenceKind::Media => return None,
    };
    Some(TriggerLookup::Contexts {
        kinds,
        query: classification.query.trim().to_string(),
    })
}

fn explicit(kind: ReferenceKind, query: &str) -> Classification {
    Classification {
        kind,
        confidence: 1.0,
        query: query.to_string(),
        url: None,
    }
}

/// Schemes accepted as links even though they carry no host.
const OPAQUE_SCHEMES: [&str; 3] = ["mailto", "tel", "urn"];

/// Accept absolute URLs only. Inputs with inner whitespace are prose, not links.
fn parse_url(input: &str) -> Option<Url> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return None;
    }
    let url = Url::parse(trimmed).ok()?;
    // "note:" or "re:" parse as schemes; require a host or a known opaque scheme.
    if url.has_host() || OPAQUE_SCHEMES.contains(&url.scheme()) {
        Some(url)
    } else {
        None
    }
}
