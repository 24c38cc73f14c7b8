//! Ranking for similarity search and suggestion merging.
//!
//! The store produces scored [`ContextCandidate`]s; everything after that is
//! pure and lives here so every backend ranks identically.
//!
//! # Ordering
//!
//! 1. Drop candidates with `similarity < threshold`.
//! 2. Sort by similarity (desc).
//! 3. Break ties by `updated_at` (desc, most recent first), then `id` (asc).
//! 4. Truncate to `limit`.
//!
//! Trigger lookups skip scoring: every name match counts as an exact hit and
//! is ordered by recency alone.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::display::{display_subtitle, display_title, TITLE_KEYS};
use crate::models::{Reference, ReferenceKind, ReferenceSource};
use crate::store::ContextCandidate;

/// Default minimum similarity for a match.
pub const DEFAULT_THRESHOLD: f64 = 0.7;
/// Default match count for direct similarity queries.
pub const DEFAULT_LIMIT: usize = 10;
/// Default match count for trigger lookups.
pub const TRIGGER_LIMIT: usize = 5;
/// Id of the synthetic reference offered for a URL trigger.
pub const NEW_LINK_ID: &str = "new-link";

/// Filter, order, and truncate store candidates into references.
pub fn rank_candidates(
    candidates: Vec<ContextCandidate>,
    threshold: f64,
    limit: usize,
) -> Vec<Reference> {
    let mut kept: Vec<ContextCandidate> = candidates
        .into_iter()
        .map(|mut c| {
            c.similarity = clamp_unit(c.similarity);
            c
        })
        .filter(|c| c.similarity >= threshold)
        .collect();

    kept.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then(b.updated_at.cmp(&a.updated_at))
            .then(a.id.cmp(&b.id))
    });
    kept.truncate(limit);

    kept.into_iter()
        .map(|c| candidate_to_reference(c, ReferenceSource::Index))
        .collect()
}

/// Case-insensitive substring match of `needle` against the title fields.
/// An empty needle matches everything.
pub fn name_matches(metadata: &serde_json::Value, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    TITLE_KEYS
        .iter()
        .filter_map(|key| metadata.get(*key).and_then(serde_json::Value::as_str))
        .any(|value| value.to_lowercase().contains(&needle))
}

/// Order trigger matches most recent first (then by id) and truncate.
pub fn rank_name_matches(mut candidates: Vec<ContextCandidate>, limit: usize) -> Vec<Reference> {
    candidates.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
    candidates.truncate(limit);
    candidates
        .into_iter()
        .map(|mut c| {
            c.similarity = 1.0;
            candidate_to_reference(c, ReferenceSource::Trigger)
        })
        .collect()
}

/// The reference offered when the input is a URL not yet stored.
pub fn new_link_reference(url: &str) -> Reference {
    Reference {
        id: NEW_LINK_ID.to_string(),
        kind: ReferenceKind::Link,
        title: url.to_string(),
        preview: Some("Add new link".to_string()),
        metadata: Some(serde_json::json!({ "url": url, "source": "web" })),
        similarity: 1.0,
        source: ReferenceSource::Trigger,
        updated_at: None,
    }
}

fn candidate_to_reference(c: ContextCandidate, source: ReferenceSource) -> Reference {
    let title = display_title(&c.metadata);
    let preview = c
        .metadata
        .get("preview")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| display_subtitle(&c.metadata));

    Reference {
        id: c.id,
        kind: ReferenceKind::from_stored(&c.kind),
        title,
        preview,
        metadata: Some(c.metadata),
        similarity: c.similarity,
        source,
        updated_at: Some(c.updated_at),
    }
}

/// Merge index and media results into one ranked list.
///
/// Sorted by similarity (desc); the sort is stable and index results come
/// first, so index wins ties. Duplicate `(source, id)` pairs keep their
/// first occurrence.
pub fn merge_suggestions(
    index: Vec<Reference>,
    media: Vec<Reference>,
    limit: usize,
) -> Vec<Reference> {
    let mut merged: Vec<Reference> = index.into_iter().chain(media).collect();
    merged.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });

    let mut seen: HashSet<(ReferenceSource, String)> = HashSet::new();
    merged.retain(|r| seen.insert((r.source, r.id.clone())));
    merged.truncate(limit);
    merged
}

fn clamp_unit(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}
