//! Core data models that flow through the context pipeline.
//!
//! Persisted shapes ([`Context`], [`ContextLink`], [`EmbeddingJob`]) are
//! owned by a [`Store`](crate::store::Store) backend. [`Reference`] is the
//! ephemeral, ranked result produced by a query and never written back.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The closed set of persisted context types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    User,
    Thread,
    Topic,
    File,
    Link,
}

impl ContextKind {
    pub const ALL: [ContextKind; 5] = [
        ContextKind::User,
        ContextKind::Thread,
        ContextKind::Topic,
        ContextKind::File,
        ContextKind::Link,
    ];

    /// The string stored in the `contexts.type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::User => "user",
            ContextKind::Thread => "thread",
            ContextKind::Topic => "topic",
            ContextKind::File => "file",
            ContextKind::Link => "link",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(ContextKind::User),
            "thread" => Ok(ContextKind::Thread),
            "topic" => Ok(ContextKind::Topic),
            "file" => Ok(ContextKind::File),
            // Older clients wrote link contexts as "url".
            "link" | "url" => Ok(ContextKind::Link),
            other => anyhow::bail!(
                "Unknown context type: '{}'. Use user, thread, topic, file, or link.",
                other
            ),
        }
    }
}

/// Metadata for a `user` context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Metadata for a `thread` context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Metadata for a `topic` context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Metadata for a `file` context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Metadata for a `link` context. The URL is the only required field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkMetadata {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Typed metadata, one variant per [`ContextKind`].
///
/// Serializes to the flat JSON object stored in `contexts.metadata_json`;
/// unknown keys written by other clients are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ContextMetadata {
    User(UserMetadata),
    Thread(ThreadMetadata),
    Topic(TopicMetadata),
    File(FileMetadata),
    Link(LinkMetadata),
}

impl ContextMetadata {
    pub fn kind(&self) -> ContextKind {
        match self {
            ContextMetadata::User(_) => ContextKind::User,
            ContextMetadata::Thread(_) => ContextKind::Thread,
            ContextMetadata::Topic(_) => ContextKind::Topic,
            ContextMetadata::File(_) => ContextKind::File,
            ContextMetadata::Link(_) => ContextKind::Link,
        }
    }

    /// Parse a JSON object into the variant for `kind`.
    ///
    /// `null` is treated as an empty object. Link metadata without a `url`
    /// is rejected.
    pub fn from_value(kind: ContextKind, value: Value) -> serde_json::Result<Self> {
        let value = if value.is_null() {
            Value::Object(Map::new())
        } else {
            value
        };
        Ok(match kind {
            ContextKind::User => ContextMetadata::User(serde_json::from_value(value)?),
            ContextKind::Thread => ContextMetadata::Thread(serde_json::from_value(value)?),
            ContextKind::Topic => ContextMetadata::Topic(serde_json::from_value(value)?),
            ContextKind::File => ContextMetadata::File(serde_json::from_value(value)?),
            ContextKind::Link => ContextMetadata::Link(serde_json::from_value(value)?),
        })
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// A persisted, reusable context object attachable to messages.
#[derive(Debug, Clone, Serialize)]
pub struct Context {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ContextKind,
    pub metadata: ContextMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub created_at: i64,
}

impl Context {
    /// Build a new context with a fresh UUID. The kind follows the metadata variant.
    pub fn new(metadata: ContextMetadata, embedding: Option<Vec<f32>>, created_at: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: metadata.kind(),
            metadata,
            embedding,
            chat_id: None,
            message_id: None,
            created_at,
        }
    }

    pub fn with_chat(mut self, chat_id: Option<String>) -> Self {
        self.chat_id = chat_id;
        self
    }
}

/// Kinds a [`Reference`] or a trigger classification can carry.
///
/// A superset of [`ContextKind`]: media search results and `>` message
/// references have no persisted context type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    User,
    Thread,
    Topic,
    File,
    Link,
    Message,
    Media,
}

impl ReferenceKind {
    /// Map a raw stored type string to a reference kind, defaulting to `topic`.
    pub fn from_stored(raw: &str) -> Self {
        match raw {
            "user" => ReferenceKind::User,
            "thread" => ReferenceKind::Thread,
            "topic" => ReferenceKind::Topic,
            "file" => ReferenceKind::File,
            "link" | "url" => ReferenceKind::Link,
            "message" => ReferenceKind::Message,
            "media" => ReferenceKind::Media,
            _ => ReferenceKind::Topic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::User => "user",
            ReferenceKind::Thread => "thread",
            ReferenceKind::Topic => "topic",
            ReferenceKind::File => "file",
            ReferenceKind::Link => "link",
            ReferenceKind::Message => "message",
            ReferenceKind::Media => "media",
        }
    }
}

impl From<ContextKind> for ReferenceKind {
    fn from(kind: ContextKind) -> Self {
        match kind {
            ContextKind::User => ReferenceKind::User,
            ContextKind::Thread => ReferenceKind::Thread,
            ContextKind::Topic => ReferenceKind::Topic,
            ContextKind::File => ReferenceKind::File,
            ContextKind::Link => ReferenceKind::Link,
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which search produced a [`Reference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceSource {
    /// The vector similarity index over stored contexts.
    Index,
    /// The secondary media reference search.
    Media,
    /// A name lookup driven by an explicit `@`, `#`, `>` or URL trigger.
    Trigger,
}

/// An ephemeral ranked suggestion. Built once by a query, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ReferenceKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Relevance in `[0.0, 1.0]`.
    pub similarity: f64,
    pub source: ReferenceSource,
    /// Unix seconds of the underlying row's last update, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

/// Result of [`classify`](crate::trigger::classify).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    #[serde(rename = "type")]
    pub kind: ReferenceKind,
    pub confidence: f32,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A link between a context and a message. At most one per pair.
#[derive(Debug, Clone, Serialize)]
pub struct ContextLink {
    pub context_id: String,
    pub message_id: String,
    pub metadata: Value,
    pub created_at: i64,
}

/// A context row joined through `message_contexts`, as stored.
///
/// `kind` is the raw `type` column so rows written by other clients
/// (e.g. `"url"`) survive until display mapping.
#[derive(Debug, Clone)]
pub struct LinkedContext {
    pub id: String,
    pub kind: String,
    pub metadata: Value,
    pub link_metadata: Value,
    pub linked_at: i64,
}

/// UI-facing view of a linked context after type remapping and title fallback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayContext {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ContextKind,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub metadata: Value,
    pub link_metadata: Value,
}

/// What a background embedding job refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Message,
    File,
    Context,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Message => "message",
            ContentType::File => "file",
            ContentType::Context => "context",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "message" => Ok(ContentType::Message),
            "file" => Ok(ContentType::File),
            "context" => Ok(ContentType::Context),
            other => anyhow::bail!(
                "Unknown content type: '{}'. Use message, file, or context.",
                other
            ),
        }
    }
}

/// Embedding job lifecycle: `pending → processing → {completed | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Transitions only move forward; terminal states are frozen.
    ///
    /// A worker may skip `processing` and finish a pending job directly.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Processing)
            | (JobStatus::Pending, JobStatus::Completed)
            | (JobStatus::Pending, JobStatus::Failed)
            | (JobStatus::Processing, JobStatus::Completed)
            | (JobStatus::Processing, JobStatus::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => anyhow::bail!("Unknown job status: '{}'", other),
        }
    }
}

/// A queued unit of background embedding work.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingJob {
    pub id: String,
    pub content_id: String,
    pub content_type: ContentType,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Pull-based status answer for a job id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusReport {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_kind_accepts_url_alias() {
        assert_eq!("url".parse::<ContextKind>().unwrap(), ContextKind::Link);
        assert_eq!(" File ".parse::<ContextKind>().unwrap(), ContextKind::File);
        assert!("channel".parse::<ContextKind>().is_err());
    }

    #[test]
    fn test_metadata_from_value_keeps_unknown_keys() {
        let meta = ContextMetadata::from_value(
            ContextKind::File,
            json!({"name": "a.txt", "checksum": "abc"}),
        )
        .unwrap();
        match &meta {
            ContextMetadata::File(f) => {
                assert_eq!(f.name.as_deref(), Some("a.txt"));
                assert_eq!(f.extra.get("checksum"), Some(&json!("abc")));
            }
            other => panic!("expected file metadata, got {:?}", other),
        }
        assert_eq!(
            meta.to_value().unwrap(),
            json!({"name": "a.txt", "checksum": "abc"})
        );
    }

    #[test]
    fn test_link_metadata_requires_url() {
        assert!(ContextMetadata::from_value(ContextKind::Link, json!({"title": "x"})).is_err());
        let meta =
            ContextMetadata::from_value(ContextKind::Link, json!({"url": "https://a.dev"})).unwrap();
        assert_eq!(meta.kind(), ContextKind::Link);
    }

    #[test]
    fn test_null_metadata_is_empty_object() {
        let meta = ContextMetadata::from_value(ContextKind::Topic, Value::Null).unwrap();
        assert_eq!(meta, ContextMetadata::Topic(TopicMetadata::default()));
    }

    #[test]
    fn test_job_transitions_are_monotonic() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Pending));
        assert!(Completed.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn test_reference_kind_from_stored_defaults_to_topic() {
        assert_eq!(ReferenceKind::from_stored("url"), ReferenceKind::Link);
        assert_eq!(ReferenceKind::from_stored("channel"), ReferenceKind::Topic);
    }
}
