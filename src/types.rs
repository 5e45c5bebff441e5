//! Core types for the a3s-audit system
//!
//! Wire-facing types keep the field names used on the bus (`type`, `ts`)
//! so messages from other applications deserialize without translation.

use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Cow;

/// Type label given to entries synthesized from the startup users snapshot
pub const SNAPSHOT_EVENT_TYPE: &str = "USERS_SNAPSHOT";

/// Placeholder shown for payloads that cannot be serialized
pub const UNSERIALIZABLE_PLACEHOLDER: &str = "<unserializable>";

/// A raw message as carried by the transport
///
/// Wire format: `{type: string, payload?: any, ts?: number, id?: string}`.
/// Unknown fields are ignored. A non-string `id` is treated as absent, and
/// a fractional `ts` is truncated to whole milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Event type label; messages without one are dropped on ingest
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Arbitrary JSON payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Sender timestamp in Unix milliseconds
    #[serde(
        default,
        deserialize_with = "lenient_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub ts: Option<u64>,

    /// Sender-supplied message id
    #[serde(
        default,
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
}

impl BusMessage {
    /// Create a message of the given type with no payload
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Self::default()
        }
    }

    /// Attach a JSON payload
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Set an explicit message id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set an explicit timestamp
    pub fn with_ts(mut self, ts: u64) -> Self {
        self.ts = Some(ts);
        self
    }

    /// Fill in `ts` and `id` when the sender left them out
    ///
    /// Applied to every outgoing message before it reaches a transport.
    pub fn stamped(mut self) -> Self {
        if self.ts.is_none() {
            self.ts = Some(now_millis());
        }
        if self.id.as_deref().unwrap_or_default().is_empty() {
            self.id = Some(random_base36(7));
        }
        self
    }
}

fn lenient_millis<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        _ => None,
    })
}

fn lenient_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    })
}

/// Opaque event payload
///
/// Search and export branch on the variant instead of probing an untyped
/// value at runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<serde_json::Value>", into = "Option<serde_json::Value>")]
pub enum Payload {
    /// No payload (absent or `null`)
    #[default]
    Empty,
    /// Plain text payload
    Text(String),
    /// Structured JSON document
    Document(serde_json::Value),
    /// A value that could not be serialized
    Unrepresentable,
}

impl Payload {
    /// Build a payload from any serializable value
    ///
    /// Serialization failure yields `Unrepresentable` rather than an error.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => Self::from(Some(v)),
            Err(e) => {
                tracing::debug!(error = %e, "Payload is not serializable");
                Self::Unrepresentable
            }
        }
    }

    /// Textual form used for search matching
    ///
    /// `None` means the payload never matches a text query.
    pub fn search_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Text(s) => Some(Cow::Borrowed(s)),
            Self::Document(v) => serde_json::to_string(v).ok().map(Cow::Owned),
            Self::Empty | Self::Unrepresentable => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl From<Option<serde_json::Value>> for Payload {
    fn from(value: Option<serde_json::Value>) -> Self {
        match value {
            None | Some(serde_json::Value::Null) => Self::Empty,
            Some(serde_json::Value::String(s)) => Self::Text(s),
            Some(v) => Self::Document(v),
        }
    }
}

impl From<Payload> for Option<serde_json::Value> {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Empty => None,
            Payload::Text(s) => Some(serde_json::Value::String(s)),
            Payload::Document(v) => Some(v),
            Payload::Unrepresentable => Some(serde_json::Value::String(
                UNSERIALIZABLE_PLACEHOLDER.to_string(),
            )),
        }
    }
}

/// A single ingested occurrence in the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEntry {
    /// Session-unique id (sender-supplied or synthesized)
    pub id: String,

    /// Free-form category label
    #[serde(rename = "type")]
    pub kind: String,

    /// Event payload
    #[serde(default)]
    pub payload: Payload,

    /// Unix timestamp in milliseconds
    #[serde(rename = "ts")]
    pub timestamp: u64,

    /// User-toggled marker; has no effect on ordering, dedup, or eviction
    #[serde(default)]
    pub pinned: bool,
}

impl EventEntry {
    /// Create an entry with explicit fields
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        payload: Payload,
        timestamp: u64,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            payload,
            timestamp,
            pinned: false,
        }
    }

    /// Normalize a bus message into an entry
    ///
    /// Returns `None` when the message carries no type. A missing id is
    /// synthesized as `<type>-<ts>-<random>`; a missing timestamp is the
    /// receipt time.
    pub fn from_message(message: BusMessage) -> Option<Self> {
        let kind = message.kind.filter(|k| !k.is_empty())?;
        let timestamp = message.ts.unwrap_or_else(now_millis);
        let id = match message.id {
            Some(id) if !id.is_empty() => id,
            _ => format!("{}-{}-{}", kind, timestamp, random_base36(6)),
        };

        Some(Self {
            id,
            kind,
            payload: Payload::from(message.payload),
            timestamp,
            pinned: false,
        })
    }
}

/// Persisted widget settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Whether ingestion is paused
    #[serde(default)]
    pub paused: bool,

    /// Configured live log limit (effective capacity is never below 50)
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    500
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            paused: false,
            limit: default_limit(),
        }
    }
}

/// A user record from the startup snapshot source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Record id (numeric or string)
    pub id: serde_json::Value,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub role: String,
}

impl SnapshotRecord {
    /// Id rendered the way it appears in `SNAP-<id>`
    pub fn id_text(&self) -> String {
        match &self.id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Convert into a synthetic snapshot event stamped at `timestamp`
    pub fn to_entry(&self, timestamp: u64) -> EventEntry {
        let payload = serde_json::json!({
            "id": self.id,
            "name": self.name,
            "email": self.email,
            "role": self.role,
        });
        EventEntry::new(
            format!("SNAP-{}", self.id_text()),
            SNAPSHOT_EVENT_TYPE,
            Payload::Document(payload),
            timestamp,
        )
    }
}

/// Type filter applied before text search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TypeFilter {
    /// Pass every type
    #[default]
    All,
    /// Exact match on the entry type
    Exact(String),
}

impl From<&str> for TypeFilter {
    fn from(value: &str) -> Self {
        if value == "All" {
            Self::All
        } else {
            Self::Exact(value.to_string())
        }
    }
}

/// Combined type + text filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub type_filter: TypeFilter,

    /// Free-text query (trimmed and case-folded at match time)
    pub query: String,
}

impl Filter {
    pub fn new(type_filter: impl Into<TypeFilter>, query: impl Into<String>) -> Self {
        Self {
            type_filter: type_filter.into(),
            query: query.into(),
        }
    }
}

/// Field the view is ordered by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    Timestamp,
    Type,
    Id,
}

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    /// The opposite direction
    pub fn toggled(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

/// Which transport a live channel runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Broadcast hub (primary)
    Broadcast,
    /// Key-value store change notifications (fallback)
    Storage,
}

/// Connection status exposed to presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Listening on a transport
    Connected(TransportKind),
    /// No transport could be opened, or the store was disposed
    Disconnected,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

/// Current time in Unix milliseconds
pub(crate) fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Random lowercase base-36 string of the given length
pub(crate) fn random_base36(len: usize) -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut n = uuid::Uuid::new_v4().as_u128();
    (0..len)
        .map(|_| {
            let c = ALPHABET[(n % 36) as usize] as char;
            n /= 36;
            c
        })
        .collect()
}
