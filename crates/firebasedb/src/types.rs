//! Public types for the firebasedb crate.

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1;
pub(crate) const DEFAULT_ERROR_CHANNEL_CAPACITY: usize = 16;

/// A change notification received from a subscription.
///
/// `event_type` is the protocol event name (`put`, `patch`, `keep-alive`,
/// `cancel`, `auth_revoked`). `raw_data` is the undecoded JSON envelope
/// `{"path": ..., "data": ...}`; call [`decode`](Event::decode) to read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    event_type: String,
    raw_data: String,
}

impl Event {
    pub fn new(event_type: impl Into<String>, raw_data: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            raw_data: raw_data.into(),
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn raw_data(&self) -> &str {
        &self.raw_data
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from(self.event_type.as_str())
    }

    /// Decode the envelope, returning the path the change applies to together
    /// with the typed `data` field.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Payload<T>, Error> {
        Ok(serde_json::from_str(&self.raw_data)?)
    }

    /// Decode `data` into `dest` and return the path. `dest` is left untouched
    /// on error.
    pub fn decode_into<T: DeserializeOwned>(&self, dest: &mut T) -> Result<String, Error> {
        let payload = self.decode::<T>()?;
        *dest = payload.data;
        Ok(payload.path)
    }
}

/// Classification of [`Event::event_type`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A subtree was replaced.
    Put,
    /// Children of a subtree were updated.
    Patch,
    KeepAlive,
    /// The server cancelled the subscription (e.g. rules no longer allow reads).
    Cancel,
    /// The auth credential expired or was revoked.
    AuthRevoked,
    Other(String),
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        match s {
            "put" => EventKind::Put,
            "patch" => EventKind::Patch,
            "keep-alive" => EventKind::KeepAlive,
            "cancel" => EventKind::Cancel,
            "auth_revoked" => EventKind::AuthRevoked,
            other => EventKind::Other(other.to_string()),
        }
    }
}

/// Decoded event envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Payload<T> {
    #[serde(default)]
    pub path: String,
    pub data: T,
}

/// What the dispatch loop does when a bounded queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest queued event to make room.
    #[default]
    DropOldest,
    /// Discard the incoming event.
    DropNewest,
    /// Stop taking frames from the reader until the consumer catches up.
    Block,
}

/// Configuration for [`subscribe`](crate::subscribe) and
/// [`Subscription::from_reader`](crate::Subscription::from_reader).
#[derive(Debug, Clone)]
pub struct SubscribeConfig {
    /// Maximum number of undelivered events. `None` means unbounded.
    pub queue_capacity: Option<usize>,
    /// Overflow behaviour for a bounded queue. Ignored when unbounded.
    pub overflow: OverflowPolicy,
    /// Slots in the consumer-facing channel. Clamped to at least 1.
    pub event_channel_capacity: usize,
    /// Deliver `keep-alive` events instead of filtering them out.
    pub pass_keep_alive: bool,
    /// Upper bound on connecting and receiving response headers.
    pub connect_timeout: Duration,
    /// Capacity of the decode-error broadcast. Clamped to at least 1.
    pub error_channel_capacity: usize,
}

impl Default for SubscribeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: None,
            overflow: OverflowPolicy::default(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            pass_keep_alive: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            error_channel_capacity: DEFAULT_ERROR_CHANNEL_CAPACITY,
        }
    }
}

/// A frame on the wire that did not have the `event:` / `data:` / blank shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: first line does not start with event:")]
    MissingEvent,

    #[error("malformed frame: second line does not start with data:")]
    MissingData,

    #[error("malformed frame: expected 2 lines, got {lines}")]
    LineCount { lines: usize },
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response; carries the status line, e.g. `"404 Not Found"`.
    #[error("{0}")]
    Status(String),

    #[error("Connection timed out")]
    Timeout,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("Subscription already closed")]
    AlreadyClosed,
}
