use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

static LAST_CORRELATION_ID: AtomicU64 = AtomicU64::new(0);
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier binding a user turn and the fragments of its reply together.
///
/// On the wire this is the `request_id` field.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wraps an existing identifier.
    #[inline]
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Generates a fresh identifier for an outbound turn.
    ///
    /// Identifiers are the current Unix time in milliseconds, bumped when
    /// necessary so that two turns issued within the same millisecond
    /// still get distinct values.
    pub fn generate() -> Self {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let prev = LAST_CORRELATION_ID
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        Self(now.max(prev + 1).to_string())
    }

    /// Returns the identifier as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    #[inline]
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for CorrelationId {
    #[inline]
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Opaque identity of one physical connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates a process-unique connection id.
    #[inline]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}
