use std::borrow::Cow;
use std::error::Error;
use std::fmt::{self, Display};

/// The kind of transport error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The connection is not (or not yet) open.
    NotOpen,
    /// The connection has been torn down underneath the handle.
    Closed,
}

impl Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::NotOpen => write!(f, "Connection is not open"),
            TransportErrorKind::Closed => write!(f, "Connection is closed"),
        }
    }
}

/// Describes a failure to hand a payload to the connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TransportError {
    kind: TransportErrorKind,
    reason: Option<String>,
}

impl TransportError {
    /// Creates a new error with the `NotOpen` kind.
    #[inline]
    pub fn not_open() -> Self {
        Self {
            kind: TransportErrorKind::NotOpen,
            reason: None,
        }
    }

    /// Creates a new error with the `Closed` kind.
    #[inline]
    pub fn closed() -> Self {
        Self {
            kind: TransportErrorKind::Closed,
            reason: None,
        }
    }

    /// Attaches a reason to the error.
    #[inline]
    pub fn with_reason<S: Into<String>>(self, reason: S) -> Self {
        Self {
            kind: self.kind,
            reason: Some(reason.into()),
        }
    }

    /// Returns the kind of this error.
    #[inline]
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Returns the reason for the error.
    #[inline]
    pub fn reason(&self) -> Cow<'_, str> {
        match self.reason.as_deref() {
            Some(reason) => Cow::Borrowed(reason),
            None => Cow::Owned(format!("{}", self.kind)),
        }
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{}: {reason}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl Error for TransportError {}

/// The kind of history error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HistoryErrorKind {
    /// The request could not be completed.
    Network,
    /// The endpoint answered with a non-success status.
    Status,
    /// The payload could not be decoded into history records.
    Malformed,
}

impl Display for HistoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryErrorKind::Network => write!(f, "Network error"),
            HistoryErrorKind::Status => write!(f, "Unexpected status"),
            HistoryErrorKind::Malformed => write!(f, "Malformed history"),
        }
    }
}

/// Describes a failure to retrieve or decode the conversation history.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HistoryError {
    kind: HistoryErrorKind,
    reason: Option<String>,
}

impl HistoryError {
    /// Creates a new error with the `Network` kind.
    #[inline]
    pub fn network() -> Self {
        Self {
            kind: HistoryErrorKind::Network,
            reason: None,
        }
    }

    /// Creates a new error with the `Status` kind.
    #[inline]
    pub fn status() -> Self {
        Self {
            kind: HistoryErrorKind::Status,
            reason: None,
        }
    }

    /// Creates a new error with the `Malformed` kind.
    #[inline]
    pub fn malformed() -> Self {
        Self {
            kind: HistoryErrorKind::Malformed,
            reason: None,
        }
    }

    /// Attaches a reason to the error.
    #[inline]
    pub fn with_reason<S: Into<String>>(self, reason: S) -> Self {
        Self {
            kind: self.kind,
            reason: Some(reason.into()),
        }
    }

    /// Returns the kind of this error.
    #[inline]
    pub fn kind(&self) -> HistoryErrorKind {
        self.kind
    }

    /// Returns the reason for the error.
    #[inline]
    pub fn reason(&self) -> Cow<'_, str> {
        match self.reason.as_deref() {
            Some(reason) => Cow::Borrowed(reason),
            None => Cow::Owned(format!("{}", self.kind)),
        }
    }
}

impl Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{}: {reason}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl Error for HistoryError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_falls_back_to_kind() {
        let err = TransportError::not_open();
        assert_eq!(err.reason(), "Connection is not open");
        assert_eq!(format!("{err}"), "Connection is not open");

        let err = HistoryError::status().with_reason("500");
        assert_eq!(err.kind(), HistoryErrorKind::Status);
        assert_eq!(err.reason(), "500");
        assert_eq!(format!("{err}"), "Unexpected status: 500");
    }
}
