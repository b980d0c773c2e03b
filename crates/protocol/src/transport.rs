use crate::Connection;

/// A type that can open bidirectional connections to an endpoint.
///
/// A transport is dumb I/O: it has no retry or keepalive logic. Each call
/// to [`open`] starts a brand new connection whose lifecycle is reported
/// through [`Connection::events`]; the transport must eventually raise
/// either `Opened` or `Closed` for it, unless the handshake never resolves.
///
/// [`open`]: Transport::open
pub trait Transport: Send + Sync + 'static {
    /// Starts connecting to `endpoint`.
    ///
    /// This method must not block. Implementations that need background
    /// work may assume they are called within a Tokio runtime.
    fn open(&self, endpoint: &str) -> Connection;
}
