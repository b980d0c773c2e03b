//! An in-memory transport and history source for testing purpose.

mod history;

use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use chatwire_protocol::{
    Connection, ConnectionDriver, ConnectionId, ConnectionState, Outgoing,
    Transport,
};
use serde::Serialize;
use serde_json::Value;

pub use history::*;

/// A fragment as the server would send it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ServerFragment {
    /// Correlation id of the turn being answered.
    pub request_id: String,
    /// The text delta.
    pub msg: String,
    /// Optional out-of-band marker (`istyping`, `error`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl ServerFragment {
    /// Creates a plain text fragment.
    #[inline]
    pub fn new<S1: Into<String>, S2: Into<String>>(
        request_id: S1,
        msg: S2,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            msg: msg.into(),
            status: None,
        }
    }

    /// Attaches a status marker.
    #[inline]
    pub fn with_status<S: Into<String>>(mut self, status: S) -> Self {
        self.status = Some(status.into());
        self
    }
}

struct ConnectionSlot {
    endpoint: String,
    driver: ConnectionDriver,
    sent: Vec<Bytes>,
    close_requested: bool,
}

impl ConnectionSlot {
    fn drain_outgoing(&mut self) {
        while let Some(outgoing) = self.driver.try_next_outgoing() {
            match outgoing {
                Outgoing::Frame(frame) => self.sent.push(frame),
                Outgoing::Close => self.close_requested = true,
            }
        }
    }
}

/// A connection opened through [`TestTransport`], driven by the test.
///
/// Nothing happens on its own: the test decides when the handshake
/// completes, what the server says and when the socket drops.
#[derive(Clone)]
pub struct TestConnection {
    slot: Arc<Mutex<ConnectionSlot>>,
}

impl TestConnection {
    fn slot(&self) -> MutexGuard<'_, ConnectionSlot> {
        // A test that panicked while holding the lock has failed anyway.
        self.slot.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Returns the id of this connection.
    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.slot().driver.id()
    }

    /// Returns the endpoint passed to `open`.
    #[inline]
    pub fn endpoint(&self) -> String {
        self.slot().endpoint.clone()
    }

    /// Returns the current state.
    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.slot().driver.state()
    }

    /// Completes the handshake.
    #[inline]
    pub fn open(&self) -> bool {
        self.slot().driver.opened()
    }

    /// Drops the connection from the server side.
    #[inline]
    pub fn close(&self) -> bool {
        self.slot().driver.closed()
    }

    /// Delivers a raw frame.
    #[inline]
    pub fn deliver_raw<B: Into<Bytes>>(&self, payload: B) -> bool {
        self.slot().driver.deliver(payload.into())
    }

    /// Delivers a JSON frame.
    #[inline]
    pub fn deliver_json(&self, value: &Value) -> bool {
        self.deliver_raw(value.to_string())
    }

    /// Delivers a server fragment.
    pub fn deliver(&self, fragment: &ServerFragment) -> bool {
        match serde_json::to_string(fragment) {
            Ok(json) => self.deliver_raw(json),
            Err(_) => false,
        }
    }

    /// Returns every frame the client has written so far.
    pub fn sent(&self) -> Vec<Bytes> {
        let mut slot = self.slot();
        slot.drain_outgoing();
        slot.sent.clone()
    }

    /// Returns every frame the client has written so far, decoded as JSON.
    /// Frames that are not JSON are skipped.
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .filter_map(|frame| serde_json::from_slice(frame).ok())
            .collect()
    }

    /// Returns how many liveness probes the client has written.
    pub fn probes(&self) -> usize {
        self.sent_json()
            .iter()
            .filter(|value| value["type"] == "ping")
            .count()
    }

    /// Returns whether the client asked to close this connection.
    pub fn close_requested(&self) -> bool {
        let mut slot = self.slot();
        slot.drain_outgoing();
        slot.close_requested
    }
}

impl Debug for TestConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot();
        f.debug_struct("TestConnection")
            .field("id", &slot.driver.id())
            .field("endpoint", &slot.endpoint)
            .field("state", &slot.driver.state())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Inner {
    connections: Vec<TestConnection>,
    auto_open: bool,
}

/// A local fake transport for testing purpose.
///
/// Every `open` call is recorded as a [`TestConnection`] that the test can
/// fetch by index and drive by hand.
#[derive(Clone, Default)]
pub struct TestTransport {
    inner: Arc<Mutex<Inner>>,
}

impl TestTransport {
    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Makes every new connection complete its handshake immediately.
    #[inline]
    pub fn set_auto_open(&self, auto_open: bool) {
        self.inner().auto_open = auto_open;
    }

    /// Returns how many connections have been opened.
    #[inline]
    pub fn attempts(&self) -> usize {
        self.inner().connections.len()
    }

    /// Returns the `idx`-th connection, in opening order.
    #[inline]
    pub fn connection(&self, idx: usize) -> Option<TestConnection> {
        self.inner().connections.get(idx).cloned()
    }

    /// Returns the most recently opened connection.
    #[inline]
    pub fn latest(&self) -> Option<TestConnection> {
        self.inner().connections.last().cloned()
    }
}

impl Transport for TestTransport {
    fn open(&self, endpoint: &str) -> Connection {
        let (connection, driver) = Connection::pair();
        let mut inner = self.inner();
        if inner.auto_open {
            driver.opened();
        }
        inner.connections.push(TestConnection {
            slot: Arc::new(Mutex::new(ConnectionSlot {
                endpoint: endpoint.to_owned(),
                driver,
                sent: vec![],
                close_requested: false,
            })),
        });
        connection
    }
}
