use std::fmt::{self, Debug};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::{ConnectionId, TransportError};

/// Lifecycle state of one physical connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The handshake is in flight.
    Connecting,
    /// Frames can be exchanged.
    Open,
    /// The connection is gone for good.
    Closed,
}

/// A lifecycle event raised by a connection.
///
/// Each connection raises `Opened` at most once, then any number of
/// `Message`s, then `Closed` exactly once. A connection that fails to
/// open raises only `Closed`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    /// The handshake completed.
    Opened,
    /// A frame arrived from the server.
    Message(Bytes),
    /// The connection was closed, by either side or by a failure.
    Closed,
}

/// A command from the handle to whoever drives the socket.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Outgoing {
    /// Write a frame.
    Frame(Bytes),
    /// Close the connection.
    Close,
}

/// A freshly opened connection, split into its sending and receiving
/// halves.
pub struct Connection {
    /// The sending half; cheap to clone.
    pub handle: ConnectionHandle,
    /// The event stream; owned by exactly one consumer.
    pub events: ConnectionEvents,
}

impl Connection {
    /// Creates a connection in the `Connecting` state, together with the
    /// driver that a transport implementation uses to feed it.
    pub fn pair() -> (Connection, ConnectionDriver) {
        let id = ConnectionId::next();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let connection = Connection {
            handle: ConnectionHandle {
                id,
                outgoing_tx,
                state_rx,
            },
            events: ConnectionEvents { id, events_rx },
        };
        let driver = ConnectionDriver {
            id,
            events_tx,
            outgoing_rx,
            state_tx,
        };
        (connection, driver)
    }

    /// Returns the id of this connection.
    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.handle.id
    }
}

impl Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.handle.id)
            .field("state", &self.handle.state())
            .finish_non_exhaustive()
    }
}

/// The sending half of a connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outgoing_tx: mpsc::UnboundedSender<Outgoing>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Returns the id of this connection.
    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the current state.
    #[inline]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Queues a frame for writing.
    ///
    /// Fails with [`TransportErrorKind::NotOpen`] unless the connection is
    /// open.
    ///
    /// [`TransportErrorKind::NotOpen`]: crate::TransportErrorKind::NotOpen
    pub fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(TransportError::not_open()
                .with_reason(format!("{} is {state:?}", self.id)));
        }
        self.outgoing_tx
            .send(Outgoing::Frame(payload))
            .map_err(|_| TransportError::closed())
    }

    /// Asks the connection to close. Has no effect if it is already gone.
    #[inline]
    pub fn close(&self) {
        self.outgoing_tx.send(Outgoing::Close).ok();
    }
}

impl Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// The receiving half of a connection.
pub struct ConnectionEvents {
    id: ConnectionId,
    events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl ConnectionEvents {
    /// Returns the id of this connection.
    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Waits for the next event. Returns `None` after `Closed` has been
    /// delivered and the driver is gone.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe.
    #[inline]
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events_rx.recv().await
    }
}

/// The transport-side end of a connection.
///
/// The driver enforces the event ordering documented on
/// [`ConnectionEvent`]: transitions that are not legal from the current
/// state are ignored. Dropping the driver closes the connection.
pub struct ConnectionDriver {
    id: ConnectionId,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    outgoing_rx: mpsc::UnboundedReceiver<Outgoing>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionDriver {
    /// Returns the id of this connection.
    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the current state.
    #[inline]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Marks the handshake as complete. Returns `false` if the connection
    /// was not connecting.
    pub fn opened(&self) -> bool {
        if self.state() != ConnectionState::Connecting {
            return false;
        }
        self.state_tx.send_replace(ConnectionState::Open);
        self.events_tx.send(ConnectionEvent::Opened).ok();
        true
    }

    /// Delivers an inbound frame. Returns `false` if the connection is not
    /// open.
    pub fn deliver(&self, payload: Bytes) -> bool {
        if self.state() != ConnectionState::Open {
            return false;
        }
        self.events_tx.send(ConnectionEvent::Message(payload)).ok();
        true
    }

    /// Marks the connection as closed. Returns `false` if it already was.
    pub fn closed(&self) -> bool {
        if self.state() == ConnectionState::Closed {
            return false;
        }
        self.state_tx.send_replace(ConnectionState::Closed);
        self.events_tx.send(ConnectionEvent::Closed).ok();
        true
    }

    /// Waits for the next command from the handle side.
    ///
    /// Returns `None` once every handle has been dropped.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe.
    #[inline]
    pub async fn next_outgoing(&mut self) -> Option<Outgoing> {
        self.outgoing_rx.recv().await
    }

    /// Takes the next command if one is already queued.
    #[inline]
    pub fn try_next_outgoing(&mut self) -> Option<Outgoing> {
        self.outgoing_rx.try_recv().ok()
    }
}

impl Drop for ConnectionDriver {
    fn drop(&mut self) {
        self.closed();
    }
}

impl Debug for ConnectionDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDriver")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportErrorKind;

    #[tokio::test]
    async fn test_lifecycle_events() {
        let (connection, mut driver) = Connection::pair();
        let Connection { handle, mut events } = connection;
        assert_eq!(handle.state(), ConnectionState::Connecting);

        let err = handle.send(Bytes::from_static(b"early")).unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::NotOpen);
        assert!(!driver.deliver(Bytes::from_static(b"too early")));

        assert!(driver.opened());
        assert!(!driver.opened());
        assert_eq!(handle.state(), ConnectionState::Open);

        handle.send(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(
            driver.try_next_outgoing(),
            Some(Outgoing::Frame(Bytes::from_static(b"hello")))
        );

        assert!(driver.deliver(Bytes::from_static(b"reply")));
        handle.close();
        assert_eq!(driver.next_outgoing().await, Some(Outgoing::Close));
        assert!(driver.closed());
        assert!(!driver.closed());
        drop(driver);

        assert_eq!(events.next_event().await, Some(ConnectionEvent::Opened));
        assert_eq!(
            events.next_event().await,
            Some(ConnectionEvent::Message(Bytes::from_static(b"reply")))
        );
        assert_eq!(events.next_event().await, Some(ConnectionEvent::Closed));
        assert_eq!(events.next_event().await, None);
        assert_eq!(handle.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_dropping_driver_closes() {
        let (connection, driver) = Connection::pair();
        let Connection { handle, mut events } = connection;
        drop(driver);
        assert_eq!(events.next_event().await, Some(ConnectionEvent::Closed));
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert_eq!(
            handle.send(Bytes::new()).unwrap_err().kind(),
            TransportErrorKind::NotOpen
        );
    }
}
