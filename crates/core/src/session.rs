mod builder;
mod mailbox;
mod state;
#[cfg(test)]
mod tests;

use std::fmt::{self, Debug};
use std::sync::Arc;

use chatwire_protocol::{
    ConnectionEvent, ConnectionId, ConvType, ModelId, OutboundMessage,
};
use tokio::sync::oneshot;

use crate::error::SessionDeadError;
use crate::history_client::FetchResult;
use crate::transcript::{LogicalMessage, MessageId, Transcript};
pub use builder::SessionBuilder;
use mailbox::Mailbox;

/// Connection phase of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No connection is usable. The next send reconnects.
    Disconnected,
    /// A handshake is in flight.
    #[default]
    Connecting,
    /// Turns can be sent.
    Connected,
}

/// The result of handing a turn to the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SendOutcome {
    /// The turn went out and was recorded in the transcript under the
    /// given id.
    Sent(MessageId),
    /// The session was not connected. The turn was dropped, a reconnect
    /// was started and [`Notice::Reconnecting`] was raised. The caller
    /// decides whether to send it again.
    Deferred,
}

/// A change to the transcript, in the order it was applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// The history backfill has run. Carries the historical section,
    /// which is empty if the backfill failed. The entries go before every
    /// live entry, whenever this arrives.
    HistoryLoaded(Vec<LogicalMessage>),
    /// A live entry was added at the end.
    Appended(LogicalMessage),
    /// A live entry changed; it replaces the entry with the same id.
    Updated(LogicalMessage),
}

/// Something the user should be told about.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Notice {
    /// A turn could not be sent and the session is reconnecting.
    Reconnecting,
    /// The history backfill failed; the transcript starts empty.
    HistoryUnavailable(String),
}

/// A point-in-time view of the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// The connection phase.
    pub phase: Phase,
    /// The live connection, if any.
    pub connection: Option<ConnectionId>,
    /// How many connections have been opened so far.
    pub connect_attempts: usize,
    /// Whether liveness probes are being sent.
    pub keepalive_active: bool,
    /// The transcript.
    pub transcript: Transcript,
}

pub(crate) enum SessionMessage {
    Send {
        message: OutboundMessage,
        reply: oneshot::Sender<SendOutcome>,
    },
    Connection {
        generation: u64,
        event: ConnectionEvent,
    },
    HistoryFetched(FetchResult),
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

impl Debug for SessionMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMessage::Send { message, .. } => f
                .debug_struct("Send")
                .field("request_id", message.request_id())
                .finish_non_exhaustive(),
            SessionMessage::Connection { generation, event } => f
                .debug_struct("Connection")
                .field("generation", generation)
                .field("event", event)
                .finish(),
            SessionMessage::HistoryFetched(result) => f
                .debug_tuple("HistoryFetched")
                .field(&result.as_ref().map(Vec::len))
                .finish(),
            SessionMessage::Snapshot(_) => f.write_str("Snapshot"),
        }
    }
}

/// A chat session.
///
/// The session owns the connection, the keepalive timer, the reassembler
/// and the transcript. All of them are driven by one task that handles
/// sends, connection events and the history result one at a time, so
/// none of that state is shared.
///
/// Cloning yields another handle to the same session. The session stops
/// when [`close`] is called or every handle has been dropped.
///
/// [`close`]: Session::close
#[derive(Clone)]
pub struct Session {
    mailbox: Arc<Mailbox>,
    user_id: Arc<str>,
    conv_type: ConvType,
    model_id: ModelId,
}

impl Session {
    /// Creates an outbound turn with the session's user and default
    /// conversation settings.
    #[inline]
    pub fn compose<S: Into<String>>(&self, body: S) -> OutboundMessage {
        OutboundMessage::new(self.user_id.as_ref(), body)
            .with_conv_type(self.conv_type)
            .with_model(self.model_id.clone())
    }

    /// Sends a turn.
    ///
    /// Resolves once the session has either written the turn to the
    /// connection or given up on it; see [`SendOutcome`].
    pub async fn send(
        &self,
        message: OutboundMessage,
    ) -> Result<SendOutcome, SessionDeadError> {
        let (reply, rx) = oneshot::channel();
        self.mailbox.send(SessionMessage::Send { message, reply })?;
        rx.await.map_err(|_| SessionDeadError)
    }

    /// Composes and sends a text turn.
    #[inline]
    pub async fn send_text<S: Into<String>>(
        &self,
        body: S,
    ) -> Result<SendOutcome, SessionDeadError> {
        self.send(self.compose(body)).await
    }

    /// Returns a snapshot of the session state.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionDeadError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.send(SessionMessage::Snapshot(tx))?;
        rx.await.map_err(|_| SessionDeadError)
    }

    /// Stops the session and closes its connection.
    ///
    /// Messages already queued are discarded.
    #[inline]
    pub fn close(&self) {
        self.mailbox.try_kill();
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}
