use std::sync::Arc;

use bytes::Bytes;
use chatwire_protocol::{
    Connection, ConnectionEvent, ConnectionHandle, HistoryQuery, Identity,
    InboundFragment, OutboundMessage, Transport,
};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::mailbox::MessageSender;
use super::{
    Notice, Phase, SendOutcome, SessionMessage, SessionSnapshot,
    TranscriptEvent,
};
use crate::config::SessionConfig;
use crate::history_client::{FetchResult, HistoryClient};
use crate::keepalive::Keepalive;
use crate::reassembler::{Reassembler, Reassembly};
use crate::transcript::{LogicalMessage, Role, Transcript};

pub(crate) type Callback<T> = Box<dyn Fn(T) + Send + Sync>;

/// The live connection and the task forwarding its events.
pub(crate) struct Link {
    handle: ConnectionHandle,
    pump: JoinHandle<()>,
}

impl Link {
    fn teardown(self) {
        self.pump.abort();
        self.handle.close();
    }
}

pub(crate) struct SessionState {
    pub config: SessionConfig,
    pub identity: Identity,
    pub transport: Arc<dyn Transport>,
    pub history_client: HistoryClient,
    pub msg_tx: MessageSender,

    pub phase: Phase,
    /// Bumped on every connect. Events tagged with an older value belong
    /// to a superseded connection.
    pub generation: u64,
    pub link: Option<Link>,
    pub connect_attempts: usize,
    pub keepalive: Keepalive,
    pub reassembler: Reassembler,
    pub transcript: Transcript,
    pub history_task: Option<JoinHandle<()>>,

    pub on_transcript: Option<Callback<TranscriptEvent>>,
    pub on_notice: Option<Callback<Notice>>,
    pub on_phase: Option<Callback<Phase>>,
}

impl SessionState {
    /// Kicks off the eager connect and the history backfill.
    pub fn start(&mut self) {
        self.connect();
        self.fetch_history();
    }

    pub fn handle(&mut self, msg: SessionMessage) {
        match msg {
            SessionMessage::Send { message, reply } => {
                let outcome = self.send(message);
                reply.send(outcome).ok();
            }
            SessionMessage::Connection { generation, event } => {
                self.on_connection_event(generation, event);
            }
            SessionMessage::HistoryFetched(result) => {
                self.on_history_fetched(result);
            }
            SessionMessage::Snapshot(reply) => {
                reply.send(self.snapshot()).ok();
            }
        }
    }

    pub fn shutdown(&mut self) {
        self.keepalive.stop();
        if let Some(link) = self.link.take() {
            link.teardown();
        }
        if let Some(task) = self.history_task.take() {
            task.abort();
        }
    }

    /// Replaces the connection with a fresh one.
    fn connect(&mut self) {
        self.keepalive.stop();
        if let Some(link) = self.link.take() {
            debug!("superseding {}", link.handle.id());
            link.teardown();
        }

        self.generation += 1;
        self.connect_attempts += 1;
        let generation = self.generation;
        let Connection { handle, mut events } =
            self.transport.open(self.config.endpoint());
        debug!("connecting {} (generation {generation})", handle.id());

        let msg_tx = self.msg_tx.clone();
        let pump = tokio::spawn(
            async move {
                while let Some(event) = events.next_event().await {
                    let msg = SessionMessage::Connection { generation, event };
                    if msg_tx.send(msg).is_err() {
                        break;
                    }
                }
                trace!("event stream ended");
            }
            .instrument(trace_span!("pump", conn = %handle.id())),
        );
        self.link = Some(Link { handle, pump });
        self.set_phase(Phase::Connecting);
    }

    fn fetch_history(&mut self) {
        let query = HistoryQuery {
            user_id: self.identity.user_id().to_owned(),
            allow_time: self.config.history_allow_time().to_owned(),
        };
        let client = self.history_client.clone();
        let msg_tx = self.msg_tx.clone();
        self.history_task = Some(tokio::spawn(async move {
            let result = client.fetch(query).await;
            msg_tx.send(SessionMessage::HistoryFetched(result)).ok();
        }));
    }

    fn send(&mut self, message: OutboundMessage) -> SendOutcome {
        if self.phase == Phase::Connected {
            if let Some(link) = &self.link {
                match link.handle.send(message.to_payload()) {
                    Ok(()) => return self.record_user_turn(&message),
                    Err(err) => {
                        // The close event is still on its way.
                        warn!("connection lost while sending: {err}");
                        self.keepalive.stop();
                        self.set_phase(Phase::Disconnected);
                    }
                }
            }
        }

        debug!(
            "not connected, dropping turn {} and reconnecting",
            message.request_id()
        );
        self.connect();
        self.notify(Notice::Reconnecting);
        SendOutcome::Deferred
    }

    fn record_user_turn(&mut self, message: &OutboundMessage) -> SendOutcome {
        // A reply to this turn must not extend the previous reply, even if
        // the server reuses its correlation id.
        if let Some(settled) = self.reassembler.reset() {
            self.transcript.replace(settled.clone());
            self.emit(TranscriptEvent::Updated(settled));
        }

        let entry = LogicalMessage::settled(
            message.request_id().clone(),
            Role::User,
            message.body(),
            Some(message.request_time()),
        );
        let id = entry.id();
        trace!("sent turn {} as {id}", message.request_id());
        self.transcript.push(entry.clone());
        self.emit(TranscriptEvent::Appended(entry));
        SendOutcome::Sent(id)
    }

    fn on_connection_event(&mut self, generation: u64, event: ConnectionEvent) {
        if generation != self.generation {
            debug!(
                "discarding {event:?} from superseded generation {generation}"
            );
            return;
        }

        match event {
            ConnectionEvent::Opened => {
                if let Some(link) = &self.link {
                    self.keepalive.start(link.handle.clone());
                }
                self.set_phase(Phase::Connected);
            }
            ConnectionEvent::Message(payload) => self.on_payload(&payload),
            ConnectionEvent::Closed => {
                self.keepalive.stop();
                self.set_phase(Phase::Disconnected);
            }
        }
    }

    fn on_payload(&mut self, payload: &Bytes) {
        let fragment = match InboundFragment::decode(payload) {
            Ok(fragment) => fragment,
            Err(err) => {
                debug!("dropping inbound frame: {err}");
                return;
            }
        };

        let step = self.reassembler.on_fragment(fragment);
        self.transcript.apply(&step);
        match step {
            Reassembly::Started { settled, current } => {
                if let Some(settled) = settled {
                    self.emit(TranscriptEvent::Updated(settled));
                }
                self.emit(TranscriptEvent::Appended(current));
            }
            Reassembly::Extended(msg) => {
                self.emit(TranscriptEvent::Updated(msg));
            }
        }
    }

    fn on_history_fetched(&mut self, result: FetchResult) {
        self.history_task = None;
        match self.transcript.load_history(result) {
            Ok(count) => debug!("loaded {count} history entries"),
            Err(err) => {
                warn!("history unavailable: {err}");
                self.notify(Notice::HistoryUnavailable(err.to_string()));
            }
        }
        let history = self.transcript.history().to_vec();
        self.emit(TranscriptEvent::HistoryLoaded(history));
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            connection: self.link.as_ref().map(|link| link.handle.id()),
            connect_attempts: self.connect_attempts,
            keepalive_active: self.keepalive.is_running(),
            transcript: self.transcript.clone(),
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase == phase {
            return;
        }
        debug!("phase: {:?} -> {phase:?}", self.phase);
        self.phase = phase;
        if let Some(on_phase) = &self.on_phase {
            on_phase(phase);
        }
    }

    #[inline]
    fn emit(&self, event: TranscriptEvent) {
        if let Some(on_transcript) = &self.on_transcript {
            on_transcript(event);
        }
    }

    #[inline]
    fn notify(&self, notice: Notice) {
        if let Some(on_notice) = &self.on_notice {
            on_notice(notice);
        }
    }
}
