use std::sync::Arc;

use chatwire_protocol::{HistorySource, Identity, Transport};
use tracing::Instrument;

use super::mailbox::{Mailbox, MailboxParts, run_session};
use super::state::{Callback, SessionState};
use super::{Notice, Phase, Session, TranscriptEvent};
use crate::config::SessionConfig;
use crate::history_client::HistoryClient;
use crate::keepalive::Keepalive;

/// [`Session`] builder.
pub struct SessionBuilder {
    config: SessionConfig,
    identity: Identity,
    transport: Arc<dyn Transport>,
    history_client: HistoryClient,
    on_transcript: Option<Callback<TranscriptEvent>>,
    on_notice: Option<Callback<Notice>>,
    on_phase: Option<Callback<Phase>>,
}

impl SessionBuilder {
    /// Creates a new builder for a session of `identity`, connecting
    /// through `transport`.
    ///
    /// Without a history source the transcript starts empty.
    #[inline]
    pub fn new<T: Transport>(
        config: SessionConfig,
        identity: Identity,
        transport: T,
    ) -> Self {
        Self {
            config,
            identity,
            transport: Arc::new(transport),
            history_client: HistoryClient::empty(),
            on_transcript: None,
            on_notice: None,
            on_phase: None,
        }
    }

    /// Sets the source of the history backfill.
    #[inline]
    pub fn with_history_source<S: HistorySource + 'static>(
        mut self,
        source: S,
    ) -> Self {
        self.history_client = HistoryClient::new(source);
        self
    }

    /// Attaches a callback to be invoked on every transcript change.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(TranscriptEvent) + Send + Sync + 'static,
    ) -> Self {
        self.on_transcript = Some(Box::new(on_transcript));
        self
    }

    /// Attaches a callback to be invoked when the user should be notified.
    #[inline]
    pub fn on_notice(
        mut self,
        on_notice: impl Fn(Notice) + Send + Sync + 'static,
    ) -> Self {
        self.on_notice = Some(Box::new(on_notice));
        self
    }

    /// Attaches a callback to be invoked when the connection phase
    /// changes.
    #[inline]
    pub fn on_phase(
        mut self,
        on_phase: impl Fn(Phase) + Send + Sync + 'static,
    ) -> Self {
        self.on_phase = Some(Box::new(on_phase));
        self
    }

    /// Builds the session, connects and starts the history backfill.
    ///
    /// Must be called within a Tokio runtime.
    pub fn build(self) -> Session {
        let SessionBuilder {
            config,
            identity,
            transport,
            history_client,
            on_transcript,
            on_notice,
            on_phase,
        } = self;

        let MailboxParts {
            mailbox,
            msg_rx,
            kill_rx,
        } = Mailbox::new();

        let session = Session {
            user_id: identity.user_id().into(),
            conv_type: config.conv_type(),
            model_id: config.model_id().clone(),
            mailbox: Arc::new(mailbox),
        };

        let mut state = SessionState {
            keepalive: Keepalive::new(config.keepalive_interval()),
            config,
            identity,
            transport,
            history_client,
            msg_tx: session.mailbox.sender(),
            phase: Phase::Connecting,
            generation: 0,
            link: None,
            connect_attempts: 0,
            reassembler: Default::default(),
            transcript: Default::default(),
            history_task: None,
            on_transcript,
            on_notice,
            on_phase,
        };
        state.start();

        tokio::spawn(
            run_session(state, msg_rx, kill_rx)
                .instrument(trace_span!("session")),
        );
        session
    }
}
