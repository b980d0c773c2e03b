use std::time::Duration;

use chatwire_core::config::SessionConfigBuilder;
use chatwire_core::{
    Notice, Phase, Session, SessionBuilder as CoreSessionBuilder,
    TranscriptEvent,
};
use chatwire_protocol::{ConvType, Identity, ModelId};
use chatwire_ws::{HistoryConfigBuilder, HttpHistorySource, WsTransport};

type Callback<T> = Box<dyn Fn(T) + Send + Sync>;

/// A session builder.
///
/// The built [`Session`] talks WebSocket to the chat endpoint and, if a
/// history URL is given, backfills the transcript from it using the
/// identity's access token.
pub struct SessionBuilder {
    config: SessionConfigBuilder,
    identity: Identity,
    history_url: Option<String>,
    on_transcript: Option<Callback<TranscriptEvent>>,
    on_notice: Option<Callback<Notice>>,
    on_phase: Option<Callback<Phase>>,
}

impl SessionBuilder {
    /// Creates a session builder for `identity`, chatting over the socket
    /// at `endpoint`.
    pub fn new<S: Into<String>>(endpoint: S, identity: Identity) -> Self {
        Self {
            config: SessionConfigBuilder::with_endpoint(endpoint),
            identity,
            history_url: None,
            on_transcript: None,
            on_notice: None,
            on_phase: None,
        }
    }

    /// Sets the history endpoint.
    #[inline]
    pub fn with_history_url<S: Into<String>>(mut self, url: S) -> Self {
        self.history_url = Some(url.into());
        self
    }

    /// Sets the default conversation mode.
    #[inline]
    pub fn with_conv_type(mut self, conv_type: ConvType) -> Self {
        self.config = self.config.with_conv_type(conv_type);
        self
    }

    /// Sets the default model.
    #[inline]
    pub fn with_model(mut self, model_id: ModelId) -> Self {
        self.config = self.config.with_model(model_id);
        self
    }

    /// Sets the keepalive interval.
    #[inline]
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.with_keepalive_interval(interval);
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

    /// Builds and starts a new session.
    ///
    /// Must be called within a Tokio runtime.
    pub fn build(self) -> Session {
        let SessionBuilder {
            config,
            identity,
            history_url,
            on_transcript,
            on_notice,
            on_phase,
        } = self;

        let access_token = identity.access_token().to_owned();
        let transport = WsTransport::new();
        let mut builder =
            CoreSessionBuilder::new(config.build(), identity, transport);
        if let Some(url) = history_url {
            let history_config = HistoryConfigBuilder::with_base_url(url)
                .with_access_token(access_token)
                .build();
            builder = builder
                .with_history_source(HttpHistorySource::new(history_config));
        }
        if let Some(on_transcript) = on_transcript {
            builder = builder.on_transcript(on_transcript);
        }
        if let Some(on_notice) = on_notice {
            builder = builder.on_notice(on_notice);
        }
        if let Some(on_phase) = on_phase {
            builder = builder.on_phase(on_phase);
        }
        debug!("starting session");
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use chatwire_core::SendOutcome;
    use tokio::net::TcpListener;
    use tokio::time::{sleep, timeout};

    use super::*;

    #[tokio::test]
    async fn test_unreachable_endpoint_defers_sends() {
        // Grab a free port, then stop listening on it.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let identity = Identity::new("alice", "secret").unwrap();
        let session =
            SessionBuilder::new(format!("ws://{addr}"), identity).build();

        timeout(Duration::from_secs(5), async {
            loop {
                let snapshot = session.snapshot().await.unwrap();
                if snapshot.phase == Phase::Disconnected {
                    break;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let outcome = session.send_text("hello").await.unwrap();
        assert_eq!(outcome, SendOutcome::Deferred);
        let snapshot = session.snapshot().await.unwrap();
        assert_eq!(snapshot.connect_attempts, 2);
        assert!(snapshot.transcript.is_empty());
        session.close();
    }
}
