//! Session configuration.

use std::time::Duration;

use chatwire_protocol::{ConvType, ModelId};

/// How often a liveness probe is sent while the connection is open.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(57);

/// Turns older than this are not part of the history backfill.
pub const DEFAULT_HISTORY_ALLOW_TIME: &str = "2024-07-28T00:00:00Z";

/// Builder for [`SessionConfig`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionConfigBuilder {
    endpoint: String,
    keepalive_interval: Option<Duration>,
    conv_type: Option<ConvType>,
    model_id: Option<ModelId>,
    history_allow_time: Option<String>,
}

impl SessionConfigBuilder {
    /// Creates a builder for a session talking to `endpoint`.
    #[inline]
    pub fn with_endpoint<S: Into<String>>(endpoint: S) -> Self {
        Self {
            endpoint: endpoint.into(),
            keepalive_interval: None,
            conv_type: None,
            model_id: None,
            history_allow_time: None,
        }
    }

    /// Sets the keepalive interval.
    #[inline]
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    /// Sets the conversation mode used by [`Session::compose`].
    ///
    /// [`Session::compose`]: crate::Session::compose
    #[inline]
    pub fn with_conv_type(mut self, conv_type: ConvType) -> Self {
        self.conv_type = Some(conv_type);
        self
    }

    /// Sets the model used by [`Session::compose`].
    ///
    /// [`Session::compose`]: crate::Session::compose
    #[inline]
    pub fn with_model(mut self, model_id: ModelId) -> Self {
        self.model_id = Some(model_id);
        self
    }

    /// Sets the lower time bound of the history backfill.
    #[inline]
    pub fn with_history_allow_time<S: Into<String>>(mut self, time: S) -> Self {
        self.history_allow_time = Some(time.into());
        self
    }

    /// Builds the configuration.
    #[inline]
    pub fn build(self) -> SessionConfig {
        SessionConfig {
            endpoint: self.endpoint,
            keepalive_interval: self
                .keepalive_interval
                .filter(|interval| !interval.is_zero())
                .unwrap_or(DEFAULT_KEEPALIVE_INTERVAL),
            conv_type: self.conv_type.unwrap_or_default(),
            model_id: self.model_id.unwrap_or_default(),
            history_allow_time: self
                .history_allow_time
                .unwrap_or_else(|| DEFAULT_HISTORY_ALLOW_TIME.to_owned()),
        }
    }
}

/// Configuration of a chat session.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionConfig {
    pub(crate) endpoint: String,
    pub(crate) keepalive_interval: Duration,
    pub(crate) conv_type: ConvType,
    pub(crate) model_id: ModelId,
    pub(crate) history_allow_time: String,
}

impl SessionConfig {
    /// Returns the socket endpoint.
    #[inline]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the keepalive interval.
    #[inline]
    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive_interval
    }

    /// Returns the default conversation mode.
    #[inline]
    pub fn conv_type(&self) -> ConvType {
        self.conv_type
    }

    /// Returns the default model.
    #[inline]
    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    /// Returns the lower time bound of the history backfill.
    #[inline]
    pub fn history_allow_time(&self) -> &str {
        &self.history_allow_time
    }
}
