use std::fmt::{self, Display};
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::CorrelationId;

// ------------------------------
// Types sent to the server
// ------------------------------

/// The conversation mode of an outbound turn.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ConvType {
    /// Plain chat.
    #[default]
    Normal,
    /// Question answering over the server's reference documents.
    Qa,
}

impl Display for ConvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvType::Normal => f.write_str("normal"),
            ConvType::Qa => f.write_str("qa"),
        }
    }
}

impl FromStr for ConvType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(ConvType::Normal),
            "qa" => Ok(ConvType::Qa),
            other => Err(format!("unknown conversation type: {other}")),
        }
    }
}

/// Selects the model that should answer a turn.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    /// Wraps a raw model identifier.
    #[inline]
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Claude v2.1.
    #[inline]
    pub fn claude_v2_1() -> Self {
        Self::new("anthropic.claude-v2:1")
    }

    /// Titan Text Express.
    #[inline]
    pub fn titan_text_express() -> Self {
        Self::new("amazon.titan-text-express-v1")
    }

    /// Resolves a short alias (`claude`, `titan`) or passes a full id
    /// through unchanged.
    pub fn from_alias(alias: &str) -> Self {
        match alias.trim() {
            "claude" => Self::claude_v2_1(),
            "titan" => Self::titan_text_express(),
            other => Self::new(other),
        }
    }

    /// Returns the identifier as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ModelId {
    #[inline]
    fn default() -> Self {
        Self::claude_v2_1()
    }
}

impl Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user-authored chat turn.
///
/// Once built, the turn is immutable. It is encoded exactly once when
/// handed to a connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OutboundMessage {
    user_id: String,
    request_id: CorrelationId,
    request_time: DateTime<Utc>,
    body: String,
    conv_type: ConvType,
    model_id: ModelId,
}

#[derive(Serialize)]
struct WireOutbound<'a> {
    user_id: &'a str,
    request_id: &'a str,
    request_time: String,
    r#type: &'static str,
    body: &'a str,
    conv_type: ConvType,
    model_id: &'a str,
}

impl OutboundMessage {
    /// Creates a text turn with a freshly generated correlation id and the
    /// current time.
    pub fn new<S1: Into<String>, S2: Into<String>>(
        user_id: S1,
        body: S2,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            request_id: CorrelationId::generate(),
            request_time: Utc::now(),
            body: body.into(),
            conv_type: ConvType::default(),
            model_id: ModelId::default(),
        }
    }

    /// Sets the conversation mode.
    #[inline]
    pub fn with_conv_type(mut self, conv_type: ConvType) -> Self {
        self.conv_type = conv_type;
        self
    }

    /// Sets the model selector.
    #[inline]
    pub fn with_model(mut self, model_id: ModelId) -> Self {
        self.model_id = model_id;
        self
    }

    /// Overrides the generated correlation id.
    #[inline]
    pub fn with_request_id(mut self, request_id: CorrelationId) -> Self {
        self.request_id = request_id;
        self
    }

    /// Overrides the timestamp.
    #[inline]
    pub fn with_request_time(mut self, request_time: DateTime<Utc>) -> Self {
        self.request_time = request_time;
        self
    }

    /// Returns the sender id.
    #[inline]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Returns the correlation id of this turn.
    #[inline]
    pub fn request_id(&self) -> &CorrelationId {
        &self.request_id
    }

    /// Returns when the turn was authored.
    #[inline]
    pub fn request_time(&self) -> DateTime<Utc> {
        self.request_time
    }

    /// Returns the text of the turn.
    #[inline]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Returns the conversation mode.
    #[inline]
    pub fn conv_type(&self) -> ConvType {
        self.conv_type
    }

    /// Returns the model selector.
    #[inline]
    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    /// Encodes the turn as a JSON wire payload.
    pub fn to_payload(&self) -> Bytes {
        let wire = WireOutbound {
            user_id: &self.user_id,
            request_id: self.request_id.as_str(),
            request_time: self
                .request_time
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            r#type: "text",
            body: &self.body,
            conv_type: self.conv_type,
            model_id: self.model_id.as_str(),
        };
        // Serializing a struct of strings into a `Vec` can't fail.
        let json = serde_json::to_vec(&wire).unwrap_or_default();
        Bytes::from(json)
    }
}

/// Returns the liveness probe payload, `{"type":"ping"}`.
#[inline]
pub fn probe_payload() -> Bytes {
    Bytes::from_static(br#"{"type":"ping"}"#)
}

// ------------------------------
// Types received from the server
// ------------------------------

/// An out-of-band marker attached to a fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FragmentStatus {
    /// The server is composing a reply; the body is a placeholder.
    Typing,
    /// The server failed to answer the turn; the body describes why.
    Error,
}

/// One wire unit of a streaming assistant reply.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InboundFragment {
    /// The logical message this fragment extends.
    pub correlation_id: CorrelationId,
    /// The text delta.
    pub body: String,
    /// An optional out-of-band marker.
    pub status: Option<FragmentStatus>,
}

#[derive(Deserialize)]
struct WireInbound {
    request_id: Option<String>,
    msg: Option<String>,
    status: Option<String>,
}

/// Why an inbound payload did not yield a fragment.
#[derive(Debug)]
pub enum DecodeError {
    /// The payload is not a JSON object of the expected shape.
    Json(serde_json::Error),
    /// The payload carries no correlation id.
    MissingCorrelationId,
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Json(err) => write!(f, "invalid payload: {err}"),
            DecodeError::MissingCorrelationId => {
                write!(f, "payload has no request_id")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl InboundFragment {
    /// Creates a plain text fragment.
    #[inline]
    pub fn new<I: Into<CorrelationId>, S: Into<String>>(
        correlation_id: I,
        body: S,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            body: body.into(),
            status: None,
        }
    }

    /// Decodes a server payload of the form `{request_id, msg, status?}`.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let wire: WireInbound =
            serde_json::from_slice(payload).map_err(DecodeError::Json)?;
        let correlation_id = match wire.request_id {
            Some(id) if !id.is_empty() => CorrelationId::new(id),
            _ => return Err(DecodeError::MissingCorrelationId),
        };
        let status = match wire.status.as_deref() {
            Some("istyping") => Some(FragmentStatus::Typing),
            Some("error") => Some(FragmentStatus::Error),
            _ => None,
        };
        Ok(Self {
            correlation_id,
            body: wire.msg.unwrap_or_default(),
            status,
        })
    }
}
