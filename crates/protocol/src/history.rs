use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CorrelationId, HistoryError};

/// The record type that marks a user's own turn.
pub const USER_TURN_TYPE: &str = "text";

/// One stored turn returned by the history endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// When the turn was authored, as an RFC 3339 timestamp.
    pub request_time: String,
    /// Correlation id of the turn.
    pub request_id: CorrelationId,
    /// Record type; `"text"` marks the user's own turn.
    pub r#type: String,
    /// What the user wrote.
    #[serde(default)]
    pub body: String,
    /// The assistant's settled reply, if any.
    #[serde(default)]
    pub msg: Option<String>,
}

impl HistoryRecord {
    /// Returns whether `body` is a turn the user wrote.
    #[inline]
    pub fn is_user_turn(&self) -> bool {
        self.r#type == USER_TURN_TYPE
    }

    /// Parses `request_time`.
    pub fn timestamp(&self) -> Result<DateTime<Utc>, HistoryError> {
        DateTime::parse_from_rfc3339(&self.request_time)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|err| {
                HistoryError::malformed().with_reason(format!(
                    "bad request_time {:?} in {}: {err}",
                    self.request_time, self.request_id
                ))
            })
    }
}

/// Parameters of the one-shot history request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HistoryQuery {
    /// Whose history to fetch.
    pub user_id: String,
    /// Only turns newer than this RFC 3339 timestamp are returned.
    pub allow_time: String,
}

/// A type that can retrieve the conversation history.
///
/// It is called exactly once per session, at start.
pub trait HistorySource: Send + Sync {
    /// Fetches the stored turns for `query`.
    ///
    /// The returned future must be independent of `self`.
    fn fetch(
        &self,
        query: &HistoryQuery,
    ) -> impl Future<Output = Result<Vec<HistoryRecord>, HistoryError>>
    + Send
    + 'static;
}

/// Decodes a history response body.
///
/// The endpoint wraps the records in an envelope whose `msg` field is a
/// JSON-encoded string: `{"statusCode": 200, "msg": "[...]"}`. A `msg`
/// that is already an array, or a bare array body, is accepted as well.
pub fn decode_history(
    payload: &[u8],
) -> Result<Vec<HistoryRecord>, HistoryError> {
    let value: Value = serde_json::from_slice(payload).map_err(|err| {
        HistoryError::malformed().with_reason(format!("{err}"))
    })?;

    let records = match value {
        Value::Array(_) => value,
        Value::Object(mut envelope) => {
            let status = envelope.get("statusCode").and_then(Value::as_u64);
            if let Some(status) = status.filter(|s| *s != 200) {
                let detail = envelope
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                return Err(HistoryError::status()
                    .with_reason(format!("{status} {detail}")));
            }
            match envelope.remove("msg") {
                Some(Value::String(inner)) => {
                    serde_json::from_str(&inner).map_err(|err| {
                        HistoryError::malformed()
                            .with_reason(format!("msg: {err}"))
                    })?
                }
                Some(inner @ Value::Array(_)) => inner,
                _ => {
                    return Err(HistoryError::malformed()
                        .with_reason("envelope has no msg"));
                }
            }
        }
        _ => {
            return Err(HistoryError::malformed()
                .with_reason("expected an object or an array"));
        }
    };

    serde_json::from_value(records)
        .map_err(|err| HistoryError::malformed().with_reason(format!("{err}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::HistoryErrorKind;

    fn records_json() -> Value {
        json!([
            {
                "request_time": "2024-08-01T09:30:00.000Z",
                "request_id": "1",
                "type": "text",
                "body": "hi",
                "msg": "hello there"
            },
            {
                "request_time": "2024-08-01T09:31:00.000Z",
                "request_id": "2",
                "type": "text",
                "body": "bye"
            }
        ])
    }

    #[test]
    fn test_decode_envelope() {
        let envelope = json!({
            "statusCode": 200,
            "msg": records_json().to_string(),
        });
        let records =
            decode_history(envelope.to_string().as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].is_user_turn());
        assert_eq!(records[0].msg.as_deref(), Some("hello there"));
        assert_eq!(records[1].msg, None);
    }

    #[test]
    fn test_decode_bare_array() {
        let records =
            decode_history(records_json().to_string().as_bytes()).unwrap();
        assert_eq!(records[1].request_id, CorrelationId::from("2"));
    }

    #[test]
    fn test_decode_failures() {
        let err = decode_history(br#"{"statusCode":500,"msg":"boom"}"#)
            .unwrap_err();
        assert_eq!(err.kind(), HistoryErrorKind::Status);

        let err = decode_history(br#"{"statusCode":200,"msg":"{oops"}"#)
            .unwrap_err();
        assert_eq!(err.kind(), HistoryErrorKind::Malformed);

        let err = decode_history(br#"{"statusCode":200}"#).unwrap_err();
        assert_eq!(err.kind(), HistoryErrorKind::Malformed);

        let err = decode_history(br#"[{"request_id":"1"}]"#).unwrap_err();
        assert_eq!(err.kind(), HistoryErrorKind::Malformed);

        let err = decode_history(b"42").unwrap_err();
        assert_eq!(err.kind(), HistoryErrorKind::Malformed);
    }

    #[test]
    fn test_timestamp() {
        let record: HistoryRecord =
            serde_json::from_value(records_json()[0].clone()).unwrap();
        assert_eq!(
            record.timestamp().unwrap().to_rfc3339(),
            "2024-08-01T09:30:00+00:00"
        );

        let bad = HistoryRecord {
            request_time: "yesterday".to_owned(),
            ..record
        };
        assert_eq!(
            bad.timestamp().unwrap_err().kind(),
            HistoryErrorKind::Malformed
        );
    }
}
