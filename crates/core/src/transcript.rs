//! Transcript types and the history merger.

use std::collections::HashSet;
use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};

use chatwire_protocol::{CorrelationId, HistoryError, HistoryRecord};
use chrono::{DateTime, Utc};

use crate::reassembler::Reassembly;

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one transcript entry.
///
/// Unlike a [`CorrelationId`], which a user turn and its reply share, a
/// message id is unique to a single entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u64);

impl MessageId {
    #[inline]
    pub(crate) fn next() -> Self {
        Self(NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg#{}", self.0)
    }
}

/// Who authored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// The signed-in user.
    User,
    /// The assistant on the other end of the socket.
    Assistant,
}

/// Whether a message may still grow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Completion {
    /// Fragments may still be appended.
    Streaming,
    /// No further mutation is expected.
    Settled,
}

/// One transcript entry, possibly still being reassembled.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LogicalMessage {
    id: MessageId,
    correlation_id: CorrelationId,
    role: Role,
    body: String,
    completion: Completion,
    typing: bool,
    failed: bool,
    timestamp: Option<DateTime<Utc>>,
}

impl LogicalMessage {
    pub(crate) fn streaming(correlation_id: CorrelationId, role: Role) -> Self {
        Self {
            id: MessageId::next(),
            correlation_id,
            role,
            body: String::new(),
            completion: Completion::Streaming,
            typing: false,
            failed: false,
            timestamp: None,
        }
    }

    pub(crate) fn settled<S: Into<String>>(
        correlation_id: CorrelationId,
        role: Role,
        body: S,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            body: body.into(),
            completion: Completion::Settled,
            timestamp,
            ..Self::streaming(correlation_id, role)
        }
    }

    #[inline]
    pub(crate) fn append(&mut self, delta: &str) {
        self.body.push_str(delta);
    }

    #[inline]
    pub(crate) fn settle(&mut self) {
        self.completion = Completion::Settled;
        self.typing = false;
    }

    #[inline]
    pub(crate) fn set_typing(&mut self, typing: bool) {
        self.typing = typing;
    }

    #[inline]
    pub(crate) fn mark_failed(&mut self) {
        self.failed = true;
        self.settle();
    }

    /// Returns the id of this entry.
    #[inline]
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Returns the correlation id of the turn this message belongs to.
    #[inline]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Returns who authored this message.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the accumulated body.
    #[inline]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Returns the body as display lines.
    #[inline]
    pub fn lines(&self) -> std::str::Lines<'_> {
        self.body.lines()
    }

    /// Returns the completion state.
    #[inline]
    pub fn completion(&self) -> Completion {
        self.completion
    }

    /// Returns whether no further fragments are expected.
    #[inline]
    pub fn is_settled(&self) -> bool {
        self.completion == Completion::Settled
    }

    /// Returns whether the server announced it is composing this message
    /// and no text has arrived yet.
    #[inline]
    pub fn is_typing(&self) -> bool {
        self.typing
    }

    /// Returns whether the server reported a failure for this turn.
    #[inline]
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Returns when the message was authored, if known.
    #[inline]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }
}

/// The ordered, duplicate-free view of a conversation.
///
/// The transcript has two sections. The historical section is filled at
/// most once, from the history backfill; the live section grows as turns
/// are sent and replies are reassembled. Iteration always yields the
/// historical section first, so a backfill that resolves late still lands
/// before the live entries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transcript {
    history: Vec<LogicalMessage>,
    live: Vec<LogicalMessage>,
    history_loaded: bool,
}

impl Transcript {
    /// Loads the historical section from the history backfill.
    ///
    /// Records are ordered by timestamp. A user turn (`type == "text"`)
    /// yields a settled user message from `body`, and a non-empty `msg`
    /// yields a settled assistant reply. Records repeating an already seen
    /// correlation id are dropped.
    ///
    /// If `result` is an error, or any record is malformed, the historical
    /// section stays empty and the error is returned for reporting. Either
    /// way the backfill counts as done; later calls are ignored and return
    /// `Ok(0)`.
    pub fn load_history(
        &mut self,
        result: Result<Vec<HistoryRecord>, HistoryError>,
    ) -> Result<usize, HistoryError> {
        if self.history_loaded {
            warn!("history has already been loaded, ignoring");
            return Ok(0);
        }
        self.history_loaded = true;

        let messages = messages_from_records(result?)?;
        self.history = messages;
        Ok(self.history.len())
    }

    /// Returns whether the backfill has run.
    #[inline]
    pub fn history_loaded(&self) -> bool {
        self.history_loaded
    }

    /// Returns the historical section.
    #[inline]
    pub fn history(&self) -> &[LogicalMessage] {
        &self.history
    }

    /// Returns the live section.
    #[inline]
    pub fn live(&self) -> &[LogicalMessage] {
        &self.live
    }

    /// Appends a live entry.
    pub(crate) fn push(&mut self, msg: LogicalMessage) {
        self.live.push(msg);
    }

    /// Replaces the live entry with the same message id. Returns `false`
    /// if there is none.
    pub(crate) fn replace(&mut self, msg: LogicalMessage) -> bool {
        // The entry being updated is almost always the last one.
        let Some(slot) = self.live.iter_mut().rev().find(|m| m.id == msg.id)
        else {
            return false;
        };
        *slot = msg;
        true
    }

    /// Applies a reassembly step to the live section.
    pub(crate) fn apply(&mut self, reassembly: &Reassembly) {
        match reassembly {
            Reassembly::Started { settled, current } => {
                if let Some(settled) = settled {
                    self.replace(settled.clone());
                }
                self.push(current.clone());
            }
            Reassembly::Extended(msg) => {
                if !self.replace(msg.clone()) {
                    warn!("extended message {} is not in transcript", msg.id);
                    self.push(msg.clone());
                }
            }
        }
    }

    /// Returns the entry with the given id.
    pub fn get(&self, id: MessageId) -> Option<&LogicalMessage> {
        self.iter().find(|msg| msg.id == id)
    }

    /// Iterates over all entries, history first.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &LogicalMessage> {
        self.history.iter().chain(self.live.iter())
    }

    /// Returns the number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.history.len() + self.live.len()
    }

    /// Returns whether the transcript has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn messages_from_records(
    records: Vec<HistoryRecord>,
) -> Result<Vec<LogicalMessage>, HistoryError> {
    let mut stamped = Vec::with_capacity(records.len());
    for record in records {
        let timestamp = record.timestamp()?;
        stamped.push((timestamp, record));
    }
    // Stable, so records sharing a timestamp keep the endpoint's order.
    stamped.sort_by_key(|(timestamp, _)| *timestamp);

    let mut seen = HashSet::new();
    let mut messages = Vec::with_capacity(stamped.len() * 2);
    for (timestamp, record) in stamped {
        if !seen.insert(record.request_id.clone()) {
            debug!("dropping duplicated history record {}", record.request_id);
            continue;
        }
        if record.is_user_turn() {
            messages.push(LogicalMessage::settled(
                record.request_id.clone(),
                Role::User,
                record.body,
                Some(timestamp),
            ));
        }
        if let Some(reply) = record.msg.filter(|msg| !msg.is_empty()) {
            messages.push(LogicalMessage::settled(
                record.request_id,
                Role::Assistant,
                reply,
                Some(timestamp),
            ));
        }
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use chatwire_protocol::{HistoryErrorKind, InboundFragment};
    use chatwire_test_transport::history_record;

    use super::*;
    use crate::reassembler::Reassembler;

    fn bodies(transcript: &Transcript) -> Vec<(Role, &str)> {
        transcript.iter().map(|m| (m.role(), m.body())).collect()
    }

    #[test]
    fn test_load_orders_by_time() {
        let mut transcript = Transcript::default();
        let loaded = transcript
            .load_history(Ok(vec![
                history_record("2024-08-01T09:31:00Z", "2", "second", None),
                history_record(
                    "2024-08-01T09:30:00Z",
                    "1",
                    "first",
                    Some("first reply"),
                ),
            ]))
            .unwrap();
        assert_eq!(loaded, 3);
        assert_eq!(
            bodies(&transcript),
            vec![
                (Role::User, "first"),
                (Role::Assistant, "first reply"),
                (Role::User, "second"),
            ]
        );
        assert!(transcript.iter().all(LogicalMessage::is_settled));
    }

    #[test]
    fn test_non_text_records_keep_reply_only() {
        let mut record =
            history_record("2024-08-01T09:30:00Z", "1", "img", Some("a cat"));
        record.r#type = "image".to_owned();

        let mut transcript = Transcript::default();
        transcript.load_history(Ok(vec![record])).unwrap();
        assert_eq!(bodies(&transcript), vec![(Role::Assistant, "a cat")]);
    }

    #[test]
    fn test_duplicated_records_are_dropped() {
        let mut transcript = Transcript::default();
        transcript
            .load_history(Ok(vec![
                history_record("2024-08-01T09:30:00Z", "1", "hi", None),
                history_record("2024-08-01T09:30:00Z", "1", "hi", None),
            ]))
            .unwrap();
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn test_failed_or_malformed_history_is_empty() {
        let mut transcript = Transcript::default();
        let err = transcript
            .load_history(Err(HistoryError::network()))
            .unwrap_err();
        assert_eq!(err.kind(), HistoryErrorKind::Network);
        assert!(transcript.is_empty());
        assert!(transcript.history_loaded());

        let mut transcript = Transcript::default();
        let err = transcript
            .load_history(Ok(vec![
                history_record("2024-08-01T09:30:00Z", "1", "ok", None),
                history_record("not a time", "2", "broken", None),
            ]))
            .unwrap_err();
        assert_eq!(err.kind(), HistoryErrorKind::Malformed);
        assert!(transcript.is_empty());

        let mut transcript = Transcript::default();
        assert_eq!(transcript.load_history(Ok(vec![])).unwrap(), 0);
        assert!(transcript.is_empty());
    }

    #[test]
    fn test_history_loads_once() {
        let mut transcript = Transcript::default();
        transcript
            .load_history(Ok(vec![history_record(
                "2024-08-01T09:30:00Z",
                "1",
                "hi",
                None,
            )]))
            .unwrap();
        let again = transcript.load_history(Ok(vec![history_record(
            "2024-08-01T09:35:00Z",
            "9",
            "again",
            None,
        )]));
        assert_eq!(again.unwrap(), 0);
        assert_eq!(bodies(&transcript), vec![(Role::User, "hi")]);
    }

    #[test]
    fn test_history_then_live() {
        let mut transcript = Transcript::default();
        transcript
            .load_history(Ok(vec![history_record(
                "2024-08-01T09:30:00Z",
                "a",
                "hi",
                None,
            )]))
            .unwrap();

        let mut reassembler = Reassembler::default();
        let step = reassembler.on_fragment(InboundFragment::new("b", "yo"));
        transcript.apply(&step);

        let entries: Vec<_> = transcript.iter().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].correlation_id().as_str(), "a");
        assert_eq!(entries[0].role(), Role::User);
        assert_eq!(entries[1].correlation_id().as_str(), "b");
        assert_eq!(entries[1].body(), "yo");
        assert_ne!(entries[0].id(), entries[1].id());
    }

    #[test]
    fn test_late_history_goes_first() {
        let mut transcript = Transcript::default();
        let mut reassembler = Reassembler::default();
        let step = reassembler.on_fragment(InboundFragment::new("b", "yo"));
        transcript.apply(&step);

        transcript
            .load_history(Ok(vec![history_record(
                "2024-08-01T09:30:00Z",
                "a",
                "hi",
                None,
            )]))
            .unwrap();
        assert_eq!(
            bodies(&transcript),
            vec![(Role::User, "hi"), (Role::Assistant, "yo")]
        );
    }

    #[test]
    fn test_lines() {
        let msg = LogicalMessage::settled(
            CorrelationId::from("1"),
            Role::Assistant,
            "one\ntwo",
            None,
        );
        assert_eq!(msg.lines().collect::<Vec<_>>(), vec!["one", "two"]);
    }
}
