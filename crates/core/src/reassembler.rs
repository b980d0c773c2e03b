//! Reassembly of streamed fragments into logical messages.

use std::collections::HashMap;

use chatwire_protocol::{CorrelationId, FragmentStatus, InboundFragment};

use crate::transcript::{LogicalMessage, Role};

/// The outcome of feeding one fragment to the [`Reassembler`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reassembly {
    /// The fragment opened a new logical message.
    Started {
        /// The previously current message, now settled.
        settled: Option<LogicalMessage>,
        /// The new current message.
        current: LogicalMessage,
    },
    /// The fragment was appended to the current message, whose updated
    /// state replaces the previous one.
    Extended(LogicalMessage),
}

impl Reassembly {
    /// Returns the message the fragment ended up in.
    #[inline]
    pub fn message(&self) -> &LogicalMessage {
        match self {
            Reassembly::Started { current, .. } => current,
            Reassembly::Extended(msg) => msg,
        }
    }
}

/// Turns a stream of fragments into logical messages.
///
/// Exactly one message is current at a time. A fragment carrying the
/// current correlation id is appended to it; any other fragment settles
/// it and starts a new assistant message. There is no end-of-stream
/// signal, so the last reply stays [`Streaming`] until something else
/// settles it.
///
/// [`Streaming`]: crate::transcript::Completion::Streaming
#[derive(Debug, Default)]
pub struct Reassembler {
    current_id: Option<CorrelationId>,
    in_progress: HashMap<CorrelationId, LogicalMessage>,
}

impl Reassembler {
    /// Feeds one fragment.
    pub fn on_fragment(&mut self, fragment: InboundFragment) -> Reassembly {
        let InboundFragment {
            correlation_id,
            body,
            status,
        } = fragment;

        if self.current_id.as_ref() == Some(&correlation_id) {
            if let Some(msg) = self.in_progress.get_mut(&correlation_id) {
                apply_fragment(msg, &body, status);
                let msg = msg.clone();
                if msg.is_settled() {
                    self.settle_current();
                }
                return Reassembly::Extended(msg);
            }
        }

        let settled = self.settle_current();
        let mut current =
            LogicalMessage::streaming(correlation_id.clone(), Role::Assistant);
        apply_fragment(&mut current, &body, status);
        trace!(
            "new message {} for {correlation_id}, settled: {:?}",
            current.id(),
            settled.as_ref().map(LogicalMessage::id)
        );
        if !current.is_settled() {
            self.current_id = Some(correlation_id.clone());
            self.in_progress.insert(correlation_id, current.clone());
        }
        Reassembly::Started { settled, current }
    }

    /// Marks a turn boundary.
    ///
    /// The next fragment always starts a new logical message, even if it
    /// carries the correlation id that was current before. Returns the
    /// previously current message, now settled.
    pub fn reset(&mut self) -> Option<LogicalMessage> {
        self.settle_current()
    }

    /// Returns the message open to appension, if any.
    #[inline]
    pub fn current(&self) -> Option<&LogicalMessage> {
        self.in_progress.get(self.current_id.as_ref()?)
    }

    fn settle_current(&mut self) -> Option<LogicalMessage> {
        let id = self.current_id.take()?;
        let mut msg = self.in_progress.remove(&id)?;
        if !msg.is_settled() {
            msg.settle();
        }
        Some(msg)
    }
}

fn apply_fragment(
    msg: &mut LogicalMessage,
    body: &str,
    status: Option<FragmentStatus>,
) {
    match status {
        // The placeholder text is not part of the reply.
        Some(FragmentStatus::Typing) => {
            let typing = msg.body().is_empty();
            msg.set_typing(typing);
        }
        Some(FragmentStatus::Error) => {
            msg.set_typing(false);
            msg.append(body);
            msg.mark_failed();
        }
        None => {
            msg.set_typing(false);
            msg.append(body);
        }
    }
}
