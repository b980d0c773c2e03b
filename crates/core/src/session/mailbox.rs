use tokio::select;
use tokio::sync::{mpsc, watch};

use super::SessionMessage;
use super::state::SessionState;
use crate::error::SessionDeadError;

pub(crate) type MessageSender = mpsc::UnboundedSender<SessionMessage>;

pub(crate) struct MailboxParts {
    pub mailbox: Mailbox,
    pub msg_rx: mpsc::UnboundedReceiver<SessionMessage>,
    pub kill_rx: watch::Receiver<bool>,
}

/// The sending side of the session task.
///
/// Dropping the last mailbox stops the task, even if internal tasks still
/// hold a [`MessageSender`].
pub(crate) struct Mailbox {
    msg_tx: MessageSender,
    kill_tx: watch::Sender<bool>,
}

impl Mailbox {
    #[inline]
    pub fn new() -> MailboxParts {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = watch::channel(false);
        MailboxParts {
            mailbox: Mailbox { msg_tx, kill_tx },
            msg_rx,
            kill_rx,
        }
    }

    /// Returns a sender for tasks spawned by the session itself.
    #[inline]
    pub fn sender(&self) -> MessageSender {
        self.msg_tx.clone()
    }

    #[inline]
    pub fn send(&self, msg: SessionMessage) -> Result<(), SessionDeadError> {
        self.msg_tx.send(msg).map_err(|_| SessionDeadError)
    }

    #[inline]
    pub fn try_kill(&self) {
        self.kill_tx.send(true).ok();
    }
}

pub(crate) async fn run_session(
    mut state: SessionState,
    mut msg_rx: mpsc::UnboundedReceiver<SessionMessage>,
    mut kill_rx: watch::Receiver<bool>,
) {
    debug!("started");
    loop {
        let msg = select! {
            biased;

            // Also fires once the last mailbox is dropped.
            _ = kill_rx.changed() => {
                break;
            }
            msg = msg_rx.recv() => {
                let Some(msg) = msg else {
                    break;
                };
                msg
            }
        };
        trace!("received message: {msg:?}");

        let proc_span = trace_span!("proc msg");
        proc_span.in_scope(|| {
            state.handle(msg);
            trace!("finished");
        });
    }
    state.shutdown();
    debug!("will terminate");
}
