//! Periodic liveness probes.

use std::time::Duration;

use chatwire_protocol::{ConnectionHandle, probe_payload};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::Instrument;

/// Sends a liveness probe over the live connection at a fixed interval.
///
/// At most one timer runs at a time: starting the controller again (after
/// a reconnect) cancels the previous timer first.
#[derive(Debug)]
pub struct Keepalive {
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl Keepalive {
    /// Creates a stopped controller.
    #[inline]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            task: None,
        }
    }

    /// Starts probing `connection`, replacing any running timer.
    ///
    /// The first probe goes out one interval from now. The timer ends on
    /// its own once the connection stops accepting frames.
    pub fn start(&mut self, connection: ConnectionHandle) {
        self.stop();

        let period = self.interval;
        let conn_id = connection.id();
        let task = tokio::spawn(
            async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if let Err(err) = connection.send(probe_payload()) {
                        debug!("stop probing: {err}");
                        break;
                    }
                    trace!("probe sent");
                }
            }
            .instrument(trace_span!("keepalive", conn = %conn_id)),
        );
        self.task = Some(task);
    }

    /// Stops the timer, if any.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Returns whether a timer is active.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Keepalive {
    fn drop(&mut self) {
        self.stop();
    }
}
