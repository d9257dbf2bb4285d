//! Fixed-interval reconnect timer.
//!
//! The delay is the same after a failed attempt and after a lost connection,
//! with no backoff and no jitter. A remote that keeps flapping is therefore
//! retried once per interval for as long as it flaps.

use crate::transport::{Signal, SignalSender};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// A cancellable, single-slot retry timer owned by one backend.
///
/// When the timer fires it posts [`Signal::RetryDue`] with its ticket. Only
/// the most recently scheduled, uncancelled ticket is honored, so a retry
/// that was already in the channel when the backend reconnected on its own
/// is recognized as stale.
#[derive(Debug)]
pub struct ReconnectTimer {
    destination: String,
    interval: Duration,
    next_ticket: u64,
    active: Option<u64>,
    pending: Option<JoinHandle<()>>,
}

impl ReconnectTimer {
    pub fn new(destination: &str, interval: Duration) -> Self {
        Self {
            destination: destination.to_string(),
            interval,
            next_ticket: 0,
            active: None,
            pending: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Schedule a retry, replacing any pending one. Returns its ticket.
    pub fn schedule(&mut self, signals: &SignalSender) -> u64 {
        self.cancel();

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let interval = self.interval;
        let tx = signals.clone();

        self.active = Some(ticket);
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = tx.send(Signal::RetryDue { ticket });
        }));

        debug!(
            destination = %self.destination,
            ticket,
            delay_ms = interval.as_millis() as u64,
            "Reconnect scheduled"
        );
        ticket
    }

    /// Drop the pending retry, if any.
    pub fn cancel(&mut self) {
        self.active = None;
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    /// Consume a fired ticket. Returns false for stale or cancelled tickets.
    pub fn take_due(&mut self, ticket: u64) -> bool {
        if self.active == Some(ticket) {
            self.active = None;
            self.pending = None;
            true
        } else {
            false
        }
    }

    pub fn is_pending(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for ReconnectTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
