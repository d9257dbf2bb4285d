//! The per-destination delivery adapter.
//!
//! A [`Backend`] owns the connection to one destination. While the destination
//! is unreachable, messages are buffered in a [`PendingQueue`]; when the
//! transport reports a live connection the queue is flushed in order before
//! new messages are sent directly.
//!
//! # State machine
//!
//! ```text
//!            connect()                 Connected (after flush)
//!  offline ------------> connecting ------------------------> connected
//!     ^                      |                                    |
//!     |   retry timer        | Failed                Disconnected |
//!     +------------------ ready <---------------------------------+
//! ```
//!
//! The status is derived from the `connected`/`connecting` flags and the
//! presence of a transport; it is never stored.

use crate::config::BackendConfig;
use crate::error::RelayResult;
use crate::queue::PendingQueue;
use crate::reconnect::ReconnectTimer;
use crate::status::BackendStatus;
use crate::transport::{
    signal_channel, EventSink, Signal, SignalReceiver, SignalSender, Transport, TransportEvent,
    TransportFactory, TransportOptions, TransportRegistry,
};
use crate::Message;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Read-only view of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendSnapshot {
    pub id: String,
    pub protocol: String,
    pub status: BackendStatus,
    pub queued: usize,
}

/// Result of one flush pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued
    Empty,
    /// Every queued message was sent
    Flushed(usize),
    /// A send failed; the failed message and everything after it stay queued
    Aborted { flushed: usize, remaining: usize },
}

/// Delivery adapter for a single destination.
pub struct Backend {
    id: String,
    config: BackendConfig,
    factory: Arc<dyn TransportFactory>,
    transport_options: TransportOptions,
    queue: PendingQueue,
    transport: Option<Box<dyn Transport>>,
    connected: bool,
    connecting: bool,
    generation: u64,
    signals: SignalSender,
    reconnect: ReconnectTimer,
}

impl Backend {
    /// Create a backend for destination `id`.
    ///
    /// Fails if no transport is registered for the configured protocol or
    /// the protocol options are invalid. Does not connect.
    ///
    /// Returns the receiver the backend's signals arrive on; feed them to
    /// [`Backend::handle_signal`].
    pub fn new(
        id: &str,
        config: BackendConfig,
        registry: &TransportRegistry,
    ) -> RelayResult<(Self, SignalReceiver)> {
        let factory = registry.get(&config.protocol)?;
        let transport_options = TransportOptions::from_config(id, &config);
        factory.validate(&transport_options)?;

        let (signals, receiver) = signal_channel();
        let backend = Self {
            id: id.to_string(),
            queue: PendingQueue::new(config.max_queue_length, config.overflow_check_interval),
            reconnect: ReconnectTimer::new(id, config.reconnect_interval()),
            config,
            factory,
            transport_options,
            transport: None,
            connected: false,
            connecting: false,
            generation: 0,
            signals,
        };

        Ok((backend, receiver))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn status(&self) -> BackendStatus {
        BackendStatus::derive(self.connected, self.connecting, self.transport.is_some())
    }

    /// Generation of the current transport; zero before the first attempt.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queued messages, oldest first.
    pub fn queued(&self) -> impl Iterator<Item = &Message> {
        self.queue.iter()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_pending()
    }

    pub fn snapshot(&self) -> BackendSnapshot {
        BackendSnapshot {
            id: self.id.clone(),
            protocol: self.config.protocol.clone(),
            status: self.status(),
            queued: self.queue.len(),
        }
    }

    /// Start connecting, unless disabled or already connected/connecting.
    ///
    /// Any previous transport is closed and replaced by a fresh one.
    pub async fn connect(&mut self) {
        if self.config.disabled {
            warn!(
                destination = %self.id,
                "Not connecting since this backend is disabled by configuration"
            );
            return;
        }
        if self.connected || self.connecting {
            warn!(
                destination = %self.id,
                connected = self.connected,
                connecting = self.connecting,
                "Not connecting, backend is already connected or connecting"
            );
            return;
        }

        info!(
            destination = %self.id,
            protocol = %self.config.protocol,
            "Connecting to backend"
        );

        self.reconnect.cancel();
        if let Some(mut previous) = self.transport.take() {
            previous.close().await;
        }

        self.generation += 1;
        self.connecting = true;

        let events = EventSink::new(self.generation, self.signals.clone());
        match self.factory.create(&self.transport_options, events) {
            Ok(transport) => {
                self.transport.insert(transport).connect().await;
            }
            Err(e) => {
                warn!(
                    destination = %self.id,
                    error = %e,
                    "Failed to create transport for backend"
                );
                self.connecting = false;
                self.reconnect.schedule(&self.signals);
            }
        }
    }

    /// Deliver a message, or queue it until the destination is reachable.
    pub async fn send(&mut self, message: Message) {
        if !self.connected {
            debug!(destination = %self.id, "Backend not connected, queuing message");
            self.enqueue(message);

            if self.transport.is_none() && !self.config.disabled && !self.reconnect.is_pending()
            {
                self.connect().await;
            }
            return;
        }

        // Older messages are still waiting: keep FIFO order by going through the queue.
        if !self.queue.is_empty() {
            self.enqueue(message);
            self.try_queue_flush().await;
            return;
        }

        let Some(transport) = self.transport.as_mut() else {
            self.queue.requeue(message);
            return;
        };

        if let Err(e) = transport.send(&message).await {
            warn!(
                destination = %self.id,
                error = %e,
                "Error sending message to backend, queuing message"
            );
            self.queue.requeue(message);
        }
    }

    /// Append a new message with overflow accounting.
    fn enqueue(&mut self, message: Message) {
        let dropped = self.queue.push(message);
        if dropped > 0 {
            self.log_dropped(dropped);
        }
    }

    fn log_dropped(&self, dropped: usize) {
        info!(
            destination = %self.id,
            dropped,
            max_queue_length = self.queue.max_len(),
            "Dropped messages from the queue since it reached maxQueueLength"
        );
    }

    /// React to a transport event or a reconnect timer.
    pub async fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Transport { generation, event } => {
                if generation != self.generation {
                    debug!(
                        destination = %self.id,
                        generation,
                        current = self.generation,
                        ?event,
                        "Ignoring event from a replaced transport"
                    );
                    return;
                }
                self.handle_transport_event(event).await;
            }
            Signal::RetryDue { ticket } => {
                if !self.reconnect.take_due(ticket) {
                    debug!(destination = %self.id, ticket, "Ignoring stale reconnect");
                    return;
                }
                warn!(destination = %self.id, "Reconnecting with backend");
                self.connect().await;
            }
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                info!(destination = %self.id, "Connected to backend");
                // Flush before flipping the flag so queued messages go out first.
                self.try_queue_flush().await;
                self.connected = true;
                self.connecting = false;
            }
            TransportEvent::Failed { reason } => {
                warn!(
                    destination = %self.id,
                    error = %reason,
                    "Connection to backend failed"
                );
                self.connected = false;
                self.connecting = false;
                self.reconnect.schedule(&self.signals);
            }
            TransportEvent::Disconnected { reason } => {
                if !self.connected && !self.connecting && self.reconnect.is_pending() {
                    debug!(
                        destination = %self.id,
                        reason = %reason,
                        "Backend already offline, reconnect pending"
                    );
                    return;
                }
                warn!(
                    destination = %self.id,
                    reason = %reason,
                    "Connection to backend was lost"
                );
                self.connected = false;
                self.connecting = false;
                self.reconnect.schedule(&self.signals);
            }
        }
    }

    /// Send queued messages in FIFO order until the queue is empty or a
    /// send fails. A message leaves the queue only after it was sent.
    pub async fn try_queue_flush(&mut self) -> FlushOutcome {
        if self.queue.is_empty() {
            return FlushOutcome::Empty;
        }

        let mut flushed = 0;
        while let Some(message) = self.queue.front() {
            let result = match self.transport.as_mut() {
                Some(transport) => transport.send(message).await,
                None => Err(crate::RelayError::NotConnected),
            };

            if let Err(e) = result {
                let remaining = self.queue.len();
                warn!(
                    destination = %self.id,
                    error = %e,
                    flushed,
                    remaining,
                    "Error while trying to flush the queue"
                );
                return FlushOutcome::Aborted { flushed, remaining };
            }

            self.queue.pop_front();
            flushed += 1;
        }

        info!(destination = %self.id, flushed, "Backend queue successfully flushed");
        FlushOutcome::Flushed(flushed)
    }

    /// Force an overflow check now. Returns the number of messages dropped.
    pub fn force_overflow_check(&mut self) -> usize {
        let dropped = self.queue.trim();
        if dropped > 0 {
            self.log_dropped(dropped);
        }
        dropped
    }

    /// Stop reconnecting and close the transport. Queued messages are lost.
    pub async fn shutdown(&mut self) {
        self.reconnect.cancel();
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.connected = false;
        self.connecting = false;

        if !self.queue.is_empty() {
            warn!(
                destination = %self.id,
                queued = self.queue.len(),
                "Backend shut down with undelivered messages"
            );
        } else {
            info!(destination = %self.id, "Backend shut down");
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("id", &self.id)
            .field("protocol", &self.config.protocol)
            .field("status", &self.status())
            .field("queued", &self.queue.len())
            .field("generation", &self.generation)
            .finish()
    }
}
