//! Transport contract between a backend and a wire protocol.
//!
//! A [`Transport`] speaks one protocol to one remote sink. It never calls back
//! into the backend: lifecycle changes are reported as [`TransportEvent`]s
//! through the [`EventSink`] it was created with, and the backend consumes them
//! from its signal channel.

use crate::config::BackendConfig;
use crate::error::{RelayError, RelayResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Lifecycle notification emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is usable
    Connected,
    /// The connect attempt failed; the connection is not usable
    Failed { reason: String },
    /// A previously usable connection was lost
    Disconnected { reason: String },
}

/// Everything a backend reacts to besides direct calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Event from the transport created for connection `generation`
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    /// The reconnect timer identified by `ticket` fired
    RetryDue { ticket: u64 },
}

pub type SignalSender = mpsc::UnboundedSender<Signal>;
pub type SignalReceiver = mpsc::UnboundedReceiver<Signal>;

/// Create the channel a backend receives its signals on.
pub fn signal_channel() -> (SignalSender, SignalReceiver) {
    mpsc::unbounded_channel()
}

/// Handle a transport uses to report lifecycle events to its backend.
///
/// Every event is tagged with the generation of the transport, so events
/// from a transport the backend has already replaced are ignored.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: SignalSender,
}

impl EventSink {
    pub fn new(generation: u64, tx: SignalSender) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, event: TransportEvent) {
        // A closed channel means the backend is gone; nobody is left to tell.
        let _ = self.tx.send(Signal::Transport {
            generation: self.generation,
            event,
        });
    }

    pub fn connected(&self) {
        self.emit(TransportEvent::Connected);
    }

    pub fn failed(&self, reason: impl Into<String>) {
        self.emit(TransportEvent::Failed {
            reason: reason.into(),
        });
    }

    pub fn disconnected(&self, reason: impl Into<String>) {
        self.emit(TransportEvent::Disconnected {
            reason: reason.into(),
        });
    }

    /// True once the owning backend has shut down.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One connection to one remote sink over one protocol.
///
/// A fresh transport is created for every connect attempt; instances are
/// never reused across reconnects.
#[async_trait]
pub trait Transport: Send {
    /// Begin establishing the connection.
    ///
    /// Must not wait for the remote side. The outcome is reported through
    /// the [`EventSink`] as `Connected` or `Failed`.
    async fn connect(&mut self);

    /// Transmit one message. Any error is treated as transient by the backend.
    async fn send(&mut self, message: &[u8]) -> RelayResult<()>;

    /// Release the connection. Called when the backend discards this transport.
    async fn close(&mut self) {}
}

/// Options handed to a transport factory.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Destination id, for logging
    pub destination: String,
    /// Protocol-specific options, verbatim from the configuration
    pub options: Map<String, Value>,
    /// Reconnect interval the backend uses, for transports that keep their own timers
    pub reconnect_interval: Duration,
}

impl TransportOptions {
    pub fn from_config(destination: &str, config: &BackendConfig) -> Self {
        Self {
            destination: destination.to_string(),
            options: config.options.clone(),
            reconnect_interval: config.reconnect_interval(),
        }
    }

    /// Deserialize the protocol options into a transport's own option type.
    pub fn parse<T: DeserializeOwned>(&self) -> RelayResult<T> {
        serde_json::from_value(Value::Object(self.options.clone())).map_err(|e| {
            RelayError::InvalidOptions {
                destination: self.destination.clone(),
                reason: e.to_string(),
            }
        })
    }
}

/// Builds transports for one protocol.
pub trait TransportFactory: Send + Sync {
    /// Check the options once, when the backend is constructed.
    fn validate(&self, _options: &TransportOptions) -> RelayResult<()> {
        Ok(())
    }

    /// Create a new, unconnected transport.
    fn create(
        &self,
        options: &TransportOptions,
        events: EventSink,
    ) -> RelayResult<Box<dyn Transport>>;
}

/// Protocol name to transport factory.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    factories: HashMap<String, Arc<dyn TransportFactory>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a protocol name, replacing any previous one.
    pub fn register(
        &mut self,
        protocol: impl Into<String>,
        factory: Arc<dyn TransportFactory>,
    ) -> &mut Self {
        self.factories.insert(protocol.into(), factory);
        self
    }

    /// Look up the factory for a protocol.
    pub fn get(&self, protocol: &str) -> RelayResult<Arc<dyn TransportFactory>> {
        self.factories
            .get(protocol)
            .cloned()
            .ok_or_else(|| RelayError::UnsupportedProtocol(protocol.to_string()))
    }

    /// Registered protocol names, sorted.
    pub fn protocols(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("protocols", &self.protocols())
            .finish()
    }
}
