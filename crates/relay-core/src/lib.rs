//! Relay core: per-destination delivery adapters.
//!
//! A [`Backend`] owns one logical outbound connection. It buffers messages
//! while the destination is unreachable and flushes them, in order, once the
//! transport reports a connection again.
//!
//! # Guarantees
//!
//! 1. **Ordered**: queued messages leave in the order they were sent
//! 2. **Drop-Oldest**: when the queue overflows, the oldest messages go first
//! 3. **Always Retrying**: connection failures and losses never stop a backend;
//!    it reconnects after a fixed interval
//! 4. **Best-Effort**: nothing is persisted; messages can be lost on overflow
//!    or shutdown
//!
//! # Architecture
//!
//! ```text
//! Dispatcher --send(id, msg)--> BackendHandle --> BackendTask { Backend }
//!                                                      |      ^
//!                                               send() |      | TransportEvent
//!                                                      v      |
//!                                                    Transport
//! ```
//!
//! Wire protocols live outside this crate and plug in through
//! [`TransportFactory`] and [`TransportRegistry`].

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod reconnect;
pub mod status;
pub mod task;
pub mod transport;

#[cfg(test)]
mod tests;

/// An opaque message. The relay never looks inside.
pub type Message = Vec<u8>;

pub use backend::{Backend, BackendSnapshot, FlushOutcome};
pub use config::{BackendConfig, RelayConfig};
pub use dispatcher::Dispatcher;
pub use error::{RelayError, RelayResult};
pub use queue::PendingQueue;
pub use reconnect::ReconnectTimer;
pub use status::BackendStatus;
pub use task::BackendHandle;
pub use transport::{
    signal_channel, EventSink, Signal, SignalReceiver, SignalSender, Transport, TransportEvent,
    TransportFactory, TransportOptions, TransportRegistry,
};
