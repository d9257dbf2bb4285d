//! Wire protocols for relay backends.
//!
//! Each module provides a [`TransportFactory`](relay_core::TransportFactory)
//! for one protocol. [`default_registry`] registers all of them under the
//! names used in the destinations file.

pub mod mqtt;
pub mod queue;
pub mod tcp;
pub mod udp;

use relay_core::TransportRegistry;
use std::sync::Arc;

pub use mqtt::{MqttFactory, MqttTransportOptions};
pub use queue::{CloudQueueFactory, CloudQueueOptions};
pub use tcp::{TcpFactory, TcpOptions};
pub use udp::{UdpFactory, UdpOptions};

pub const TCP: &str = "tcp";
pub const UDP: &str = "udp";
pub const MQTT: &str = "mqtt";
pub const SQS: &str = "sqs";
pub const CLOUD_QUEUE: &str = "cloud-queue";

/// Registry with every built-in protocol.
pub fn default_registry() -> TransportRegistry {
    let mut registry = TransportRegistry::new();
    let cloud_queue = Arc::new(CloudQueueFactory);

    registry
        .register(TCP, Arc::new(TcpFactory))
        .register(UDP, Arc::new(UdpFactory))
        .register(MQTT, Arc::new(MqttFactory))
        .register(SQS, cloud_queue.clone())
        .register(CLOUD_QUEUE, cloud_queue);
    registry
}
