//! UDP transport: each message is one datagram.

use async_trait::async_trait;
use relay_core::{
    EventSink, RelayError, RelayResult, Transport, TransportFactory, TransportOptions,
};
use serde::Deserialize;
use tokio::net::UdpSocket;

/// Options for the `udp` protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UdpOptions {
    pub host: String,
    pub port: u16,
    /// Local address to bind, `0.0.0.0:0` by default
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:0".to_string()
}

pub struct UdpFactory;

impl TransportFactory for UdpFactory {
    fn validate(&self, options: &TransportOptions) -> RelayResult<()> {
        options.parse::<UdpOptions>().map(|_| ())
    }

    fn create(
        &self,
        options: &TransportOptions,
        events: EventSink,
    ) -> RelayResult<Box<dyn Transport>> {
        Ok(Box::new(UdpTransport::new(options.parse()?, events)))
    }
}

/// Connectionless transport. "Connected" only means a local socket is
/// bound and associated with the remote address.
pub struct UdpTransport {
    options: UdpOptions,
    events: EventSink,
    socket: Option<UdpSocket>,
}

impl UdpTransport {
    pub fn new(options: UdpOptions, events: EventSink) -> Self {
        Self {
            options,
            events,
            socket: None,
        }
    }

    async fn open(&self) -> std::io::Result<UdpSocket> {
        let socket = UdpSocket::bind(&self.options.bind_addr).await?;
        socket
            .connect((self.options.host.as_str(), self.options.port))
            .await?;
        Ok(socket)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn connect(&mut self) {
        match self.open().await {
            Ok(socket) => {
                self.socket = Some(socket);
                self.events.connected();
            }
            Err(e) => self.events.failed(format!(
                "{}:{}: {e}",
                self.options.host, self.options.port
            )),
        }
    }

    async fn send(&mut self, message: &[u8]) -> RelayResult<()> {
        let socket = self.socket.as_ref().ok_or(RelayError::NotConnected)?;
        let sent = socket.send(message).await?;
        if sent < message.len() {
            return Err(RelayError::Transport(format!(
                "datagram truncated: sent {sent} of {} bytes",
                message.len()
            )));
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.socket = None;
    }
}
