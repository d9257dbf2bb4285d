//! TCP transport: one stream connection, messages written back to back.

use async_trait::async_trait;
use relay_core::{
    EventSink, RelayError, RelayResult, Transport, TransportFactory, TransportOptions,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Options for the `tcp` protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpOptions {
    pub host: String,
    pub port: u16,
    /// Terminate every message with `\n`
    #[serde(default = "default_append_newline")]
    pub append_newline: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Upper bound for writing one message to a peer that stops reading
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_append_newline() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_write_timeout_ms() -> u64 {
    10_000
}

pub struct TcpFactory;

impl TransportFactory for TcpFactory {
    fn validate(&self, options: &TransportOptions) -> RelayResult<()> {
        options.parse::<TcpOptions>().map(|_| ())
    }

    fn create(
        &self,
        options: &TransportOptions,
        events: EventSink,
    ) -> RelayResult<Box<dyn Transport>> {
        Ok(Box::new(TcpTransport::new(options.parse()?, events)))
    }
}

type WriterSlot = Arc<Mutex<Option<OwnedWriteHalf>>>;

/// Stream transport. The connection is opened on a background task that
/// then watches the read side to notice the peer going away.
pub struct TcpTransport {
    options: TcpOptions,
    events: EventSink,
    writer: WriterSlot,
    task: Option<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new(options: TcpOptions, events: EventSink) -> Self {
        Self {
            options,
            events,
            writer: Arc::new(Mutex::new(None)),
            task: None,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) {
        let addr = format!("{}:{}", self.options.host, self.options.port);
        let connect_timeout = Duration::from_millis(self.options.connect_timeout_ms);
        let events = self.events.clone();
        let slot = self.writer.clone();

        self.task = Some(tokio::spawn(async move {
            let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    events.failed(format!("{addr}: {e}"));
                    return;
                }
                Err(_) => {
                    events.failed(format!(
                        "{addr}: connect timed out after {}ms",
                        connect_timeout.as_millis()
                    ));
                    return;
                }
            };

            let _ = stream.set_nodelay(true);
            let (mut reader, writer) = stream.into_split();
            *slot.lock().await = Some(writer);
            debug!(addr = %addr, "TCP connection established");
            events.connected();

            // Nothing is expected from the peer; reading only detects loss.
            let mut buf = [0u8; 1024];
            let reason = loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break "connection closed by peer".to_string(),
                    Ok(_) => continue,
                    Err(e) => break e.to_string(),
                }
            };

            slot.lock().await.take();
            events.disconnected(reason);
        }));
    }

    async fn send(&mut self, message: &[u8]) -> RelayResult<()> {
        let append_newline = self.options.append_newline;
        let write_timeout = Duration::from_millis(self.options.write_timeout_ms);
        let mut slot = self.writer.lock().await;
        let writer = slot.as_mut().ok_or(RelayError::NotConnected)?;

        let result = tokio::time::timeout(write_timeout, async {
            writer.write_all(message).await?;
            if append_newline {
                writer.write_all(b"\n").await?;
            }
            Ok::<(), std::io::Error>(())
        })
        .await;

        let error = match result {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => RelayError::Io(e),
            Err(_) => RelayError::Transport(format!(
                "write timed out after {}ms",
                write_timeout.as_millis()
            )),
        };

        // A partial or failed write leaves the stream unusable.
        slot.take();
        drop(slot);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.events.disconnected(error.to_string());
        Err(error)
    }

    async fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}
