//! Cloud message-queue transport over HTTP.
//!
//! Each message becomes one `POST <queueUrl>` with a JSON body of
//! `{"messageBody": "..."}`. Messages that are not valid UTF-8 are sent
//! base64-encoded with `"messageEncoding": "base64"`. There is no session to
//! hold open, so the transport reports `Connected` as soon as its HTTP client
//! is built.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use relay_core::{
    EventSink, RelayError, RelayResult, Transport, TransportFactory, TransportOptions,
};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::Duration;
use tracing::debug;

/// Options for the `sqs` / `cloud-queue` protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudQueueOptions {
    pub queue_url: String,
    /// Sent as a bearer token when present
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

/// Request payload for one message.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest<'a> {
    message_body: Cow<'a, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_encoding: Option<&'static str>,
}

impl<'a> SendMessageRequest<'a> {
    /// UTF-8 messages go as-is; anything else is base64 so no byte is lost.
    fn new(message: &'a [u8]) -> Self {
        match std::str::from_utf8(message) {
            Ok(text) => Self {
                message_body: Cow::Borrowed(text),
                message_encoding: None,
            },
            Err(_) => Self {
                message_body: Cow::Owned(BASE64.encode(message)),
                message_encoding: Some("base64"),
            },
        }
    }
}

pub struct CloudQueueFactory;

impl CloudQueueFactory {
    fn parse(options: &TransportOptions) -> RelayResult<CloudQueueOptions> {
        let parsed: CloudQueueOptions = options.parse()?;
        let invalid = |reason: String| RelayError::InvalidOptions {
            destination: options.destination.clone(),
            reason,
        };

        let url = Url::parse(&parsed.queue_url)
            .map_err(|e| invalid(format!("queueUrl: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "queueUrl must be http or https, got {}",
                url.scheme()
            )));
        }
        Ok(parsed)
    }
}

impl TransportFactory for CloudQueueFactory {
    fn validate(&self, options: &TransportOptions) -> RelayResult<()> {
        Self::parse(options).map(|_| ())
    }

    fn create(
        &self,
        options: &TransportOptions,
        events: EventSink,
    ) -> RelayResult<Box<dyn Transport>> {
        Ok(Box::new(CloudQueueTransport::new(
            Self::parse(options)?,
            events,
        )))
    }
}

pub struct CloudQueueTransport {
    options: CloudQueueOptions,
    events: EventSink,
    client: Option<Client>,
}

impl CloudQueueTransport {
    pub fn new(options: CloudQueueOptions, events: EventSink) -> Self {
        Self {
            options,
            events,
            client: None,
        }
    }
}

#[async_trait]
impl Transport for CloudQueueTransport {
    async fn connect(&mut self) {
        match Client::builder()
            .timeout(Duration::from_secs(self.options.timeout_secs))
            .build()
        {
            Ok(client) => {
                self.client = Some(client);
                self.events.connected();
            }
            Err(e) => self.events.failed(format!("Failed to create HTTP client: {e}")),
        }
    }

    async fn send(&mut self, message: &[u8]) -> RelayResult<()> {
        let client = self.client.as_ref().ok_or(RelayError::NotConnected)?;

        debug!(
            url = %self.options.queue_url,
            bytes = message.len(),
            "Posting message to queue"
        );

        let mut request = client
            .post(&self.options.queue_url)
            .json(&SendMessageRequest::new(message));
        if let Some(token) = &self.options.auth_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Transport(format!("HTTP {status}: {body}")));
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.client = None;
    }
}
