//! Backend connection status.

use serde::Serialize;
use std::fmt;

/// Externally visible connection state of a backend.
///
/// Never stored: always derived from the backend's flags via [`BackendStatus::derive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    /// No transport has been created yet
    Offline,
    /// A connect attempt is in flight
    Connecting,
    /// A transport exists but is neither connected nor connecting
    Ready,
    /// The transport reported a live connection
    Connected,
}

impl BackendStatus {
    pub fn derive(connected: bool, connecting: bool, has_transport: bool) -> Self {
        if connected {
            Self::Connected
        } else if connecting {
            Self::Connecting
        } else if has_transport {
            Self::Ready
        } else {
            Self::Offline
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
