//! Dispatcher: owns every backend and routes messages to them by id.

use crate::backend::{Backend, BackendSnapshot};
use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::task::BackendHandle;
use crate::transport::{SignalReceiver, TransportRegistry};
use crate::Message;
use std::collections::BTreeMap;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Registry of running backends, keyed by destination id.
#[derive(Debug, Default)]
pub struct Dispatcher {
    backends: BTreeMap<String, BackendHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a backend for every configured destination and start their tasks.
    ///
    /// All backends are constructed before any task starts, so a
    /// configuration error leaves nothing running.
    pub fn from_config(config: &RelayConfig, registry: &TransportRegistry) -> RelayResult<Self> {
        let mut built = Vec::with_capacity(config.destinations.len());
        for (id, backend_config) in &config.destinations {
            built.push(Backend::new(id, backend_config.clone(), registry)?);
        }

        let mut dispatcher = Self::new();
        for (backend, signals) in built {
            dispatcher.register(backend, signals)?;
        }

        info!(destinations = dispatcher.len(), "Dispatcher ready");
        Ok(dispatcher)
    }

    /// Start a backend's task and take ownership of it.
    pub fn register(
        &mut self,
        backend: Backend,
        signals: SignalReceiver,
    ) -> RelayResult<BackendHandle> {
        if self.backends.contains_key(backend.id()) {
            return Err(RelayError::Config(format!(
                "duplicate destination id '{}'",
                backend.id()
            )));
        }

        let (handle, task) = BackendHandle::spawn(backend, signals);
        self.backends.insert(handle.id().to_string(), handle.clone());
        self.tasks.push(task);
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Destination ids, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    pub fn get(&self, id: &str) -> Option<&BackendHandle> {
        self.backends.get(id)
    }

    /// Route a message to one destination.
    pub fn send(&self, id: &str, message: Message) -> RelayResult<()> {
        self.handle(id)?.send(message)
    }

    /// Send a copy of the message to every destination. Returns how many
    /// backends accepted it.
    pub fn broadcast(&self, message: Message) -> usize {
        let mut accepted = 0;
        for handle in self.backends.values() {
            match handle.send(message.clone()) {
                Ok(()) => accepted += 1,
                Err(e) => warn!(destination = %handle.id(), error = %e, "Broadcast skipped backend"),
            }
        }
        accepted
    }

    pub fn connect(&self, id: &str) -> RelayResult<()> {
        self.handle(id)?.connect()
    }

    pub fn connect_all(&self) {
        for handle in self.backends.values() {
            if let Err(e) = handle.connect() {
                warn!(destination = %handle.id(), error = %e, "Connect request failed");
            }
        }
    }

    /// Snapshot of every backend that is still running, in id order.
    pub async fn snapshots(&self) -> Vec<BackendSnapshot> {
        let mut snapshots = Vec::with_capacity(self.backends.len());
        for handle in self.backends.values() {
            match handle.snapshot().await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!(destination = %handle.id(), error = %e, "Snapshot failed"),
            }
        }
        snapshots
    }

    /// Shut every backend down and wait for the tasks to finish.
    pub async fn shutdown(self) {
        for handle in self.backends.values() {
            if let Err(e) = handle.shutdown().await {
                warn!(destination = %handle.id(), error = %e, "Backend already stopped");
            }
        }
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Dispatcher shut down");
    }

    fn handle(&self, id: &str) -> RelayResult<&BackendHandle> {
        self.backends
            .get(id)
            .ok_or_else(|| RelayError::UnknownDestination(id.to_string()))
    }
}
