//! Actor task that owns a backend.
//!
//! All mutation of a [`Backend`] happens on its task: commands from the
//! dispatcher and signals from the transport are handled one at a time, so
//! the queue and the connection flags need no locking. Work that arrives
//! during a flush waits in the channels until the flush pass is over.

use crate::backend::{Backend, BackendSnapshot};
use crate::error::{RelayError, RelayResult};
use crate::transport::SignalReceiver;
use crate::Message;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Requests a [`BackendHandle`] sends to its task.
#[derive(Debug)]
enum Command {
    Send(Message),
    Connect,
    Snapshot(oneshot::Sender<BackendSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Cheap, cloneable handle to a running backend task.
#[derive(Debug, Clone)]
pub struct BackendHandle {
    id: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
}

impl BackendHandle {
    /// Move the backend onto its own task.
    pub fn spawn(backend: Backend, signals: SignalReceiver) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: Arc::from(backend.id()),
            commands: tx,
        };

        let task = BackendTask {
            backend,
            commands: rx,
            signals,
        };
        let join = tokio::spawn(task.run());

        (handle, join)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Hand a message to the backend. Never waits on the network.
    pub fn send(&self, message: Message) -> RelayResult<()> {
        self.command(Command::Send(message))
    }

    /// Ask the backend to connect.
    pub fn connect(&self) -> RelayResult<()> {
        self.command(Command::Connect)
    }

    pub async fn snapshot(&self) -> RelayResult<BackendSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Snapshot(tx))?;
        rx.await.map_err(|_| self.closed())
    }

    /// Stop the task after closing the transport.
    pub async fn shutdown(&self) -> RelayResult<()> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Shutdown(tx))?;
        rx.await.map_err(|_| self.closed())
    }

    fn command(&self, command: Command) -> RelayResult<()> {
        self.commands.send(command).map_err(|_| self.closed())
    }

    fn closed(&self) -> RelayError {
        RelayError::BackendClosed(self.id.to_string())
    }
}

struct BackendTask {
    backend: Backend,
    commands: mpsc::UnboundedReceiver<Command>,
    signals: SignalReceiver,
}

impl BackendTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send(message)) => self.backend.send(message).await,
                    Some(Command::Connect) => self.backend.connect().await,
                    Some(Command::Snapshot(reply)) => {
                        let _ = reply.send(self.backend.snapshot());
                    }
                    Some(Command::Shutdown(reply)) => {
                        self.backend.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        // Every handle is gone
                        self.backend.shutdown().await;
                        break;
                    }
                },
                Some(signal) = self.signals.recv() => {
                    self.backend.handle_signal(signal).await;
                }
            }
        }

        debug!(destination = %self.backend.id(), "Backend task exited");
    }
}
