//! Moves stdin lines into the dispatcher and waits for queues to drain.

use relay_core::{Dispatcher, RelayResult};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::Instant;
use tracing::debug;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where input lines are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Broadcast,
    Destination(String),
}

/// Relay every non-empty line until end of input. Returns the number of
/// lines relayed.
pub async fn pump_lines<R>(reader: R, dispatcher: &Dispatcher, route: &Route) -> RelayResult<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut relayed = 0;

    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        match route {
            Route::Broadcast => {
                let accepted = dispatcher.broadcast(line.into_bytes());
                debug!(accepted, "Broadcast line");
            }
            Route::Destination(id) => dispatcher.send(id, line.into_bytes())?,
        }
        relayed += 1;
    }

    Ok(relayed)
}

/// Wait until the watched backends have empty queues or `timeout` passes.
/// Returns the number of messages still queued.
pub async fn drain(dispatcher: &Dispatcher, watched: &[String], timeout: Duration) -> usize {
    let deadline = Instant::now() + timeout;

    loop {
        let mut queued = 0;
        for id in watched {
            if let Some(handle) = dispatcher.get(id) {
                if let Ok(snapshot) = handle.snapshot().await {
                    queued += snapshot.queued;
                }
            }
        }

        if queued == 0 || Instant::now() >= deadline {
            return queued;
        }
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }
}
