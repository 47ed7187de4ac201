//! Broadcast-backed change feed.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::domain::listener::{ChangeEvent, ChangeFilter, ColumnFilter};
use crate::domain::ports::{ChangeEventSource, ChangeEventSourceError, ChangeStream};

/// In-process change source fanning published events out to every open
/// channel.
///
/// Channels only see events published after they were opened. A channel
/// that falls more than `capacity` events behind skips the oldest ones.
pub struct InMemoryChangeFeed {
    sender: Mutex<Option<broadcast::Sender<ChangeEvent>>>,
}

impl InMemoryChangeFeed {
    /// Create a feed buffering up to `capacity` events per channel.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Publish `event` to every open channel. Returns how many channels
    /// received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let Some(sender) = self.lock_sender().clone() else {
            debug!(table = %event.table, "change feed disconnected; event dropped");
            return 0;
        };
        sender.send(event).unwrap_or(0)
    }

    /// Close every open channel and refuse new ones.
    pub fn disconnect(&self) {
        if self.lock_sender().take().is_some() {
            warn!("change feed disconnected");
        }
    }

    fn lock_sender(&self) -> MutexGuard<'_, Option<broadcast::Sender<ChangeEvent>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

struct Channel {
    receiver: broadcast::Receiver<ChangeEvent>,
    table: String,
    column: Option<ColumnFilter>,
}

impl Channel {
    async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(mut event) if event.table == self.table => {
                    if let Some(column) = &self.column {
                        if !column.matches(event.record()) {
                            continue;
                        }
                        event.filter_match = Some(column.clone());
                    }
                    return Some(event);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(table = %self.table, skipped, "change channel lagged; events skipped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[async_trait]
impl ChangeEventSource for InMemoryChangeFeed {
    async fn open(&self, filter: &ChangeFilter) -> Result<ChangeStream, ChangeEventSourceError> {
        let receiver = self
            .lock_sender()
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| ChangeEventSourceError::connection("change feed disconnected"))?;
        let channel = Channel {
            receiver,
            table: filter.table_name().to_owned(),
            column: filter.column_filter().cloned(),
        };
        Ok(stream::unfold(channel, |mut channel| async move {
            let event = channel.next().await?;
            Some((event, channel))
        })
        .boxed())
    }
}
