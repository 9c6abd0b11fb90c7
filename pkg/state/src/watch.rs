use pkg_types::kv::WatchEvent;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::client::WatchStream;
use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
enum LogEntry {
    Event(WatchEvent),
    Closed,
}

/// In-memory event log that records every mutation with its store revision.
/// Subscribers may resume from any revision still held in the ring buffer.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<RwLock<EventLogInner>>,
    sender: broadcast::Sender<LogEntry>,
}

struct EventLogInner {
    /// Ring buffer of recent events (capped)
    events: VecDeque<WatchEvent>,
    max_events: usize,
    /// Highest revision evicted from the buffer (0 if nothing was evicted)
    compacted_through: u64,
    closed: bool,
}

impl EventLog {
    /// Create a new event log retaining at most `max_events` events.
    pub fn new(max_events: usize, broadcast_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            inner: Arc::new(RwLock::new(EventLogInner {
                events: VecDeque::with_capacity(max_events),
                max_events: max_events.max(1),
                compacted_through: 0,
                closed: false,
            })),
            sender,
        }
    }

    /// Record a new event. Callers emit in revision order.
    pub async fn emit(&self, event: WatchEvent) {
        let mut inner = self.inner.write().await;
        if inner.events.len() >= inner.max_events {
            if let Some(evicted) = inner.events.pop_front() {
                inner.compacted_through = evicted.revision;
            }
        }
        inner.events.push_back(event.clone());
        // Sent under the write lock so `subscribe` never sees a gap.
        let _ = self.sender.send(LogEntry::Event(event));
    }

    /// Terminate every live subscription with `StoreError::Closed`.
    pub async fn close(&self) {
        let mut inner = self.inner.write().await;
        inner.closed = true;
        let _ = self.sender.send(LogEntry::Closed);
    }

    /// Highest revision that can no longer be replayed.
    pub async fn compacted_through(&self) -> u64 {
        self.inner.read().await.compacted_through
    }

    /// Subscribe to events for `key`.
    ///
    /// With `from_revision`, retained events at or after that revision are
    /// replayed before live ones. Fails with `Compacted` when part of the
    /// requested range has already been evicted.
    pub async fn subscribe(&self, key: &str, from_revision: Option<u64>) -> Result<WatchStream> {
        let inner = self.inner.read().await;
        if inner.closed {
            return Err(StoreError::Closed);
        }
        if let Some(from) = from_revision {
            if from <= inner.compacted_through {
                return Err(StoreError::Compacted {
                    requested: from,
                    compacted: inner.compacted_through,
                });
            }
        }

        let rx = self.sender.subscribe();
        let min_revision = from_revision.unwrap_or(0);
        let buffered: Vec<WatchEvent> = match from_revision {
            Some(from) => inner
                .events
                .iter()
                .filter(|e| e.revision >= from && e.key == key)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        drop(inner);

        let key = key.to_string();
        let live = BroadcastStream::new(rx).filter_map(move |entry| match entry {
            Ok(LogEntry::Event(event)) => {
                (event.key == key && event.revision >= min_revision).then_some(Ok(event))
            }
            Ok(LogEntry::Closed) => Some(Err(StoreError::Closed)),
            Err(BroadcastStreamRecvError::Lagged(n)) => Some(Err(StoreError::Unavailable(
                format!("watch subscriber lagged, {} events dropped", n),
            ))),
        });

        Ok(Box::pin(tokio_stream::iter(buffered.into_iter().map(Ok)).chain(live)))
    }
}
