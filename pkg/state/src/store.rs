use async_trait::async_trait;
use chrono::Utc;
use pkg_constants::state::{
    LEASE_REAPER_INTERVAL_MS, LEASE_TTL_MAX_SECS, WATCH_BROADCAST_CAPACITY,
    WATCH_HISTORY_CAPACITY,
};
use pkg_types::kv::{
    ChangeEvent, GetResponse, KeepAliveResponse, KeyValue, LeaseGrant, LeaseId, TxnResponse,
    WatchEvent,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::client::{CoordinationStore, WatchStream};
use crate::error::{Result, StoreError};
use crate::watch::EventLog;

/// Single-node, in-memory coordination store.
///
/// Every mutation bumps a store-wide revision and is recorded in the
/// `EventLog`. Keys bound to a lease disappear when the lease expires or is
/// revoked. Cloning is cheap and yields a handle to the same store.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Mutex<StoreInner>>,
    event_log: EventLog,
}

/// Point-in-time counters exposed for metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub revision: u64,
    pub keys: usize,
    pub leases: usize,
}

struct LeaseRecord {
    ttl: Duration,
    deadline: Instant,
    keys: BTreeSet<String>,
}

struct StoreInner {
    revision: u64,
    keys: BTreeMap<String, KeyValue>,
    leases: HashMap<LeaseId, LeaseRecord>,
    next_lease_id: LeaseId,
    closed: bool,
}

impl StoreInner {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn delete_key(&mut self, key: &str) -> Option<WatchEvent> {
        let kv = self.keys.remove(key)?;
        if let Some(lease) = kv.lease.and_then(|id| self.leases.get_mut(&id)) {
            lease.keys.remove(key);
        }
        self.revision += 1;
        Some(WatchEvent {
            revision: self.revision,
            key: kv.key,
            change: ChangeEvent::Delete,
        })
    }

    /// Remove a lease and every key bound to it.
    fn drop_lease(&mut self, id: LeaseId) -> Option<Vec<WatchEvent>> {
        let lease = self.leases.remove(&id)?;
        Some(
            lease
                .keys
                .iter()
                .filter_map(|key| self.delete_key(key))
                .collect(),
        )
    }

    fn expire_due(&mut self, now: Instant) -> Vec<WatchEvent> {
        let mut due: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        due.sort_unstable();

        let mut events = Vec::new();
        for id in due {
            debug!(lease = id, "Lease expired");
            events.extend(self.drop_lease(id).unwrap_or_default());
        }
        events
    }
}

impl StateStore {
    /// Create an empty store retaining `watch_history` events for resumption.
    pub fn new(watch_history: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                revision: 0,
                keys: BTreeMap::new(),
                leases: HashMap::new(),
                next_lease_id: 1,
                closed: false,
            })),
            event_log: EventLog::new(watch_history, WATCH_BROADCAST_CAPACITY),
        }
    }

    /// Start the background task that expires leases whose TTL elapsed.
    pub fn spawn_lease_reaper(&self) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(LEASE_REAPER_INTERVAL_MS));
            loop {
                interval.tick().await;
                let mut inner = store.inner.lock().await;
                if inner.closed {
                    break;
                }
                let events = inner.expire_due(Instant::now());
                store.publish(events).await;
            }
        })
    }

    pub async fn stats(&self) -> StoreStats {
        let inner = self.inner.lock().await;
        StoreStats {
            revision: inner.revision,
            keys: inner.keys.len(),
            leases: inner.leases.len(),
        }
    }

    /// Shut the store down. Every later call fails with `StoreError::Closed`
    /// and live watch streams terminate.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        inner.closed = true;
        self.event_log.close().await;
        info!("Coordination store closed at revision {}", inner.revision);
    }

    /// Record events. Called with the store lock held to keep revision order.
    async fn publish(&self, events: Vec<WatchEvent>) {
        for event in events {
            self.event_log.emit(event).await;
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(WATCH_HISTORY_CAPACITY)
    }
}

fn lease_deadline(now: Instant, ttl: Duration) -> Result<Instant> {
    now.checked_add(ttl).ok_or_else(|| {
        StoreError::InvalidArgument(format!("lease ttl {}s overflows the clock", ttl.as_secs()))
    })
}

#[async_trait]
impl CoordinationStore for StateStore {
    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseGrant> {
        let ttl_seconds = ttl.as_secs();
        if ttl_seconds == 0 {
            return Err(StoreError::InvalidArgument(
                "lease ttl must be at least one second".to_string(),
            ));
        }
        if ttl_seconds > LEASE_TTL_MAX_SECS {
            return Err(StoreError::InvalidArgument(format!(
                "lease ttl {}s exceeds the maximum of {}s",
                ttl_seconds, LEASE_TTL_MAX_SECS
            )));
        }
        let ttl = Duration::from_secs(ttl_seconds);

        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        let deadline = lease_deadline(Instant::now(), ttl)?;
        let id = inner.next_lease_id;
        inner.next_lease_id += 1;
        inner.leases.insert(
            id,
            LeaseRecord {
                ttl,
                deadline,
                keys: BTreeSet::new(),
            },
        );
        debug!(lease = id, ttl_seconds, "Lease granted");

        Ok(LeaseGrant {
            id,
            ttl_seconds,
            granted_at: Utc::now(),
        })
    }

    async fn put_if_version(
        &self,
        key: &str,
        expected_version: u64,
        value: &[u8],
        lease: Option<LeaseId>,
    ) -> Result<TxnResponse> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        let expired = inner.expire_due(Instant::now());
        self.publish(expired).await;

        if let Some(id) = lease {
            if !inner.leases.contains_key(&id) {
                return Err(StoreError::LeaseNotFound(id));
            }
        }

        let existing = inner.keys.get(key).cloned();
        let current_version = existing.as_ref().map_or(0, |kv| kv.version);
        if current_version != expected_version {
            return Ok(TxnResponse {
                succeeded: false,
                revision: inner.revision,
            });
        }

        if let Some(old_lease) = existing.as_ref().and_then(|kv| kv.lease) {
            if Some(old_lease) != lease {
                if let Some(record) = inner.leases.get_mut(&old_lease) {
                    record.keys.remove(key);
                }
            }
        }
        if let Some(record) = lease.and_then(|id| inner.leases.get_mut(&id)) {
            record.keys.insert(key.to_string());
        }

        inner.revision += 1;
        let revision = inner.revision;
        let kv = KeyValue {
            key: key.to_string(),
            value: value.to_vec(),
            create_revision: existing.as_ref().map_or(revision, |kv| kv.create_revision),
            mod_revision: revision,
            version: current_version + 1,
            lease,
        };
        inner.keys.insert(key.to_string(), kv);

        self.publish(vec![WatchEvent {
            revision,
            key: key.to_string(),
            change: ChangeEvent::Put {
                value: value.to_vec(),
            },
        }])
        .await;

        Ok(TxnResponse {
            succeeded: true,
            revision,
        })
    }

    async fn get(&self, key: &str) -> Result<GetResponse> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        let expired = inner.expire_due(Instant::now());
        self.publish(expired).await;

        Ok(GetResponse {
            revision: inner.revision,
            kv: inner.keys.get(key).cloned(),
        })
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<KeepAliveResponse> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        let now = Instant::now();
        let expired = inner.expire_due(now);
        self.publish(expired).await;

        let record = inner
            .leases
            .get_mut(&lease)
            .ok_or(StoreError::LeaseNotFound(lease))?;
        record.deadline = lease_deadline(now, record.ttl)?;

        Ok(KeepAliveResponse {
            id: lease,
            ttl_seconds: record.ttl.as_secs(),
        })
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        let expired = inner.expire_due(Instant::now());
        self.publish(expired).await;

        let events = inner
            .drop_lease(lease)
            .ok_or(StoreError::LeaseNotFound(lease))?;
        debug!(lease, keys = events.len(), "Lease revoked");
        self.publish(events).await;
        Ok(())
    }

    async fn watch(&self, key: &str, from_revision: Option<u64>) -> Result<WatchStream> {
        self.inner.lock().await.check_open()?;
        self.event_log.subscribe(key, from_revision).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    const TTL: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_conditional_put_versions() {
        let store = StateStore::default();
        let lease = store.grant_lease(TTL).await.unwrap();

        let first = store
            .put_if_version("leader", 0, b"A", Some(lease.id))
            .await
            .unwrap();
        assert!(first.succeeded);
        assert_eq!(first.revision, 1);

        let second = store
            .put_if_version("leader", 0, b"B", Some(lease.id))
            .await
            .unwrap();
        assert!(!second.succeeded);

        let got = store.get("leader").await.unwrap();
        let kv = got.kv.unwrap();
        assert_eq!(kv.value, b"A");
        assert_eq!(kv.version, 1);
        assert_eq!(kv.lease, Some(lease.id));
        assert_eq!(got.revision, 1);
    }

    #[tokio::test]
    async fn test_put_requires_live_lease() {
        let store = StateStore::default();
        let err = store
            .put_if_version("leader", 0, b"A", Some(42))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::LeaseNotFound(42));
        assert!(store.grant_lease(Duration::from_millis(500)).await.is_err());
    }

    #[tokio::test]
    async fn test_huge_ttl_is_rejected() {
        let store = StateStore::default();
        for ttl in [Duration::from_secs(u64::MAX), Duration::MAX] {
            assert!(matches!(
                store.grant_lease(ttl).await,
                Err(StoreError::InvalidArgument(_))
            ));
        }
        let longest = Duration::from_secs(LEASE_TTL_MAX_SECS);
        let lease = store.grant_lease(longest).await.unwrap();
        assert_eq!(lease.ttl_seconds, LEASE_TTL_MAX_SECS);
        assert_eq!(store.keep_alive(lease.id).await.unwrap().ttl_seconds, LEASE_TTL_MAX_SECS);
        assert_eq!(store.stats().await.leases, 1);
    }

    #[tokio::test]
    async fn test_revoke_deletes_bound_keys() {
        let store = StateStore::default();
        let lease = store.grant_lease(TTL).await.unwrap();
        store
            .put_if_version("leader", 0, b"A", Some(lease.id))
            .await
            .unwrap();

        let mut watch = store.watch("leader", None).await.unwrap();
        store.revoke_lease(lease.id).await.unwrap();

        let event = watch.next().await.unwrap().unwrap();
        assert!(event.is_delete());
        assert_eq!(event.revision, 2);
        assert!(store.get("leader").await.unwrap().kv.is_none());
        assert_eq!(
            store.revoke_lease(lease.id).await,
            Err(StoreError::LeaseNotFound(lease.id))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expires_without_keepalive() {
        let store = StateStore::default();
        let _reaper = store.spawn_lease_reaper();
        let lease = store.grant_lease(TTL).await.unwrap();
        store
            .put_if_version("leader", 0, b"A", Some(lease.id))
            .await
            .unwrap();
        let mut watch = store.watch("leader", None).await.unwrap();

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(store.get("leader").await.unwrap().kv.is_some());

        let event = watch.next().await.unwrap().unwrap();
        assert!(event.is_delete());
        assert_eq!(
            store.keep_alive(lease.id).await,
            Err(StoreError::LeaseNotFound(lease.id))
        );
        assert_eq!(store.stats().await.leases, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_extends_deadline() {
        let store = StateStore::default();
        let _reaper = store.spawn_lease_reaper();
        let lease = store.grant_lease(TTL).await.unwrap();
        store
            .put_if_version("leader", 0, b"A", Some(lease.id))
            .await
            .unwrap();

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(8)).await;
            let resp = store.keep_alive(lease.id).await.unwrap();
            assert_eq!(resp.ttl_seconds, 10);
        }
        assert!(store.get("leader").await.unwrap().kv.is_some());
    }

    #[tokio::test]
    async fn test_resume_watch_from_revision() {
        let store = StateStore::default();
        let lease = store.grant_lease(TTL).await.unwrap();
        store
            .put_if_version("leader", 0, b"A", Some(lease.id))
            .await
            .unwrap();
        store.revoke_lease(lease.id).await.unwrap();

        // Subscribing after the fact still observes both changes.
        let mut watch = store.watch("leader", Some(1)).await.unwrap();
        let put = watch.next().await.unwrap().unwrap();
        assert_eq!(put.change, ChangeEvent::Put { value: b"A".to_vec() });
        assert!(watch.next().await.unwrap().unwrap().is_delete());
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let store = StateStore::default();
        store.close().await;
        assert_eq!(store.get("leader").await, Err(StoreError::Closed));
        assert!(matches!(
            store.watch("leader", None).await,
            Err(StoreError::Closed)
        ));
    }
}
