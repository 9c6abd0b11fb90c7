use async_trait::async_trait;
use pkg_types::kv::{GetResponse, KeepAliveResponse, LeaseGrant, LeaseId, TxnResponse, WatchEvent};
use std::pin::Pin;
use std::time::Duration;
use tokio_stream::Stream;

use crate::error::Result;

/// Ordered stream of watch notifications for one key.
///
/// An `Err` item means the subscription is broken; the consumer should drop
/// the stream and re-subscribe from the last revision it processed.
pub type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchEvent>> + Send>>;

/// The primitives leader election needs from a strongly-consistent store.
/// Implementations: in-process `StateStore`, HTTP `RemoteStore`.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Allocate a lease. The lease is not bound to any key.
    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseGrant>;

    /// Atomically write `value` under `key` iff the key's version equals
    /// `expected_version` (0 = absent). Binds the key to `lease` when given.
    async fn put_if_version(
        &self,
        key: &str,
        expected_version: u64,
        value: &[u8],
        lease: Option<LeaseId>,
    ) -> Result<TxnResponse>;

    /// Point-in-time read.
    async fn get(&self, key: &str) -> Result<GetResponse>;

    /// Extend a lease's TTL from now. Fails with `LeaseNotFound` if it is gone.
    async fn keep_alive(&self, lease: LeaseId) -> Result<KeepAliveResponse>;

    /// Destroy a lease and every key bound to it.
    async fn revoke_lease(&self, lease: LeaseId) -> Result<()>;

    /// Subscribe to changes of `key`, starting at `from_revision` (inclusive)
    /// or at the next change when `None`.
    async fn watch(&self, key: &str, from_revision: Option<u64>) -> Result<WatchStream>;
}
