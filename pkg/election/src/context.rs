use pkg_constants::election::{
    CANDIDACY_BACKOFF_INITIAL_MS, CANDIDACY_BACKOFF_MAX_MS, LEADER_KEY, LEADER_LEASE_TTL_SECS,
    LEADER_RENEW_INTERVAL_SECS, STORE_CALL_TIMEOUT_MS, WATCH_RESUBSCRIBE_BACKOFF_MS,
};
use pkg_constants::state::LEASE_TTL_MAX_SECS;
use pkg_state::{CoordinationStore, StoreError};
use pkg_types::Candidate;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ElectionError, Result};

/// Tunables for one candidate.
#[derive(Debug, Clone)]
pub struct ElectionSettings {
    /// Identity written under the leadership key when elected
    pub candidate: Candidate,

    /// Key whose presence designates the leader
    pub leader_key: String,

    /// Leadership lease TTL (whole seconds)
    pub lease_ttl: Duration,

    /// Renewal interval (strictly less than the TTL)
    pub renew_interval: Duration,

    /// Upper bound for every unary store call
    pub call_timeout: Duration,

    /// First and maximum delay when retrying a candidacy on an unreachable store
    pub backoff_initial: Duration,
    pub backoff_max: Duration,

    /// Delay before re-subscribing a broken watch
    pub resubscribe_backoff: Duration,

    /// Keep competing after a term ends in `LeaseLost`
    pub rejoin_after_loss: bool,
}

impl ElectionSettings {
    pub fn new(candidate: Candidate) -> Self {
        Self {
            candidate,
            leader_key: LEADER_KEY.to_string(),
            lease_ttl: Duration::from_secs(LEADER_LEASE_TTL_SECS),
            renew_interval: Duration::from_secs(LEADER_RENEW_INTERVAL_SECS),
            call_timeout: Duration::from_millis(STORE_CALL_TIMEOUT_MS),
            backoff_initial: Duration::from_millis(CANDIDACY_BACKOFF_INITIAL_MS),
            backoff_max: Duration::from_millis(CANDIDACY_BACKOFF_MAX_MS),
            resubscribe_backoff: Duration::from_millis(WATCH_RESUBSCRIBE_BACKOFF_MS),
            rejoin_after_loss: false,
        }
    }

    pub fn with_leader_key(mut self, key: impl Into<String>) -> Self {
        self.leader_key = key.into();
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_rejoin_after_loss(mut self, rejoin: bool) -> Self {
        self.rejoin_after_loss = rejoin;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.leader_key.is_empty() {
            return Err(ElectionError::Config("leader key must not be empty".into()));
        }
        if self.lease_ttl < Duration::from_secs(1) || self.lease_ttl.subsec_nanos() != 0 {
            return Err(ElectionError::Config(format!(
                "lease ttl must be a whole number of seconds >= 1, got {:?}",
                self.lease_ttl
            )));
        }
        if self.lease_ttl > Duration::from_secs(LEASE_TTL_MAX_SECS) {
            return Err(ElectionError::Config(format!(
                "lease ttl {:?} exceeds the maximum of {}s",
                self.lease_ttl, LEASE_TTL_MAX_SECS
            )));
        }
        if self.renew_interval.is_zero() || self.renew_interval >= self.lease_ttl {
            return Err(ElectionError::Config(format!(
                "renew interval {:?} must be non-zero and below the lease ttl {:?}",
                self.renew_interval, self.lease_ttl
            )));
        }
        if self.call_timeout.is_zero() {
            return Err(ElectionError::Config("call timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// Everything an election component needs: the store handle and the
/// settings of this candidate. Cloning shares both.
#[derive(Clone)]
pub struct ElectionContext {
    store: Arc<dyn CoordinationStore>,
    settings: Arc<ElectionSettings>,
}

impl ElectionContext {
    pub fn new(store: Arc<dyn CoordinationStore>, settings: ElectionSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            store,
            settings: Arc::new(settings),
        })
    }

    pub fn store(&self) -> &dyn CoordinationStore {
        self.store.as_ref()
    }

    pub fn settings(&self) -> &ElectionSettings {
        &self.settings
    }

    pub fn candidate(&self) -> &Candidate {
        &self.settings.candidate
    }

    pub fn leader_key(&self) -> &str {
        &self.settings.leader_key
    }

    /// Run a unary store call under `call_timeout`; a timeout is reported
    /// as `StoreError::Unavailable`.
    pub async fn bounded<T, F>(&self, call: F) -> std::result::Result<T, StoreError>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.settings.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "store call timed out after {:?}",
                self.settings.call_timeout
            ))),
        }
    }
}
