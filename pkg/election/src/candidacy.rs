use pkg_state::StoreError;
use pkg_types::Candidate;
use pkg_types::kv::{KeyValue, LeaseId};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::context::ElectionContext;
use crate::error::Result;

/// Proof of a won election: the lease the leadership key is bound to.
///
/// Whoever holds this is responsible for renewing or revoking it.
#[derive(Debug)]
pub struct LeaderLease {
    id: LeaseId,
    ttl: Duration,
    candidate: Candidate,
    revision: u64,
}

impl LeaderLease {
    pub fn id(&self) -> LeaseId {
        self.id
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn candidate(&self) -> &Candidate {
        &self.candidate
    }

    /// Store revision at which the leadership key was written.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// Result of a completed candidacy attempt.
#[derive(Debug)]
pub enum CandidacyOutcome {
    /// The leadership key names this candidate and is bound to the lease.
    Elected(LeaderLease),
    /// Someone else holds the key. `leader` is `None` when the confirming
    /// read found no key or an unreadable value.
    Defeated { leader: Option<Candidate> },
}

impl CandidacyOutcome {
    pub fn acquired(&self) -> bool {
        matches!(self, CandidacyOutcome::Elected(_))
    }

    pub fn into_lease(self) -> Option<LeaderLease> {
        match self {
            CandidacyOutcome::Elected(lease) => Some(lease),
            CandidacyOutcome::Defeated { .. } => None,
        }
    }
}

/// Claims the leadership key with a conditional write under a fresh lease.
#[derive(Clone)]
pub struct CandidacyEngine {
    ctx: ElectionContext,
}

impl CandidacyEngine {
    pub fn new(ctx: ElectionContext) -> Self {
        Self { ctx }
    }

    /// Make one attempt to become leader.
    ///
    /// The lease granted for the attempt is revoked on every path that does
    /// not return `Elected`.
    pub async fn attempt(&self) -> Result<CandidacyOutcome> {
        let settings = self.ctx.settings();
        let grant = self
            .ctx
            .bounded(self.ctx.store().grant_lease(settings.lease_ttl))
            .await?;

        match self.claim(grant.id).await {
            Ok(CandidacyOutcome::Elected(lease)) => {
                info!(
                    candidate = %self.ctx.candidate(),
                    lease = lease.id,
                    revision = lease.revision,
                    "Elected leader"
                );
                Ok(CandidacyOutcome::Elected(lease))
            }
            Ok(defeated) => {
                self.release(grant.id).await;
                Ok(defeated)
            }
            Err(e) => {
                self.release(grant.id).await;
                Err(e)
            }
        }
    }

    /// Retry `attempt` with exponential backoff while the store is
    /// unreachable. Returns `None` if `stop` resolves while backing off.
    pub async fn attempt_with_backoff<S>(&self, stop: S) -> Result<Option<CandidacyOutcome>>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(stop);
        let settings = self.ctx.settings();
        let mut backoff = settings.backoff_initial;
        loop {
            match self.attempt().await {
                Ok(outcome) => return Ok(Some(outcome)),
                Err(e) if e.is_recoverable() => {
                    warn!(
                        candidate = %self.ctx.candidate(),
                        error = %e,
                        "Candidacy attempt failed; retrying in {:?}",
                        backoff
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = &mut stop => return Ok(None),
                    }
                    backoff = (backoff * 2).min(settings.backoff_max);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read who currently holds leadership.
    pub async fn current_leader(&self) -> Result<Option<Candidate>> {
        let resp = self
            .ctx
            .bounded(self.ctx.store().get(self.ctx.leader_key()))
            .await?;
        match resp.kv {
            Some(kv) => Ok(Some(Candidate::from_value(&kv.value)?)),
            None => Ok(None),
        }
    }

    /// Revoke a lease that will not back leadership. Failures are logged;
    /// the store still expires the lease on its own.
    pub async fn release(&self, lease: LeaseId) {
        match self.ctx.bounded(self.ctx.store().revoke_lease(lease)).await {
            Ok(()) => debug!(lease, "Released unused lease"),
            Err(StoreError::LeaseNotFound(_)) => debug!(lease, "Unused lease already gone"),
            Err(e) => warn!(lease, error = %e, "Failed to revoke unused lease"),
        }
    }

    async fn claim(&self, lease: LeaseId) -> Result<CandidacyOutcome> {
        let candidate = self.ctx.candidate();
        let key = self.ctx.leader_key();

        let txn = self
            .ctx
            .bounded(
                self.ctx
                    .store()
                    .put_if_version(key, 0, candidate.as_bytes(), Some(lease)),
            )
            .await?;

        // The transaction echo is advisory; the latest read decides.
        let current = self.ctx.bounded(self.ctx.store().get(key)).await?;
        let outcome = match current.kv {
            Some(kv) if self.is_ours(&kv, lease) => CandidacyOutcome::Elected(LeaderLease {
                id: lease,
                ttl: self.ctx.settings().lease_ttl,
                candidate: candidate.clone(),
                revision: kv.mod_revision,
            }),
            Some(kv) => match Candidate::from_value(&kv.value) {
                Ok(leader) => CandidacyOutcome::Defeated {
                    leader: Some(leader),
                },
                Err(e) => {
                    warn!(key, error = %e, "Leadership key holds a malformed value");
                    CandidacyOutcome::Defeated { leader: None }
                }
            },
            None => CandidacyOutcome::Defeated { leader: None },
        };

        if txn.succeeded && !outcome.acquired() {
            warn!(
                candidate = %candidate,
                "Conditional write succeeded but leadership could not be confirmed"
            );
        }
        Ok(outcome)
    }

    fn is_ours(&self, kv: &KeyValue, lease: LeaseId) -> bool {
        self.ctx.candidate().matches(&kv.value) && kv.lease == Some(lease)
    }
}
