use pkg_state::StoreError;
use std::fmt;
use tracing::{debug, info, warn};

use crate::candidacy::LeaderLease;
use crate::context::ElectionContext;
use crate::signal::StepDown;

/// Why a leadership term ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadershipLossReason {
    /// Renewal failed: the lease expired, was revoked externally, or the
    /// store could not be reached. The cause is kept for observability only.
    LeaseLost { cause: String },
    /// The step-down signal fired and the lease was revoked.
    VoluntaryStepDown,
}

impl fmt::Display for LeadershipLossReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeadershipLossReason::LeaseLost { cause } => write!(f, "lease lost ({})", cause),
            LeadershipLossReason::VoluntaryStepDown => f.write_str("voluntary step-down"),
        }
    }
}

/// Keeps a won lease alive until it is lost or relinquished.
pub struct LeaseRenewer {
    ctx: ElectionContext,
}

impl LeaseRenewer {
    pub fn new(ctx: ElectionContext) -> Self {
        Self { ctx }
    }

    /// Renew `lease` every `renew_interval` until a renewal fails or
    /// `step_down` fires. A failed renewal is never retried.
    pub async fn run(&self, lease: LeaderLease, step_down: &mut StepDown) -> LeadershipLossReason {
        let interval = self.ctx.settings().renew_interval;
        info!(
            candidate = %lease.candidate(),
            lease = lease.id(),
            "Holding leadership (ttl={}s, renew every {:?})",
            lease.ttl().as_secs(),
            interval
        );

        loop {
            if step_down.is_triggered() {
                return self.step_down(&lease).await;
            }

            match self.ctx.bounded(self.ctx.store().keep_alive(lease.id())).await {
                Ok(resp) => debug!(lease = resp.id, ttl_seconds = resp.ttl_seconds, "Leadership renewed"),
                Err(e) => {
                    warn!(
                        candidate = %lease.candidate(),
                        lease = lease.id(),
                        error = %e,
                        "Leadership lost"
                    );
                    return LeadershipLossReason::LeaseLost {
                        cause: e.to_string(),
                    };
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = step_down.triggered() => return self.step_down(&lease).await,
            }
        }
    }

    async fn step_down(&self, lease: &LeaderLease) -> LeadershipLossReason {
        match self.ctx.bounded(self.ctx.store().revoke_lease(lease.id())).await {
            Ok(()) | Err(StoreError::LeaseNotFound(_)) => {}
            Err(e) => warn!(
                lease = lease.id(),
                error = %e,
                "Failed to revoke lease on step-down; leadership ends when it expires"
            ),
        }
        info!(candidate = %lease.candidate(), lease = lease.id(), "Stepped down from leadership");
        LeadershipLossReason::VoluntaryStepDown
    }
}
