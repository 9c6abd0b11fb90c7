use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::candidacy::{CandidacyEngine, CandidacyOutcome};
use crate::context::ElectionContext;
use crate::error::{ElectionError, Result};
use crate::renewer::{LeadershipLossReason, LeaseRenewer};
use crate::signal::StepDown;
use crate::watcher::{ElectedTerm, LeaderWatcher};

/// How a coordinator run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorExit {
    /// This candidate held leadership and the term is over.
    TermEnded(LeadershipLossReason),
    /// Step-down fired while the candidate was following.
    Withdrawn,
}

/// Runs one candidate: an immediate candidacy attempt alongside a
/// background [`LeaderWatcher`], and the renewal loop whenever a term is won.
pub struct Coordinator {
    ctx: ElectionContext,
    step_down: StepDown,
}

impl Coordinator {
    pub fn new(ctx: ElectionContext, step_down: StepDown) -> Self {
        Self { ctx, step_down }
    }

    /// Run until a term ends (or, with `rejoin_after_loss`, until a term ends
    /// voluntarily), the candidate withdraws, or the store is closed.
    pub async fn run(self) -> Result<CoordinatorExit> {
        let candidate = self.ctx.candidate().clone();
        if self.step_down.is_triggered() {
            info!(candidate = %candidate, "Step-down requested before start");
            return Ok(CoordinatorExit::Withdrawn);
        }

        let (elected_tx, elected_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watcher = LeaderWatcher::new(
            self.ctx.clone(),
            elected_tx,
            shutdown_rx,
            self.step_down.clone(),
        );

        info!(
            candidate = %candidate,
            key = self.ctx.leader_key(),
            "Joining election"
        );
        let mut session = Session {
            engine: CandidacyEngine::new(self.ctx.clone()),
            renewer: LeaseRenewer::new(self.ctx.clone()),
            rejoin: self.ctx.settings().rejoin_after_loss,
            step_down: self.step_down,
            elected_rx,
            watcher_task: tokio::spawn(watcher.run()),
            watcher_finished: false,
            held_term: None,
        };

        let result = session.drive().await;
        session.shutdown(shutdown_tx).await;

        match &result {
            Ok(CoordinatorExit::TermEnded(reason)) => {
                info!(candidate = %candidate, reason = %reason, "Leadership term ended")
            }
            Ok(CoordinatorExit::Withdrawn) => info!(candidate = %candidate, "Withdrew from election"),
            Err(e) => error!(candidate = %candidate, error = %e, "Election aborted"),
        }
        result
    }
}

struct Session {
    engine: CandidacyEngine,
    renewer: LeaseRenewer,
    rejoin: bool,
    step_down: StepDown,
    elected_rx: mpsc::Receiver<ElectedTerm>,
    watcher_task: JoinHandle<Result<()>>,
    watcher_finished: bool,
    // Reply for the final term; dropped only after the watcher is told to stop.
    held_term: Option<oneshot::Sender<()>>,
}

impl Session {
    async fn drive(&mut self) -> Result<CoordinatorExit> {
        let mut stop = self.step_down.clone();
        let first = self
            .engine
            .attempt_with_backoff(async move { stop.triggered().await })
            .await?;

        match first {
            None => return Ok(CoordinatorExit::Withdrawn),
            Some(CandidacyOutcome::Elected(lease)) => {
                let reason = self.renewer.run(lease, &mut self.step_down).await;
                if self.is_final(&reason) {
                    return Ok(CoordinatorExit::TermEnded(reason));
                }
                warn!(reason = %reason, "Leadership lost; rejoining as follower");
            }
            Some(CandidacyOutcome::Defeated { leader: Some(leader) }) => {
                info!(leader = %leader, "Following current leader")
            }
            Some(CandidacyOutcome::Defeated { leader: None }) => info!("Following; leader unknown"),
        }

        loop {
            tokio::select! {
                term = self.elected_rx.recv() => {
                    let Some(ElectedTerm { lease, done }) = term else {
                        return Err(self.watcher_exit().await);
                    };
                    let reason = self.renewer.run(lease, &mut self.step_down).await;
                    if self.is_final(&reason) {
                        self.held_term = Some(done);
                        return Ok(CoordinatorExit::TermEnded(reason));
                    }
                    warn!(reason = %reason, "Leadership lost; rejoining as follower");
                    let _ = done.send(());
                }
                joined = &mut self.watcher_task, if !self.watcher_finished => {
                    self.watcher_finished = true;
                    return Err(watcher_error(joined));
                }
                _ = self.step_down.triggered() => {
                    info!("Step-down requested while following");
                    return Ok(CoordinatorExit::Withdrawn);
                }
            }
        }
    }

    fn is_final(&self, reason: &LeadershipLossReason) -> bool {
        match reason {
            LeadershipLossReason::VoluntaryStepDown => true,
            LeadershipLossReason::LeaseLost { .. } => !self.rejoin,
        }
    }

    async fn watcher_exit(&mut self) -> ElectionError {
        if self.watcher_finished {
            return ElectionError::WatcherAborted("watch task already stopped".into());
        }
        self.watcher_finished = true;
        watcher_error((&mut self.watcher_task).await)
    }

    /// Stop the watcher and revoke any lease it won that was never taken.
    async fn shutdown(mut self, shutdown_tx: watch::Sender<bool>) {
        shutdown_tx.send_replace(true);
        self.elected_rx.close();
        while let Ok(term) = self.elected_rx.try_recv() {
            warn!(lease = term.lease.id(), "Releasing lease won during shutdown");
            self.engine.release(term.lease.id()).await;
        }
        drop(self.held_term.take());

        if !self.watcher_finished {
            match self.watcher_task.await {
                Ok(Ok(())) => debug!("Leader watcher stopped"),
                Ok(Err(e)) => warn!(error = %e, "Leader watcher stopped with error"),
                Err(e) => warn!(error = %e, "Leader watcher task failed"),
            }
        }
    }
}

fn watcher_error(joined: std::result::Result<Result<()>, JoinError>) -> ElectionError {
    match joined {
        Ok(Err(e)) => e,
        Ok(Ok(())) => ElectionError::WatcherAborted("watch task exited".into()),
        Err(e) => ElectionError::WatcherAborted(e.to_string()),
    }
}
