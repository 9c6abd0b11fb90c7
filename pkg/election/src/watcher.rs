use pkg_state::StoreError;
use pkg_types::Candidate;
use pkg_types::kv::ChangeEvent;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::candidacy::{CandidacyEngine, CandidacyOutcome, LeaderLease};
use crate::context::ElectionContext;
use crate::error::Result;
use crate::signal::StepDown;

/// A lease won by the watcher, handed to the coordinator for renewal.
/// The watcher resumes once `done` is answered or dropped.
pub struct ElectedTerm {
    pub lease: LeaderLease,
    pub done: oneshot::Sender<()>,
}

/// Where the next subscription starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume {
    /// Read the key, contest it if absent, then start after the observed
    /// revision. Used at startup and after history was lost.
    Snapshot,
    /// Continue at this revision (inclusive).
    From(u64),
}

/// Whether the watch loop keeps going after handling a vacancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Long-lived task that watches the leadership key and runs a candidacy
/// whenever it is deleted.
pub struct LeaderWatcher {
    ctx: ElectionContext,
    engine: CandidacyEngine,
    elected_tx: mpsc::Sender<ElectedTerm>,
    shutdown: watch::Receiver<bool>,
    step_down: StepDown,
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender also means shut down.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

impl LeaderWatcher {
    pub fn new(
        ctx: ElectionContext,
        elected_tx: mpsc::Sender<ElectedTerm>,
        shutdown: watch::Receiver<bool>,
        step_down: StepDown,
    ) -> Self {
        Self {
            engine: CandidacyEngine::new(ctx.clone()),
            ctx,
            elected_tx,
            shutdown,
            step_down,
        }
    }

    /// Watch until shutdown. Only a closed store ends the loop with an error.
    pub async fn run(mut self) -> Result<()> {
        let key = self.ctx.leader_key().to_string();
        let resubscribe_backoff = self.ctx.settings().resubscribe_backoff;
        let mut resume = Resume::Snapshot;

        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }

            let from = match resume {
                Resume::From(revision) => revision,
                Resume::Snapshot => match self.snapshot().await {
                    Ok((_, Flow::Stop)) => return Ok(()),
                    Ok((revision, Flow::Continue)) => revision + 1,
                    Err(e) if e.is_recoverable() => {
                        warn!(error = %e, "Failed to read leadership key; retrying");
                        if self.pause(resubscribe_backoff).await {
                            return Ok(());
                        }
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            };
            resume = Resume::From(from);

            let mut stream = match self.ctx.store().watch(&key, Some(from)).await {
                Ok(stream) => stream,
                Err(StoreError::Compacted {
                    requested,
                    compacted,
                }) => {
                    warn!(requested, compacted, "Watch history compacted; resynchronizing");
                    resume = Resume::Snapshot;
                    continue;
                }
                Err(StoreError::Closed) => return Err(StoreError::Closed.into()),
                Err(e) => {
                    warn!(error = %e, "Failed to subscribe to leadership key");
                    if self.pause(resubscribe_backoff).await {
                        return Ok(());
                    }
                    continue;
                }
            };
            debug!(key = %key, from, "Watching leadership key");

            loop {
                let next = tokio::select! {
                    item = stream.next() => item,
                    _ = shutdown_requested(&mut self.shutdown) => return Ok(()),
                };

                let event = match next {
                    Some(Ok(event)) => event,
                    Some(Err(StoreError::Closed)) => return Err(StoreError::Closed.into()),
                    Some(Err(e)) => {
                        warn!(error = %e, "Watch stream failed");
                        break;
                    }
                    None => {
                        debug!("Watch stream ended");
                        break;
                    }
                };

                resume = Resume::From(event.revision + 1);
                match event.change {
                    ChangeEvent::Put { value } => match Candidate::from_value(&value) {
                        Ok(leader) => debug!(leader = %leader, revision = event.revision, "Leader announced"),
                        Err(e) => warn!(revision = event.revision, error = %e, "Ignoring malformed leader value"),
                    },
                    ChangeEvent::Delete => {
                        info!(revision = event.revision, "Leader is gone");
                        if self.on_vacancy().await? == Flow::Stop {
                            return Ok(());
                        }
                    }
                }

                if *self.shutdown.borrow() {
                    return Ok(());
                }
            }

            if let Resume::From(revision) = resume {
                debug!("Re-subscribing from revision {}", revision);
            }
            if self.pause(resubscribe_backoff).await {
                return Ok(());
            }
        }
    }

    /// Read the key; returns the store revision observed.
    /// An absent key is a vacancy: its Delete may predate the subscription.
    async fn snapshot(&mut self) -> Result<(u64, Flow)> {
        let resp = self
            .ctx
            .bounded(self.ctx.store().get(self.ctx.leader_key()))
            .await?;
        let mut flow = Flow::Continue;
        match &resp.kv {
            Some(kv) => match Candidate::from_value(&kv.value) {
                Ok(leader) => info!(leader = %leader, "Current leader"),
                Err(e) => warn!(error = %e, "Leadership key holds a malformed value"),
            },
            None => {
                info!("No leader");
                flow = self.on_vacancy().await?;
            }
        }
        Ok((resp.revision, flow))
    }

    async fn on_vacancy(&mut self) -> Result<Flow> {
        let candidate = self.ctx.candidate().clone();
        if self.step_down.is_triggered() {
            debug!(candidate = %candidate, "Stepping down; not contesting vacancy");
            return Ok(Flow::Continue);
        }
        info!(candidate = %candidate, "Attempting candidacy");

        let mut shutdown = self.shutdown.clone();
        let outcome = self
            .engine
            .attempt_with_backoff(async move { shutdown_requested(&mut shutdown).await })
            .await?;

        match outcome {
            Some(CandidacyOutcome::Elected(lease)) => return Ok(self.hand_off(lease).await),
            Some(CandidacyOutcome::Defeated { leader: Some(leader) }) => {
                info!(candidate = %candidate, leader = %leader, "Candidacy lost; another candidate is leader")
            }
            Some(CandidacyOutcome::Defeated { leader: None }) => {
                info!(candidate = %candidate, "Candidacy lost; leader unknown")
            }
            None => {
                debug!("Shutdown during candidacy backoff");
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    /// Give a won lease to the coordinator and wait for its term to end.
    /// Stops the watcher when the coordinator is gone.
    async fn hand_off(&mut self, lease: LeaderLease) -> Flow {
        let (done, term_over) = oneshot::channel();
        match self.elected_tx.send(ElectedTerm { lease, done }).await {
            Ok(()) => {
                let _ = term_over.await;
                debug!("Leadership term ended; resuming watch");
                Flow::Continue
            }
            Err(mpsc::error::SendError(term)) => {
                warn!(
                    lease = term.lease.id(),
                    "Coordinator is shutting down; releasing lease won by watcher"
                );
                self.engine.release(term.lease.id()).await;
                Flow::Stop
            }
        }
    }

    /// Sleep for `delay`; returns true if shutdown was requested meanwhile.
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => *self.shutdown.borrow(),
            _ = shutdown_requested(&mut self.shutdown) => true,
        }
    }
}
