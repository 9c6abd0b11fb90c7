use pkg_election::{
    CandidacyEngine, CandidacyOutcome, Coordinator, CoordinatorExit, ElectionContext,
    ElectionError, ElectionSettings, LeadershipLossReason, LeaseRenewer, StepDown,
    step_down_channel,
};
use async_trait::async_trait;
use pkg_state::{CoordinationStore, StateStore, StoreError, WatchStream};
use pkg_types::Candidate;
use pkg_types::kv::{GetResponse, KeepAliveResponse, LeaseGrant, LeaseId, TxnResponse};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};

fn settings(id: &str) -> ElectionSettings {
    ElectionSettings::new(Candidate::new(id).unwrap())
}

fn context(store: &StateStore, settings: ElectionSettings) -> ElectionContext {
    ElectionContext::new(Arc::new(store.clone()), settings).unwrap()
}

fn engine(store: &StateStore, id: &str) -> CandidacyEngine {
    CandidacyEngine::new(context(store, settings(id)))
}

fn store_with_reaper() -> StateStore {
    let store = StateStore::default();
    store.spawn_lease_reaper();
    store
}

async fn leader_value(store: &StateStore) -> Option<Vec<u8>> {
    store.get("leader").await.unwrap().kv.map(|kv| kv.value)
}

#[tokio::test(start_paused = true)]
async fn test_first_candidate_on_empty_store_is_elected() {
    let store = store_with_reaper();

    let outcome = engine(&store, "A").attempt().await.unwrap();
    let lease = outcome.into_lease().expect("A should be elected");
    assert_eq!(lease.candidate().as_str(), "A");

    let kv = store.get("leader").await.unwrap().kv.unwrap();
    assert_eq!(kv.value, b"A");
    assert_eq!(kv.version, 1);
    assert_eq!(kv.lease, Some(lease.id()));
}

#[tokio::test(start_paused = true)]
async fn test_second_candidate_is_defeated_without_leaking_its_lease() {
    let store = store_with_reaper();
    assert!(engine(&store, "A").attempt().await.unwrap().acquired());

    match engine(&store, "B").attempt().await.unwrap() {
        CandidacyOutcome::Defeated { leader } => {
            assert_eq!(leader.unwrap().as_str(), "A");
        }
        CandidacyOutcome::Elected(_) => panic!("B must not be elected while A leads"),
    }

    assert_eq!(leader_value(&store).await.unwrap(), b"A");
    assert_eq!(store.stats().await.leases, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_attempts_elect_exactly_one() {
    let store = store_with_reaper();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine(&store, &format!("node-{}", i));
            tokio::spawn(async move { engine.attempt().await })
        })
        .collect();

    let mut elected = Vec::new();
    for handle in handles {
        if let CandidacyOutcome::Elected(lease) = handle.await.unwrap().unwrap() {
            elected.push(lease);
        }
    }

    assert_eq!(elected.len(), 1);
    let stats = store.stats().await;
    assert_eq!(stats.leases, 1);
    assert_eq!(stats.keys, 1);
    assert_eq!(
        leader_value(&store).await.unwrap(),
        elected[0].candidate().as_bytes()
    );
}

#[tokio::test(start_paused = true)]
async fn test_same_identity_twice_elects_once() {
    let store = store_with_reaper();
    assert!(engine(&store, "A").attempt().await.unwrap().acquired());
    assert!(!engine(&store, "A").attempt().await.unwrap().acquired());
    assert_eq!(store.stats().await.leases, 1);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_leader_value_is_a_defeat() {
    let store = store_with_reaper();
    store
        .put_if_version("leader", 0, &[0xff, 0xfe], None)
        .await
        .unwrap();

    let engine = engine(&store, "A");
    match engine.attempt().await.unwrap() {
        CandidacyOutcome::Defeated { leader } => assert!(leader.is_none()),
        CandidacyOutcome::Elected(_) => panic!("key is taken"),
    }
    assert_eq!(store.stats().await.leases, 0);
    assert!(matches!(
        engine.current_leader().await,
        Err(ElectionError::MalformedValue(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_renewing_leader_keeps_its_key() {
    let store = store_with_reaper();
    let ctx = context(&store, settings("A"));
    let lease = CandidacyEngine::new(ctx.clone())
        .attempt()
        .await
        .unwrap()
        .into_lease()
        .unwrap();
    let lease_id = lease.id();

    let (handle, mut step_down) = step_down_channel();
    let renewer = tokio::spawn(async move { LeaseRenewer::new(ctx).run(lease, &mut step_down).await });

    sleep(Duration::from_secs(30)).await;
    let kv = store.get("leader").await.unwrap().kv.unwrap();
    assert_eq!(kv.value, b"A");
    assert_eq!(kv.version, 1);
    assert_eq!(kv.lease, Some(lease_id));

    handle.trigger();
    assert_eq!(renewer.await.unwrap(), LeadershipLossReason::VoluntaryStepDown);
    assert!(leader_value(&store).await.is_none());
    assert_eq!(store.stats().await.leases, 0);
}

#[tokio::test(start_paused = true)]
async fn test_external_revoke_ends_term_with_lease_lost() {
    let store = store_with_reaper();
    let ctx = context(&store, settings("A"));
    let lease = CandidacyEngine::new(ctx.clone())
        .attempt()
        .await
        .unwrap()
        .into_lease()
        .unwrap();
    let lease_id = lease.id();

    let renewer = tokio::spawn(async move {
        let mut step_down = StepDown::never();
        LeaseRenewer::new(ctx).run(lease, &mut step_down).await
    });

    sleep(Duration::from_secs(3)).await;
    store.revoke_lease(lease_id).await.unwrap();

    let started = Instant::now();
    let reason = renewer.await.unwrap();
    assert!(matches!(reason, LeadershipLossReason::LeaseLost { .. }));
    assert!(started.elapsed() <= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_step_down_before_first_renewal_revokes_immediately() {
    let store = store_with_reaper();
    let ctx = context(&store, settings("A"));
    let lease = CandidacyEngine::new(ctx.clone())
        .attempt()
        .await
        .unwrap()
        .into_lease()
        .unwrap();

    let (handle, mut step_down) = step_down_channel();
    handle.trigger();
    let reason = LeaseRenewer::new(ctx).run(lease, &mut step_down).await;
    assert_eq!(reason, LeadershipLossReason::VoluntaryStepDown);
    assert!(leader_value(&store).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_follower_takes_over_after_leader_stops_renewing() {
    let store = store_with_reaper();
    // A wins and then goes silent.
    assert!(engine(&store, "A").attempt().await.unwrap().acquired());

    let (handle_b, step_down_b) = step_down_channel();
    let b = tokio::spawn(Coordinator::new(context(&store, settings("B")), step_down_b).run());

    sleep(Duration::from_secs(5)).await;
    assert_eq!(leader_value(&store).await.unwrap(), b"A");

    sleep(Duration::from_secs(7)).await;
    let kv = store.get("leader").await.unwrap().kv.unwrap();
    assert_eq!(kv.value, b"B");

    // B keeps it while renewing.
    sleep(Duration::from_secs(20)).await;
    assert_eq!(leader_value(&store).await.unwrap(), b"B");

    handle_b.trigger();
    assert_eq!(
        b.await.unwrap().unwrap(),
        CoordinatorExit::TermEnded(LeadershipLossReason::VoluntaryStepDown)
    );
    assert!(leader_value(&store).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_step_down_hands_over_before_ttl() {
    let store = store_with_reaper();

    let (handle_a, step_down_a) = step_down_channel();
    let a = tokio::spawn(Coordinator::new(context(&store, settings("A")), step_down_a).run());
    sleep(Duration::from_secs(1)).await;
    assert_eq!(leader_value(&store).await.unwrap(), b"A");

    let (handle_b, step_down_b) = step_down_channel();
    let b = tokio::spawn(Coordinator::new(context(&store, settings("B")), step_down_b).run());
    sleep(Duration::from_secs(1)).await;

    let stepped_down_at = Instant::now();
    handle_a.trigger();
    assert_eq!(
        a.await.unwrap().unwrap(),
        CoordinatorExit::TermEnded(LeadershipLossReason::VoluntaryStepDown)
    );

    sleep(Duration::from_secs(1)).await;
    assert_eq!(leader_value(&store).await.unwrap(), b"B");
    assert!(stepped_down_at.elapsed() < Duration::from_secs(10));

    handle_b.trigger();
    assert!(b.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_follower_withdraws_on_step_down() {
    let store = store_with_reaper();
    assert!(engine(&store, "A").attempt().await.unwrap().acquired());

    let (handle, step_down) = step_down_channel();
    let b = tokio::spawn(Coordinator::new(context(&store, settings("B")), step_down).run());
    sleep(Duration::from_secs(1)).await;

    handle.trigger();
    assert_eq!(b.await.unwrap().unwrap(), CoordinatorExit::Withdrawn);
    // Only A's lease remains.
    assert_eq!(store.stats().await.leases, 1);
}

#[tokio::test(start_paused = true)]
async fn test_lease_lost_ends_coordinator_and_leaves_nothing_behind() {
    let store = store_with_reaper();
    let (_handle, step_down) = step_down_channel();
    let a = tokio::spawn(Coordinator::new(context(&store, settings("A")), step_down).run());
    sleep(Duration::from_secs(1)).await;

    let lease = store.get("leader").await.unwrap().kv.unwrap().lease.unwrap();
    store.revoke_lease(lease).await.unwrap();

    match a.await.unwrap().unwrap() {
        CoordinatorExit::TermEnded(LeadershipLossReason::LeaseLost { .. }) => {}
        other => panic!("unexpected exit: {:?}", other),
    }
    assert!(leader_value(&store).await.is_none());
    assert_eq!(store.stats().await.leases, 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_after_loss_keeps_competing() {
    let store = store_with_reaper();
    let (handle, step_down) = step_down_channel();
    let a = tokio::spawn(
        Coordinator::new(
            context(&store, settings("A").with_rejoin_after_loss(true)),
            step_down,
        )
        .run(),
    );
    sleep(Duration::from_secs(1)).await;

    let first_lease = store.get("leader").await.unwrap().kv.unwrap().lease.unwrap();
    store.revoke_lease(first_lease).await.unwrap();

    sleep(Duration::from_secs(5)).await;
    let kv = store.get("leader").await.unwrap().kv.unwrap();
    assert_eq!(kv.value, b"A");
    assert_ne!(kv.lease, Some(first_lease));
    assert!(!a.is_finished());

    handle.trigger();
    assert_eq!(
        a.await.unwrap().unwrap(),
        CoordinatorExit::TermEnded(LeadershipLossReason::VoluntaryStepDown)
    );
}

#[tokio::test(start_paused = true)]
async fn test_closed_store_aborts_coordinator() {
    let store = StateStore::default();
    store.close().await;

    let result = Coordinator::new(context(&store, settings("A")), StepDown::never())
        .run()
        .await;
    assert!(matches!(result, Err(ElectionError::Store(StoreError::Closed))));
}

#[tokio::test(start_paused = true)]
async fn test_store_closed_while_following_aborts_coordinator() {
    let store = store_with_reaper();
    assert!(engine(&store, "A").attempt().await.unwrap().acquired());

    let b = tokio::spawn(Coordinator::new(context(&store, settings("B")), StepDown::never()).run());
    sleep(Duration::from_secs(1)).await;
    store.close().await;

    let result = b.await.unwrap();
    assert!(matches!(result, Err(ElectionError::Store(StoreError::Closed))));
}

/// Revokes `victim` right after the first failed conditional put, so the
/// loser's confirming read finds the key already vacant.
struct ExpiresDuringConfirm {
    inner: StateStore,
    victim: LeaseId,
    armed: AtomicBool,
}

#[async_trait]
impl CoordinationStore for ExpiresDuringConfirm {
    async fn grant_lease(&self, ttl: Duration) -> pkg_state::Result<LeaseGrant> {
        self.inner.grant_lease(ttl).await
    }

    async fn put_if_version(
        &self,
        key: &str,
        expected_version: u64,
        value: &[u8],
        lease: Option<LeaseId>,
    ) -> pkg_state::Result<TxnResponse> {
        let resp = self
            .inner
            .put_if_version(key, expected_version, value, lease)
            .await?;
        if !resp.succeeded && self.armed.swap(false, Ordering::SeqCst) {
            self.inner.revoke_lease(self.victim).await?;
        }
        Ok(resp)
    }

    async fn get(&self, key: &str) -> pkg_state::Result<GetResponse> {
        self.inner.get(key).await
    }

    async fn keep_alive(&self, lease: LeaseId) -> pkg_state::Result<KeepAliveResponse> {
        self.inner.keep_alive(lease).await
    }

    async fn revoke_lease(&self, lease: LeaseId) -> pkg_state::Result<()> {
        self.inner.revoke_lease(lease).await
    }

    async fn watch(&self, key: &str, from_revision: Option<u64>) -> pkg_state::Result<WatchStream> {
        self.inner.watch(key, from_revision).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_leader_expiring_during_first_attempt_is_contested() {
    let store = store_with_reaper();
    let a = engine(&store, "A").attempt().await.unwrap().into_lease().unwrap();

    let racing = Arc::new(ExpiresDuringConfirm {
        inner: store.clone(),
        victim: a.id(),
        armed: AtomicBool::new(true),
    });
    let ctx = ElectionContext::new(racing.clone(), settings("B")).unwrap();
    let (handle, step_down) = step_down_channel();
    let b = tokio::spawn(Coordinator::new(ctx, step_down).run());

    sleep(Duration::from_secs(1)).await;
    assert!(!racing.armed.load(Ordering::SeqCst));
    assert_eq!(leader_value(&store).await.unwrap(), b"B");

    handle.trigger();
    assert_eq!(
        b.await.unwrap().unwrap(),
        CoordinatorExit::TermEnded(LeadershipLossReason::VoluntaryStepDown)
    );
    assert!(leader_value(&store).await.is_none());
    assert_eq!(store.stats().await.leases, 0);
}
