use std::sync::Arc;
use tokio::sync::watch;

/// Create a connected step-down trigger and signal.
pub fn step_down_channel() -> (StepDownHandle, StepDown) {
    let (tx, rx) = watch::channel(false);
    (StepDownHandle { tx: Arc::new(tx) }, StepDown { rx })
}

/// Fires the step-down signal. Typically owned by an OS-signal handler or
/// an operator command.
#[derive(Clone)]
pub struct StepDownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StepDownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Cooperative cancellation observed by the renewal loop: once triggered,
/// the leader revokes its lease and relinquishes leadership.
#[derive(Clone)]
pub struct StepDown {
    rx: watch::Receiver<bool>,
}

impl StepDown {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal fires. Pends forever if every handle is
    /// dropped without triggering.
    pub async fn triggered(&mut self) {
        let closed = self.rx.wait_for(|fired| *fired).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}
