//! Lease-based leader election.
//!
//! Each process is one candidate. A candidate wins by creating the
//! leadership key with a version-0 conditional write bound to a fresh lease,
//! keeps it by renewing the lease, and loses it when the lease expires or is
//! revoked. Followers watch the key and contest every vacancy.
//!
//! ```no_run
//! use std::sync::Arc;
//! use pkg_election::{Coordinator, ElectionContext, ElectionSettings, step_down_channel};
//! use pkg_state::StateStore;
//! use pkg_types::Candidate;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let store = StateStore::default();
//! let _reaper = store.spawn_lease_reaper();
//! let settings = ElectionSettings::new(Candidate::new("node-a")?);
//! let ctx = ElectionContext::new(Arc::new(store), settings)?;
//! let (handle, step_down) = step_down_channel();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     handle.trigger();
//! });
//! let exit = Coordinator::new(ctx, step_down).run().await?;
//! println!("{:?}", exit);
//! # Ok(())
//! # }
//! ```

pub mod candidacy;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod renewer;
pub mod signal;
pub mod watcher;

pub use candidacy::{CandidacyEngine, CandidacyOutcome, LeaderLease};
pub use context::{ElectionContext, ElectionSettings};
pub use coordinator::{Coordinator, CoordinatorExit};
pub use error::{ElectionError, Result};
pub use renewer::{LeadershipLossReason, LeaseRenewer};
pub use signal::{StepDown, StepDownHandle, step_down_channel};
pub use watcher::{ElectedTerm, LeaderWatcher};
