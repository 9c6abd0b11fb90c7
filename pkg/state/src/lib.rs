//! Coordination store clients for leaderd.
//!
//! `CoordinationStore` is the small set of atomic primitives leader election
//! relies on: leases, a version-conditional put, point reads, and a
//! revision-resumable watch. `StateStore` implements it in process;
//! `RemoteStore` talks to a `leaderd-store` server over HTTP.

pub mod client;
pub mod error;
pub mod remote;
pub mod store;
pub mod watch;

pub use client::{CoordinationStore, WatchStream};
pub use error::{Result, StoreError};
pub use remote::RemoteStore;
pub use store::{StateStore, StoreStats};
