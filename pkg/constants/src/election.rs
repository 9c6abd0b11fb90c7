//! Leader election constants.

/// Well-known key whose presence and value designate the current leader.
pub const LEADER_KEY: &str = "leader";

/// How long a leadership lease is valid, in seconds.
pub const LEADER_LEASE_TTL_SECS: u64 = 10;

/// Interval between lease renewals, in seconds.
/// Must stay strictly below `LEADER_LEASE_TTL_SECS`.
pub const LEADER_RENEW_INTERVAL_SECS: u64 = 2;

/// Upper bound for a single store call (grant, txn, get, keep-alive, revoke).
pub const STORE_CALL_TIMEOUT_MS: u64 = 5_000;

/// First delay before retrying a candidacy that failed on an unreachable store.
pub const CANDIDACY_BACKOFF_INITIAL_MS: u64 = 200;

/// Cap for the exponential candidacy backoff.
pub const CANDIDACY_BACKOFF_MAX_MS: u64 = 2_000;

/// Delay before re-subscribing after a watch stream ended or failed.
pub const WATCH_RESUBSCRIBE_BACKOFF_MS: u64 = 500;
