//! Coordination store constants.

/// Number of watch events retained for resumable subscriptions.
pub const WATCH_HISTORY_CAPACITY: usize = 1024;

/// Capacity of the live broadcast channel feeding watch subscribers.
pub const WATCH_BROADCAST_CAPACITY: usize = 1024;

/// How often the store sweeps for expired leases, in milliseconds.
pub const LEASE_REAPER_INTERVAL_MS: u64 = 100;

/// Longest lease TTL the store grants, in seconds (one year).
pub const LEASE_TTL_MAX_SECS: u64 = 365 * 24 * 60 * 60;
