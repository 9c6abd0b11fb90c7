//! Filesystem path constants.

/// Default config file path for a candidate.
pub const DEFAULT_CANDIDATE_CONFIG: &str = "/etc/leaderd/candidate.yaml";

/// Default config file path for the store server.
pub const DEFAULT_STORE_CONFIG: &str = "/etc/leaderd/store.yaml";
