//! Network-related constants.

/// Default port of the coordination store server.
pub const DEFAULT_STORE_PORT: u16 = 2379;

/// Default store endpoint used by candidates.
pub const DEFAULT_STORE_ADDR: &str = "http://127.0.0.1:2379";
