pub mod kv;
pub mod lease;
pub mod metrics;
pub mod watch;
