//! Data types shared by the leaderd store, its clients, and the election core.

pub mod candidate;
pub mod config;
pub mod kv;

pub use candidate::{Candidate, MalformedValue};
