//! Centralized constants for leaderd.
//!
//! Defaults for election timing, the coordination store, and the binaries
//! live here so every crate agrees on them.

pub mod election;
pub mod network;
pub mod paths;
pub mod state;
