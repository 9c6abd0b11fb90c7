//! Error types for the election core

use pkg_state::StoreError;
use pkg_types::MalformedValue;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ElectionError {
    /// Store call failed. `StoreError::Unavailable` (including call
    /// timeouts) is the recoverable StoreUnavailable case.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The leadership key holds something that is not a candidate identity.
    #[error("leadership key holds a malformed value: {0}")]
    MalformedValue(#[from] MalformedValue),

    #[error("invalid election settings: {0}")]
    Config(String),

    #[error("watch task stopped unexpectedly: {0}")]
    WatcherAborted(String),
}

impl ElectionError {
    /// Whether the operation may be retried.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ElectionError::Store(e) => e.is_recoverable(),
            ElectionError::MalformedValue(_) => true,
            ElectionError::Config(_) | ElectionError::WatcherAborted(_) => false,
        }
    }

    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, ElectionError::Store(StoreError::Unavailable(_)))
    }
}

pub type Result<T> = std::result::Result<T, ElectionError>;
