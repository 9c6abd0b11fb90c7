//! Error types for coordination store clients

use pkg_types::kv::{ErrorBody, ErrorCode, LeaseId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Network failure, timeout, or a transient server-side fault.
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    #[error("lease {0} not found")]
    LeaseNotFound(LeaseId),

    /// The requested watch start revision is no longer retained.
    #[error("revision {requested} has been compacted (history starts after {compacted})")]
    Compacted { requested: u64, compacted: u64 },

    /// The client or store has been shut down for good.
    #[error("coordination store client is closed")]
    Closed,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unexpected store response: {0}")]
    Protocol(String),
}

impl StoreError {
    /// Whether retrying the same call later can succeed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, StoreError::Closed | StoreError::InvalidArgument(_))
    }

    /// Wire representation used by the store HTTP API.
    pub fn to_body(&self) -> ErrorBody {
        let mut body = ErrorBody {
            code: ErrorCode::Internal,
            message: self.to_string(),
            lease: None,
            requested: None,
            compacted: None,
        };
        match self {
            StoreError::LeaseNotFound(id) => {
                body.code = ErrorCode::LeaseNotFound;
                body.lease = Some(*id);
            }
            StoreError::Compacted {
                requested,
                compacted,
            } => {
                body.code = ErrorCode::Compacted;
                body.requested = Some(*requested);
                body.compacted = Some(*compacted);
            }
            StoreError::Closed => body.code = ErrorCode::Closed,
            StoreError::InvalidArgument(_) => body.code = ErrorCode::BadRequest,
            StoreError::Unavailable(_) | StoreError::Protocol(_) => {}
        }
        body
    }

    /// Rebuild an error from the wire representation.
    pub fn from_body(body: ErrorBody) -> Self {
        match body.code {
            ErrorCode::LeaseNotFound => StoreError::LeaseNotFound(body.lease.unwrap_or_default()),
            ErrorCode::Compacted => StoreError::Compacted {
                requested: body.requested.unwrap_or_default(),
                compacted: body.compacted.unwrap_or_default(),
            },
            ErrorCode::Closed => StoreError::Closed,
            ErrorCode::BadRequest => StoreError::InvalidArgument(body.message),
            ErrorCode::Internal => StoreError::Unavailable(body.message),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
