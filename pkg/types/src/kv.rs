use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a lease granted by the coordination store.
pub type LeaseId = u64;

/// A key as stored by the coordination store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    /// Revision at which the key was created
    pub create_revision: u64,
    /// Revision of the last write to the key
    pub mod_revision: u64,
    /// Number of writes since creation. Absent keys have version 0.
    pub version: u64,
    /// Lease the key is bound to, if any
    #[serde(default)]
    pub lease: Option<LeaseId>,
}

/// Result of a point-in-time read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetResponse {
    /// Store revision the read observed
    pub revision: u64,
    #[serde(default)]
    pub kv: Option<KeyValue>,
}

/// A freshly granted lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseGrant {
    pub id: LeaseId,
    pub ttl_seconds: u64,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseGrantRequest {
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveResponse {
    pub id: LeaseId,
    pub ttl_seconds: u64,
}

/// Conditional write: put `value` under `key` iff its version equals `expected_version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxnPutRequest {
    pub key: String,
    pub expected_version: u64,
    pub value: Vec<u8>,
    #[serde(default)]
    pub lease: Option<LeaseId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnResponse {
    /// Whether the compare held and the write happened
    pub succeeded: bool,
    /// Store revision after the transaction
    pub revision: u64,
}

/// What happened to a watched key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeEvent {
    /// Key created or overwritten
    Put { value: Vec<u8> },
    /// Key removed: lease expired, lease revoked, or explicit delete
    Delete,
}

/// A single watch notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub revision: u64,
    pub key: String,
    pub change: ChangeEvent,
}

impl WatchEvent {
    pub fn is_delete(&self) -> bool {
        matches!(self.change, ChangeEvent::Delete)
    }
}

/// Machine-readable error kinds returned by the store HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    LeaseNotFound,
    Compacted,
    Closed,
    BadRequest,
    Internal,
}

/// JSON error body returned by the store HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    /// Lease named by `ErrorCode::LeaseNotFound`
    #[serde(default)]
    pub lease: Option<LeaseId>,
    /// Requested watch revision, for `ErrorCode::Compacted`
    #[serde(default)]
    pub requested: Option<u64>,
    /// Highest revision no longer retained, for `ErrorCode::Compacted`
    #[serde(default)]
    pub compacted: Option<u64>,
}
