use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A stored value that cannot be read as a candidate identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedValue {
    #[error("value is empty")]
    Empty,
    #[error("value is not valid UTF-8")]
    NotUtf8,
    #[error("value contains control characters: {0:?}")]
    ControlCharacters(String),
}

/// Identity of a process competing for leadership.
///
/// Supplied once at startup and never mutated. The same type is used to
/// interpret the value stored under the leadership key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Candidate(String);

impl Candidate {
    pub fn new(id: impl Into<String>) -> Result<Self, MalformedValue> {
        let id = id.into();
        if id.is_empty() {
            return Err(MalformedValue::Empty);
        }
        if id.chars().any(char::is_control) {
            return Err(MalformedValue::ControlCharacters(id));
        }
        Ok(Self(id))
    }

    /// Interpret raw bytes read from the store as a candidate identity.
    pub fn from_value(value: &[u8]) -> Result<Self, MalformedValue> {
        let id = std::str::from_utf8(value).map_err(|_| MalformedValue::NotUtf8)?;
        Self::new(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Whether a stored value names this candidate.
    pub fn matches(&self, value: &[u8]) -> bool {
        self.0.as_bytes() == value
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Candidate {
    type Error = MalformedValue;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Candidate> for String {
    fn from(candidate: Candidate) -> Self {
        candidate.0
    }
}
