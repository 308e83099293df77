//! Domain primitives: TimeMs, Address, DestinationTag.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use thiserror::Error;

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    pub fn as_ms(&self) -> i64 {
        self.0
    }

    /// RFC 3339 rendering used by API responses.
    pub fn to_rfc3339(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressParseError {
    #[error("address must start with 'r'")]
    BadPrefix,
    #[error("address length {0} outside 25..=35")]
    BadLength(usize),
    #[error("address contains non-alphanumeric characters")]
    BadCharacter,
}

/// Classic ledger account address (base58, `r...`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    /// Wrap a string without validation (values coming back from the ledger or the store).
    pub fn new(addr: String) -> Self {
        Address(addr)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    /// Validate user-supplied addresses: `r` prefix, 25 to 35 alphanumeric characters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !s.starts_with('r') {
            return Err(AddressParseError::BadPrefix);
        }
        if !(25..=35).contains(&s.len()) {
            return Err(AddressParseError::BadLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AddressParseError::BadCharacter);
        }
        Ok(Address(s.to_string()))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric correlation tag carried by an incoming payment (ledger `DestinationTag`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationTag(pub u32);

impl DestinationTag {
    pub fn new(tag: u32) -> Self {
        DestinationTag(tag)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// Derive a tag for a purchase attempt.
    ///
    /// The first four bytes of `sha256(purchase_id || attempt)`. Purchase ids are
    /// random UUIDs, so tags are spread over the whole 32-bit space; `attempt` lets
    /// the caller draw a different tag when the store reports a collision.
    pub fn derive(purchase_id: &str, attempt: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(purchase_id.as_bytes());
        hasher.update(attempt.to_le_bytes());
        let hash = hasher.finalize();
        DestinationTag(u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]))
    }
}

impl std::fmt::Display for DestinationTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
