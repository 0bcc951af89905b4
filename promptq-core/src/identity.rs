// ABOUTME: Worker identity derived from the backend credential.
// ABOUTME: A truncated SHA-256 fingerprint that names the worker's private queue.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex characters kept from the digest. 40 bits: the birthday bound reaches ~1%
/// collision probability only around 150k concurrently deployed workers.
pub const WORKER_ID_LEN: usize = 10;

/// Stable short fingerprint of a worker's credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// One-way fingerprint of `credential`; the same credential always yields the same id
    pub fn derive(credential: &str) -> Self {
        let digest = Sha256::digest(credential.as_bytes());
        let mut id = hex::encode(digest);
        id.truncate(WORKER_ID_LEN);
        Self(id)
    }

    /// Wrap an id received from the wire or decoded from a marker
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `queue.<id>` names a worker's private queue.
    ///
    /// Ids are short ASCII alphanumerics; anything else (dots, separators, reserved queue
    /// names) could point a question at a queue no worker polls.
    pub fn is_routable(&self) -> bool {
        let id = self.0.as_str();
        !id.is_empty()
            && id.len() <= WORKER_ID_LEN
            && id.bytes().all(|b| b.is_ascii_alphanumeric())
            && !RESERVED_QUEUE_NAMES.contains(&id)
    }
}

// Second segments of non-worker queue names
const RESERVED_QUEUE_NAMES: &[&str] = &["common", "answers"];

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
