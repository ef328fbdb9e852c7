//! Typed identifiers for files and node versions.
//!
//! `FileId` is a random 64-bit value: unique within a store, stable for the
//! lifetime of the file no matter how often it is renamed or linked. Its bytes
//! (most significant first) are the shard keys of the identity index, so ids
//! must be spread evenly; a counter would pile every file into shard 0.
//!
//! `Stamp` comes from a process-wide counter and is handed to every new
//! version of a node. It is a diagnostic marker; structural identity is
//! decided by pointer equality.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Number of bytes in a [`FileId`], and so the maximum shard depth.
pub const FILE_ID_BYTES: usize = 8;

/// Identifier of a file's content and metadata.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(u64);

impl FileId {
    /// Create a new random identifier.
    ///
    /// Uniqueness within a store is checked by the caller against its index.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Wrap a raw value. Mostly useful for tests and diagnostics.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64-bit value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Byte `index` of the identifier, most significant first.
    ///
    /// `index` must be below [`FILE_ID_BYTES`].
    pub const fn shard_byte(&self, index: usize) -> u8 {
        self.0.to_be_bytes()[index]
    }

    /// First 4 hex characters, for display only.
    pub fn short(&self) -> String {
        format!("{:016x}", self.0)[..4].to_string()
    }
}

impl From<u64> for FileId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<FileId> for u64 {
    fn from(id: FileId) -> u64 {
        id.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({:016x})", self.0)
    }
}

static NEXT_STAMP: AtomicU64 = AtomicU64::new(1);

/// Version marker handed to every freshly built node.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stamp(u64);

impl Stamp {
    /// Take the next stamp from the process-wide counter.
    pub fn next() -> Self {
        Self(NEXT_STAMP.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw counter value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Debug for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stamp({})", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
