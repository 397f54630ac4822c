//! Session identifier type shared across the workspace
//!
//! Sessions are addressed by a small opaque id that is unique for the
//! lifetime of the process. Ids are never reused, even after a session is
//! destroyed, so stale handles fail with a lookup error instead of silently
//! touching a newer session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Opaque per-process session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u32);

impl SessionId {
    /// Construct from a raw value (test and serialization support).
    pub fn from_raw(raw: u32) -> Self {
        SessionId(raw)
    }

    /// Raw numeric value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Monotonic allocator for session ids.
///
/// The first id handed out is 1; 0 is reserved as a never-valid sentinel.
#[derive(Debug)]
pub struct SessionIdAllocator {
    next: AtomicU32,
}

impl SessionIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Allocate the next id. Relaxed ordering is enough: uniqueness comes
    /// from the atomic increment itself.
    pub fn allocate(&self) -> SessionId {
        SessionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
