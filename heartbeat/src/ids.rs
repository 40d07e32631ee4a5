//! Shared id counters for the server process.
//!
//! Response ids are drawn by every session (for both responses and
//! keepalives) and client ids once per accepted connection.  Both sequences
//! start at 1 and are gap-free: `fetch_add` hands every caller a distinct
//! value even when sessions run on different worker threads.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide monotonic counters, owned by [`crate::server::ServerContext`].
#[derive(Debug, Default)]
pub struct IdAllocator {
    last_response_id: AtomicU64,
    last_client_id: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next server-wide response id (1, 2, 3, ...).
    pub fn next_response_id(&self) -> u64 {
        self.last_response_id.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Next client id, assigned once per accepted connection.
    pub fn next_client_id(&self) -> u64 {
        self.last_client_id.fetch_add(1, Ordering::AcqRel) + 1
    }
}
