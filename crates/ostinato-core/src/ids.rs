//! Object id allocation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Allocator for stable object ids (tracks, faders, plugins, regions).
///
/// Ids are never reused within an engine's lifetime, so stale references
/// simply fail lookup instead of aliasing a new object.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn alloc(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
