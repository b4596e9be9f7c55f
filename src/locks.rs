//! Keyed advisory locks serializing writers per source.
//!
//! Locks are created lazily on first use and dropped from the arena once
//! no task holds or waits on them, so the arena stays proportional to the
//! number of sources being written concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct SourceLocks {
    arena: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `(collection, source_id)`.
    pub async fn acquire(&self, collection: &str, source_id: &str) -> OwnedMutexGuard<()> {
        let key = format!("{}\u{1f}{}", collection, source_id);
        let lock = {
            let mut arena = self.arena.lock().unwrap_or_else(|e| e.into_inner());
            // Idle entries are referenced only by the arena.
            arena.retain(|k, m| k == &key || Arc::strong_count(m) > 1);
            arena.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of locks currently tracked.
    pub fn len(&self) -> usize {
        self.arena.lock().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
