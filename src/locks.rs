//! Per-name serialisation of lifecycle operations.
//!
//! Operations on the same volume name run one at a time; different names
//! proceed in parallel. Entries are held weakly and pruned once no operation
//! holds them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry of one async mutex per volume name.
#[derive(Debug, Default)]
pub struct NameLocks {
    entries: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl NameLocks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `name`.
    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = self.entry(name);
        lock.lock_owned().await
    }

    /// Number of names with a live lock.
    #[must_use]
    pub fn active(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.values().filter(|weak| weak.strong_count() > 0).count()
    }

    fn entry(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.get(name).and_then(Weak::upgrade) {
            return existing;
        }

        entries.retain(|_, weak| weak.strong_count() > 0);
        let fresh = Arc::new(AsyncMutex::new(()));
        entries.insert(name.to_owned(), Arc::downgrade(&fresh));
        fresh
    }
}
