//! Per-item locking for read-modify-write backends
//!
//! The cloud backend rewrites an item's whole metadata dictionary on every
//! mutation. Two tasks in this process mutating the same item would otherwise
//! each lose the other's write, so mutations take the item's lock first.
//! Other server processes are not covered; across processes the last writer
//! wins.

use crate::types::ItemPath;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = HashMap<ItemPath, Arc<Mutex<()>>>;

/// Per-item async lock manager.
///
/// Entries are created on demand and dropped again when the last guard for an
/// item is released, so the map only holds items with in-flight mutations.
pub struct ItemLockManager {
    locks: Arc<RwLock<LockMap>>,
}

impl ItemLockManager {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn get_item_lock(&self, item: &ItemPath) -> Arc<Mutex<()>> {
        {
            let map = self.locks.read();
            if let Some(lock) = map.get(item) {
                return lock.clone();
            }
        }

        // Another task may have inserted it between the two map locks.
        let mut map = self.locks.write();
        map.entry(item.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `item`.
    pub async fn lock(&self, item: &ItemPath) -> ItemGuard {
        let guard = self.get_item_lock(item).lock_owned().await;
        ItemGuard {
            item: item.clone(),
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// Lock two items in a fixed order so that opposite-direction copies
    /// cannot deadlock. Locks once when both are the same item.
    pub async fn lock_pair(&self, a: &ItemPath, b: &ItemPath) -> Vec<ItemGuard> {
        if a == b {
            return vec![self.lock(a).await];
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.lock(first).await;
        let second = self.lock(second).await;
        vec![first, second]
    }

    /// Number of items currently tracked.
    pub fn tracked(&self) -> usize {
        self.locks.read().len()
    }
}

impl Default for ItemLockManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to one item; released on drop.
pub struct ItemGuard {
    item: ItemPath,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<RwLock<LockMap>>,
}

impl Drop for ItemGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.locks.write();
        if let Some(lock) = map.get(&self.item) {
            // Only the map still refers to it: nobody holds or awaits it.
            if Arc::strong_count(lock) == 1 {
                map.remove(&self.item);
            }
        }
    }
}
