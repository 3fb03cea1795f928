//! Per-(subject, role) async locks.
//!
//! A grant, revoke, prolong or sweep item holds the lock for its pair across
//! the whole check → platform call → store write sequence. Different pairs
//! never contend.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::ids::{RoleId, UserId};

type Key = (UserId, RoleId);

#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<Key, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held lock for one pair. Unused entries are pruned when the guard drops.
pub struct KeyGuard<'a> {
    owner: &'a KeyLocks,
    key: Key,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, subject: UserId, role: RoleId) -> KeyGuard<'_> {
        let key = (subject, role);
        let slot = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(key).or_default())
        };
        let guard = slot.lock_owned().await;
        KeyGuard {
            owner: self,
            key,
            guard: Some(guard),
        }
    }

    /// Number of pairs with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.owner.locks.lock();
        // Only our map entry left means nobody else is waiting on it.
        if let Some(slot) = locks.get(&self.key) {
            if Arc::strong_count(slot) == 1 {
                locks.remove(&self.key);
            }
        }
    }
}
