//! Advisory per-file lock manager.
//!
//! The manager makes the common path (agents editing through the coordinator)
//! mutually exclusive and surfaces lock state to observers ("locked by agent
//! X"). It is deliberately advisory: a write path that bypasses the
//! coordinator is not blocked. Acquire never queues or waits; contended
//! callers get a rejection and decide themselves whether to retry.
//!
//! There is no expiry and no release-on-crash. Sweeping a dead actor's locks
//! is the orchestration layer's responsibility, via [`LockManager::release_owner`].

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;

use crate::coordinator::models::Lock;
use crate::errors::LockError;

#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<i64, Lock>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock on `file_id` for `owner_id`.
    ///
    /// Re-acquiring by the current owner is idempotent and returns the
    /// existing lock record unchanged.
    pub fn acquire(&self, file_id: i64, owner_id: i64) -> Result<Lock, LockError> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = locks.get(&file_id) {
            if existing.owner_id == owner_id {
                return Ok(existing.clone());
            }
            return Err(LockError::AlreadyLocked {
                file_id,
                owner_id: existing.owner_id,
            });
        }
        let lock = Lock {
            file_id,
            owner_id,
            acquired_at: Utc::now(),
        };
        locks.insert(file_id, lock.clone());
        Ok(lock)
    }

    /// Release the lock on `file_id` held by `owner_id`.
    pub fn release(&self, file_id: i64, owner_id: i64) -> Result<(), LockError> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        match locks.get(&file_id) {
            None => Err(LockError::NotLocked { file_id }),
            Some(lock) if lock.owner_id != owner_id => Err(LockError::NotOwner {
                file_id,
                owner_id: lock.owner_id,
            }),
            Some(_) => {
                locks.remove(&file_id);
                Ok(())
            }
        }
    }

    pub fn query(&self, file_id: i64) -> Option<Lock> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&file_id)
            .cloned()
    }

    /// All live locks, ordered by file id for stable dashboard output.
    pub fn all(&self) -> Vec<Lock> {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<Lock> = locks.values().cloned().collect();
        all.sort_by_key(|l| l.file_id);
        all
    }

    /// Release every lock held by `owner_id`, returning the affected file
    /// ids. Intended for the orchestration layer to sweep after an actor
    /// dies; nothing in the coordinator calls this automatically.
    pub fn release_owner(&self, owner_id: i64) -> Vec<i64> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let files: Vec<i64> = locks
            .iter()
            .filter(|(_, lock)| lock.owner_id == owner_id)
            .map(|(file_id, _)| *file_id)
            .collect();
        for file_id in &files {
            locks.remove(file_id);
        }
        files
    }
}
