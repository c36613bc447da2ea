//! Versioned, named snapshots of file content.
//!
//! History is append-only per file: create never overwrites, restore never
//! deletes. Restore only returns historical content; re-applying it as the
//! current file content (under the lock) is the caller's job.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;

use crate::coordinator::models::Checkpoint;
use crate::errors::CheckpointError;

/// Fields supplied by the caller when creating a checkpoint.
#[derive(Debug, Clone)]
pub struct NewCheckpoint {
    pub file_id: i64,
    pub project_id: i64,
    pub file_path: Option<String>,
    pub content: String,
    pub message: String,
    pub created_by: i64,
}

#[derive(Debug, Default)]
struct StoreInner {
    next_id: i64,
    by_file: HashMap<i64, Vec<Checkpoint>>,
    /// checkpoint id -> (file_id, index into that file's history)
    index: HashMap<i64, (i64, usize)>,
}

#[derive(Debug, Default)]
pub struct CheckpointStore {
    inner: Mutex<StoreInner>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a checkpoint to the file's history. Total: the only failure
    /// mode in this store is a missing id on restore.
    pub fn create(&self, new: NewCheckpoint) -> Checkpoint {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.next_id += 1;
        let checkpoint = Checkpoint {
            id: inner.next_id,
            file_id: new.file_id,
            project_id: new.project_id,
            file_path: new.file_path,
            content: new.content,
            message: new.message,
            created_by: new.created_by,
            created_at: Utc::now(),
        };
        let history = inner.by_file.entry(new.file_id).or_default();
        let position = history.len();
        history.push(checkpoint.clone());
        inner.index.insert(checkpoint.id, (new.file_id, position));
        checkpoint
    }

    /// The file's history in creation order, oldest first. Pure: re-listing
    /// returns the same sequence.
    pub fn list(&self, file_id: i64) -> Vec<Checkpoint> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_file
            .get(&file_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Historical content for `checkpoint_id`, byte for byte as stored.
    pub fn restore(&self, checkpoint_id: i64) -> Result<String, CheckpointError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (file_id, position) = inner
            .index
            .get(&checkpoint_id)
            .copied()
            .ok_or(CheckpointError::NotFound { id: checkpoint_id })?;
        let content = inner
            .by_file
            .get(&file_id)
            .and_then(|history| history.get(position))
            .map(|cp| cp.content.clone())
            .ok_or(CheckpointError::NotFound { id: checkpoint_id })?;
        Ok(content)
    }
}
