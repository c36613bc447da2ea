//! Append-only agent memory.
//!
//! `importance` (0-10) is a retrieval ranking only: it never bounds growth
//! and never evicts. If bounded memory is ever needed it belongs in a
//! separate, explicit eviction component, not here.

use std::sync::{Mutex, PoisonError};

use chrono::Utc;

use super::models::{MemoryEntry, MemoryType};

pub const MAX_IMPORTANCE: u8 = 10;

/// Fields supplied when recording a memory.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub agent_id: i64,
    pub project_id: Option<i64>,
    pub memory_type: MemoryType,
    pub summary: String,
    pub details: String,
    pub importance: u8,
}

#[derive(Debug, Default)]
struct MemoryInner {
    next_id: i64,
    entries: Vec<MemoryEntry>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Importance is clamped to the 0-10 scale.
    pub fn record(&self, new: NewMemory) -> MemoryEntry {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.next_id += 1;
        let entry = MemoryEntry {
            id: inner.next_id,
            agent_id: new.agent_id,
            project_id: new.project_id,
            memory_type: new.memory_type,
            summary: new.summary,
            details: new.details,
            importance: new.importance.min(MAX_IMPORTANCE),
            created_at: Utc::now(),
        };
        inner.entries.push(entry.clone());
        entry
    }

    /// Entries for an agent, most important first, most recent first within
    /// equal importance.
    pub fn recall(
        &self,
        agent_id: i64,
        project_id: Option<i64>,
        memory_type: Option<MemoryType>,
        limit: usize,
    ) -> Vec<MemoryEntry> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut hits: Vec<MemoryEntry> = inner
            .entries
            .iter()
            .filter(|e| e.agent_id == agent_id)
            .filter(|e| project_id.is_none() || e.project_id == project_id)
            .filter(|e| memory_type.is_none_or(|t| e.memory_type == t))
            .cloned()
            .collect();
        hits.sort_by(|a, b| {
            b.importance
                .cmp(&a.importance)
                .then(b.created_at.cmp(&a.created_at))
        });
        hits.truncate(limit);
        hits
    }
}
