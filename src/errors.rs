//! Typed error hierarchy for the Atelier coordinator.
//!
//! Four top-level enums cover the four subsystems:
//! - `LockError` — lock contention and ownership failures
//! - `CheckpointError` — checkpoint lookup failures
//! - `ProcessError` — terminal session lifecycle failures
//! - `CollabError` — collaboration session state-machine failures
//!
//! Everything here is recoverable by the caller: contention errors are a
//! retry-or-wait signal, not-found errors indicate a caller/state mismatch.
//! Nothing is retried automatically by the coordinator itself.

use thiserror::Error;

use crate::coordinator::models::Phase;

/// Errors from the advisory lock manager.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("file {file_id} is locked by agent {owner_id}")]
    AlreadyLocked { file_id: i64, owner_id: i64 },

    #[error("file {file_id} is locked by agent {owner_id}, not the caller")]
    NotOwner { file_id: i64, owner_id: i64 },

    #[error("file {file_id} is not locked")]
    NotLocked { file_id: i64 },
}

/// Errors from the checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint {id} not found")]
    NotFound { id: i64 },
}

/// Errors from the process runner.
///
/// Spawn failures and non-zero exits are deliberately absent: those are
/// reported as regular `stderr`/`exit` stream events, not errors.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("terminal session {session_id} is already running")]
    SessionAlreadyRunning { session_id: String },
}

/// Errors from the collaboration session tracker.
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("collaboration session {session_id} not found")]
    SessionNotFound { session_id: String },

    #[error("collaboration session {session_id} is not active")]
    SessionNotActive { session_id: String },

    #[error("invalid phase transition: {from} -> {to}")]
    InvalidPhaseTransition { from: Phase, to: Phase },
}
