//! Collaboration session tracker.
//!
//! A bookkeeping state machine: it groups participants around an objective,
//! enforces monotonic phase progression, and records decisions and
//! inter-agent messages. It moves no bytes between agents; the orchestration
//! layer consults it to decide whether an agent may keep acting in the
//! current phase.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use uuid::Uuid;

use super::models::{
    AgentMessage, CollaborationSession, Decision, MessagePriority, Phase, SessionStatus,
};
use crate::errors::CollabError;

/// Fields supplied when recording an inter-agent message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub from_agent_id: i64,
    /// `None` broadcasts to all participants of the session.
    pub to_agent_id: Option<i64>,
    pub message_type: String,
    pub content: String,
    pub priority: MessagePriority,
    pub response_required: bool,
}

#[derive(Debug, Default)]
struct TrackerInner {
    sessions: HashMap<String, CollaborationSession>,
    messages: HashMap<String, Vec<AgentMessage>>,
}

#[derive(Debug, Default)]
pub struct CollaborationTracker {
    inner: Mutex<TrackerInner>,
}

impl CollaborationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session in phase `planning`.
    pub fn start(
        &self,
        project_id: i64,
        participant_ids: Vec<i64>,
        objective: &str,
    ) -> CollaborationSession {
        let session = CollaborationSession {
            session_id: Uuid::new_v4().to_string(),
            project_id,
            participant_ids,
            objective: objective.to_string(),
            phase: Phase::Planning,
            decisions: Vec::new(),
            outcomes: Vec::new(),
            status: SessionStatus::Active,
            started_at: Utc::now(),
        };
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .messages
            .insert(session.session_id.clone(), Vec::new());
        inner
            .sessions
            .insert(session.session_id.clone(), session.clone());
        tracing::info!(session_id = %session.session_id, project_id, "collaboration session started");
        session
    }

    pub fn get(&self, session_id: &str) -> Option<CollaborationSession> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sessions
            .get(session_id)
            .cloned()
    }

    /// Advance to `next`, which must be the immediate successor of the
    /// current phase. No skipping, no going backward.
    pub fn advance_phase(
        &self,
        session_id: &str,
        next: Phase,
    ) -> Result<CollaborationSession, CollabError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let session =
            inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| CollabError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
        if session.status != SessionStatus::Active {
            return Err(CollabError::SessionNotActive {
                session_id: session_id.to_string(),
            });
        }
        if session.phase.successor() != Some(next) {
            return Err(CollabError::InvalidPhaseTransition {
                from: session.phase,
                to: next,
            });
        }
        session.phase = next;
        tracing::info!(session_id, phase = %next, "phase advanced");
        Ok(session.clone())
    }

    /// Append to the session's decision log. Only valid while `active`.
    pub fn record_decision(
        &self,
        session_id: &str,
        decision: &str,
        made_by: i64,
        reasoning: &str,
    ) -> Result<Decision, CollabError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let session =
            inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| CollabError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
        if session.status != SessionStatus::Active {
            return Err(CollabError::SessionNotActive {
                session_id: session_id.to_string(),
            });
        }
        let entry = Decision {
            decision: decision.to_string(),
            made_by,
            reasoning: reasoning.to_string(),
            decided_at: Utc::now(),
        };
        session.decisions.push(entry.clone());
        Ok(entry)
    }

    /// Terminal: sets status to `completed`; no further decisions may be
    /// recorded afterwards.
    pub fn end(
        &self,
        session_id: &str,
        outcomes: Vec<String>,
    ) -> Result<CollaborationSession, CollabError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let session =
            inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| CollabError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
        if session.status == SessionStatus::Completed {
            return Err(CollabError::SessionNotActive {
                session_id: session_id.to_string(),
            });
        }
        session.status = SessionStatus::Completed;
        session.outcomes = outcomes;
        tracing::info!(session_id, "collaboration session ended");
        Ok(session.clone())
    }

    /// Record an inter-agent message against an existing session.
    pub fn send_message(
        &self,
        session_id: &str,
        new: NewMessage,
    ) -> Result<AgentMessage, CollabError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !inner.sessions.contains_key(session_id) {
            return Err(CollabError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        }
        let message = AgentMessage {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            from_agent_id: new.from_agent_id,
            to_agent_id: new.to_agent_id,
            message_type: new.message_type,
            content: new.content,
            priority: new.priority,
            response_required: new.response_required,
            sent_at: Utc::now(),
        };
        inner
            .messages
            .entry(session_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    /// Messages for a session in creation order.
    pub fn messages(&self, session_id: &str) -> Result<Vec<AgentMessage>, CollabError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !inner.sessions.contains_key(session_id) {
            return Err(CollabError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        }
        Ok(inner.messages.get(session_id).cloned().unwrap_or_default())
    }
}
