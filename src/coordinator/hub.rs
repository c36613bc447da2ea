//! Fan-out message bus for live edit/status events.
//!
//! The hub is the single fan-out point: any actor publishes, every connected
//! observer receives. Delivery is best-effort and at-most-once per observer;
//! there is no replay buffer, so an observer that subscribes late only sees
//! events published after it subscribed. A `tokio::sync::broadcast` channel
//! carries the frames: per-channel FIFO gives publish-order delivery within a
//! session, and a slow observer lags (dropping its own oldest frames) instead
//! of back-pressuring the publisher.
//!
//! The hub also keeps the "who is editing what right now" bookkeeping: the
//! first event seen for an unknown `session_id` implicitly registers a live
//! session record, and a terminal event (`complete`/`error`) or an explicit
//! end marks it inactive.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast;

use crate::coordinator::models::{LiveEvent, LiveSession};
use crate::coordinator::ws::WsMessage;

pub struct BroadcastHub {
    tx: broadcast::Sender<WsMessage>,
    live: Mutex<HashMap<String, LiveSession>>,
}

impl BroadcastHub {
    /// `capacity` bounds each observer's buffered backlog; overflow drops
    /// that observer's oldest frames.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            live: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsMessage> {
        self.tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Fan a frame out to all observers. Never blocks; silently a no-op when
    /// nobody is subscribed.
    pub fn broadcast(&self, msg: WsMessage) {
        let _ = self.tx.send(msg);
    }

    /// Publish a live event, registering or deactivating the owning session
    /// record as a side effect.
    pub fn publish(&self, event: LiveEvent) {
        let (started, ended) = {
            let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            let started = if live.contains_key(&event.session_id) {
                None
            } else {
                let session = LiveSession {
                    session_id: event.session_id.clone(),
                    actor: event.actor.clone(),
                    file_name: event.file_name.clone(),
                    is_active: true,
                    started_at: Utc::now(),
                };
                live.insert(event.session_id.clone(), session.clone());
                Some(session)
            };
            let ended = if event.kind.is_terminal() {
                if let Some(session) = live.get_mut(&event.session_id) {
                    session.is_active = false;
                }
                Some(event.session_id.clone())
            } else {
                None
            };
            (started, ended)
        };

        if let Some(session) = started {
            tracing::debug!(session_id = %session.session_id, actor = %session.actor, "live session registered");
            self.broadcast(WsMessage::LiveSessionStarted { session });
        }
        self.broadcast(WsMessage::LiveUpdate { event });
        if let Some(session_id) = ended {
            self.broadcast(WsMessage::LiveSessionEnded { session_id });
        }
    }

    /// Explicitly register a live session without an event, used by the
    /// legacy `session_start` frame.
    pub fn begin_session(&self, session_id: &str, actor: &str, file_name: Option<String>) {
        let started = {
            let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            if live.contains_key(session_id) {
                None
            } else {
                let session = LiveSession {
                    session_id: session_id.to_string(),
                    actor: actor.to_string(),
                    file_name,
                    is_active: true,
                    started_at: Utc::now(),
                };
                live.insert(session_id.to_string(), session.clone());
                Some(session)
            }
        };
        if let Some(session) = started {
            self.broadcast(WsMessage::LiveSessionStarted { session });
        }
    }

    /// Explicit end signal. Unknown or already-inactive sessions are ignored.
    pub fn end_session(&self, session_id: &str) {
        let ended = {
            let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            match live.get_mut(session_id) {
                Some(session) if session.is_active => {
                    session.is_active = false;
                    true
                }
                _ => false,
            }
        };
        if ended {
            self.broadcast(WsMessage::LiveSessionEnded {
                session_id: session_id.to_string(),
            });
        }
    }

    /// Session records seen so far, most recent first.
    pub fn sessions(&self) -> Vec<LiveSession> {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let mut sessions: Vec<LiveSession> = live.values().cloned().collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        sessions
    }

    pub fn active_sessions(&self) -> Vec<LiveSession> {
        self.sessions().into_iter().filter(|s| s.is_active).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::models::LiveEventKind;

    fn event(session_id: &str, kind: LiveEventKind) -> LiveEvent {
        LiveEvent {
            session_id: session_id.to_string(),
            actor: "agent-a".to_string(),
            file_name: Some("src/lib.rs".to_string()),
            kind,
            payload: serde_json::json!({"content": "let x = 1;"}),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn first_event_registers_live_session() {
        let hub = BroadcastHub::new(16);
        let mut rx = hub.subscribe();

        hub.publish(event("sess-1", LiveEventKind::Partial));

        match rx.recv().await.unwrap() {
            WsMessage::LiveSessionStarted { session } => {
                assert_eq!(session.session_id, "sess-1");
                assert!(session.is_active);
            }
            other => panic!("Expected LiveSessionStarted, got {:?}", other),
        }
        match rx.recv().await.unwrap() {
            WsMessage::LiveUpdate { event } => assert_eq!(event.session_id, "sess-1"),
            other => panic!("Expected LiveUpdate, got {:?}", other),
        }

        let sessions = hub.active_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].actor, "agent-a");
    }

    #[tokio::test]
    async fn terminal_event_deactivates_session() {
        let hub = BroadcastHub::new(16);
        hub.publish(event("sess-1", LiveEventKind::Partial));
        hub.publish(event("sess-1", LiveEventKind::Complete));

        assert!(hub.active_sessions().is_empty());
        let all = hub.sessions();
        assert_eq!(all.len(), 1);
        assert!(!all[0].is_active);
    }

    #[tokio::test]
    async fn events_from_one_session_arrive_in_publish_order() {
        let hub = BroadcastHub::new(64);
        let mut rx = hub.subscribe();

        for i in 0..10 {
            let mut e = event("sess-1", LiveEventKind::Partial);
            e.payload = serde_json::json!({"seq": i});
            hub.publish(e);
        }

        let mut seen = Vec::new();
        while seen.len() < 10 {
            if let WsMessage::LiveUpdate { event } = rx.recv().await.unwrap() {
                seen.push(event.payload["seq"].as_i64().unwrap());
            }
        }
        assert_eq!(seen, (0..10).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let hub = BroadcastHub::new(16);
        hub.publish(event("sess-1", LiveEventKind::Partial));

        let mut rx = hub.subscribe();
        hub.publish(event("sess-1", LiveEventKind::CodeChange));

        // Only the post-subscribe event is delivered
        match rx.recv().await.unwrap() {
            WsMessage::LiveUpdate { event } => {
                assert_eq!(event.kind, LiveEventKind::CodeChange);
            }
            other => panic!("Expected LiveUpdate, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn publish_without_observers_does_not_panic() {
        let hub = BroadcastHub::new(16);
        hub.publish(event("sess-1", LiveEventKind::Partial));
    }

    #[tokio::test]
    async fn explicit_end_marks_inactive_and_notifies() {
        let hub = BroadcastHub::new(16);
        hub.begin_session("sess-9", "agent-b", None);
        let mut rx = hub.subscribe();

        hub.end_session("sess-9");
        match rx.recv().await.unwrap() {
            WsMessage::LiveSessionEnded { session_id } => assert_eq!(session_id, "sess-9"),
            other => panic!("Expected LiveSessionEnded, got {:?}", other),
        }

        // Ending twice emits nothing further
        hub.end_session("sess-9");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn end_unknown_session_is_ignored() {
        let hub = BroadcastHub::new(16);
        hub.end_session("never-seen");
        assert!(hub.sessions().is_empty());
    }
}
