//! WebSocket live channel.
//!
//! Outbound traffic is the tagged [`WsMessage`] envelope fanning out hub
//! frames to every connected observer. Inbound traffic is decoded by
//! [`ClientFrame`], which accepts the current `liveUpdate` shape as well as
//! the legacy `session_start` / `code_update` / `session_end` frames, and
//! normalizes all of them onto the single internal [`LiveEvent`] model so the
//! compatibility shim stays out of the hub.

use axum::{
    body::Bytes,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::api::SharedState;
use super::hub::BroadcastHub;
use super::models::{Checkpoint, LiveEvent, LiveEventKind, LiveSession, Lock, ProcessEvent};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── Outbound frames ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    LiveUpdate { event: LiveEvent },
    LiveSessionStarted { session: LiveSession },
    LiveSessionEnded { session_id: String },
    ProcessOutput { event: ProcessEvent },
    LockAcquired { lock: Lock },
    LockReleased { file_id: i64, owner_id: i64 },
    CheckpointCreated { checkpoint: Checkpoint },
}

impl WsMessage {
    /// The live/terminal session this frame belongs to, if any. Frames with
    /// no session affinity (locks, checkpoints) pass every scope filter.
    pub fn session_scope(&self) -> Option<&str> {
        match self {
            Self::LiveUpdate { event } => Some(&event.session_id),
            Self::LiveSessionStarted { session } => Some(&session.session_id),
            Self::LiveSessionEnded { session_id } => Some(session_id),
            Self::ProcessOutput { event } => Some(&event.session_id),
            Self::LockAcquired { .. }
            | Self::LockReleased { .. }
            | Self::CheckpointCreated { .. } => None,
        }
    }
}

// ── Inbound frames ───────────────────────────────────────────────────

/// Payload of a `liveUpdate` frame. On the wire this is a nested encoded
/// object: either inline JSON or (from older dashboards) a JSON string
/// containing encoded JSON. [`decode_payload`] accepts both.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveUpdatePayload {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "agentName", default)]
    pub agent_name: Option<String>,
    #[serde(rename = "fileName", default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(rename = "updateType", default)]
    pub update_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(rename = "lineCount", default)]
    pub line_count: Option<u64>,
}

/// Frames observers and agents send over the live channel. The legacy
/// session-lifecycle shapes must remain decodable alongside `liveUpdate`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "liveUpdate")]
    LiveUpdate { data: serde_json::Value },

    #[serde(rename = "session_start")]
    SessionStart {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "agentName", default)]
        agent_name: Option<String>,
        #[serde(rename = "fileName", default)]
        file_name: Option<String>,
    },

    #[serde(rename = "code_update")]
    CodeUpdate {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "agentName", default)]
        agent_name: Option<String>,
        #[serde(rename = "fileName", default)]
        file_name: Option<String>,
        #[serde(default)]
        content: Option<String>,
    },

    #[serde(rename = "session_end")]
    SessionEnd {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

/// What an inbound frame asks the hub to do.
#[derive(Debug)]
pub enum InboundAction {
    Publish(LiveEvent),
    Begin {
        session_id: String,
        actor: String,
        file_name: Option<String>,
    },
    End {
        session_id: String,
    },
}

/// Decode a `liveUpdate` payload that may be inline JSON or double-encoded.
fn decode_payload(data: serde_json::Value) -> Result<LiveUpdatePayload, String> {
    let value = match data {
        serde_json::Value::String(inner) => {
            serde_json::from_str(&inner).map_err(|e| format!("bad nested payload: {}", e))?
        }
        other => other,
    };
    serde_json::from_value(value).map_err(|e| format!("bad liveUpdate payload: {}", e))
}

/// Normalize any accepted frame shape onto the internal event model.
pub fn normalize(frame: ClientFrame) -> Result<InboundAction, String> {
    match frame {
        ClientFrame::LiveUpdate { data } => {
            let payload = decode_payload(data)?;
            let kind = payload
                .update_type
                .as_deref()
                .and_then(|t| t.parse::<LiveEventKind>().ok())
                .unwrap_or(LiveEventKind::Partial);
            Ok(InboundAction::Publish(LiveEvent {
                session_id: payload.session_id,
                actor: payload.agent_name.unwrap_or_else(|| "agent".to_string()),
                file_name: payload.file_name,
                kind,
                payload: serde_json::json!({
                    "content": payload.content,
                    "message": payload.message,
                    "action": payload.action,
                    "line_count": payload.line_count,
                }),
                timestamp: Utc::now(),
            }))
        }
        ClientFrame::SessionStart {
            session_id,
            agent_name,
            file_name,
        } => Ok(InboundAction::Begin {
            session_id,
            actor: agent_name.unwrap_or_else(|| "agent".to_string()),
            file_name,
        }),
        ClientFrame::CodeUpdate {
            session_id,
            agent_name,
            file_name,
            content,
        } => Ok(InboundAction::Publish(LiveEvent {
            session_id,
            actor: agent_name.unwrap_or_else(|| "agent".to_string()),
            file_name,
            kind: LiveEventKind::CodeChange,
            payload: serde_json::json!({ "content": content }),
            timestamp: Utc::now(),
        })),
        ClientFrame::SessionEnd { session_id } => Ok(InboundAction::End { session_id }),
    }
}

fn apply(hub: &BroadcastHub, action: InboundAction) {
    match action {
        InboundAction::Publish(event) => hub.publish(event),
        InboundAction::Begin {
            session_id,
            actor,
            file_name,
        } => hub.begin_session(&session_id, &actor, file_name),
        InboundAction::End { session_id } => hub.end_session(&session_id),
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Optional scope: only frames for this live/terminal session (plus
    /// scope-free lock/checkpoint frames) are delivered.
    pub session_id: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub.clone(), params))
}

async fn handle_socket(socket: WebSocket, hub: Arc<BroadcastHub>, params: WsParams) {
    let (sender, receiver) = socket.split();
    let rx = hub.subscribe();
    run_socket_loop(sender, receiver, rx, hub, params).await;
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines broadcast forwarding, inbound frame handling, and periodic
/// ping/pong health checking into a single select loop. If no Pong is
/// received within [`PONG_TIMEOUT`] after a Ping is sent, the connection is
/// considered dead and the loop exits — which is also how a disconnected
/// observer silently drops out of the fan-out set.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<WsMessage>,
    hub: Arc<BroadcastHub>,
    params: WsParams,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // ── Periodic ping ───────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            // ── Broadcast forwarding ────────────────────────────────
            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if let Some(scope) = params.session_id.as_deref()
                            && let Some(frame_scope) = msg.session_scope()
                            && frame_scope != scope
                        {
                            continue;
                        }
                        match serde_json::to_string(&msg) {
                            Ok(json) => {
                                if sender.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!("failed to serialize ws frame: {}", e);
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // This observer fell behind; its oldest frames are
                        // dropped rather than blocking the publisher.
                        tracing::debug!(skipped, "ws observer lagged");
                        continue;
                    }
                }
            }

            // ── Inbound frames (live updates, pong, close) ──────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(text.as_str()) {
                            Ok(frame) => match normalize(frame) {
                                Ok(action) => apply(&hub, action),
                                Err(reason) => {
                                    tracing::warn!(%reason, "dropping malformed live frame");
                                }
                            },
                            Err(e) => {
                                tracing::warn!("undecodable live frame: {}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Ignore Binary and client Ping frames
                    }
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_update_frame_with_inline_payload_normalizes() {
        let raw = serde_json::json!({
            "type": "liveUpdate",
            "data": {
                "sessionId": "sess-1",
                "agentName": "refactorer",
                "fileName": "src/api.rs",
                "content": "fn x() {}",
                "updateType": "code_change",
                "lineCount": 12
            }
        });
        let frame: ClientFrame = serde_json::from_value(raw).unwrap();
        match normalize(frame).unwrap() {
            InboundAction::Publish(event) => {
                assert_eq!(event.session_id, "sess-1");
                assert_eq!(event.actor, "refactorer");
                assert_eq!(event.kind, LiveEventKind::CodeChange);
                assert_eq!(event.payload["content"], "fn x() {}");
                assert_eq!(event.payload["line_count"], 12);
            }
            other => panic!("Expected Publish, got {:?}", other),
        }
    }

    #[test]
    fn live_update_frame_with_string_encoded_payload_normalizes() {
        // Older dashboards double-encode the payload as a JSON string.
        let nested = serde_json::json!({
            "sessionId": "sess-2",
            "agentName": "fixer",
            "updateType": "partial",
            "message": "halfway"
        })
        .to_string();
        let raw = serde_json::json!({ "type": "liveUpdate", "data": nested });
        let frame: ClientFrame = serde_json::from_value(raw).unwrap();
        match normalize(frame).unwrap() {
            InboundAction::Publish(event) => {
                assert_eq!(event.session_id, "sess-2");
                assert_eq!(event.kind, LiveEventKind::Partial);
                assert_eq!(event.payload["message"], "halfway");
            }
            other => panic!("Expected Publish, got {:?}", other),
        }
    }

    #[test]
    fn unknown_update_type_falls_back_to_partial() {
        let raw = serde_json::json!({
            "type": "liveUpdate",
            "data": {"sessionId": "s", "updateType": "mystery"}
        });
        let frame: ClientFrame = serde_json::from_value(raw).unwrap();
        match normalize(frame).unwrap() {
            InboundAction::Publish(event) => assert_eq!(event.kind, LiveEventKind::Partial),
            other => panic!("Expected Publish, got {:?}", other),
        }
    }

    #[test]
    fn legacy_session_start_frame_decodes() {
        let raw = serde_json::json!({
            "type": "session_start",
            "sessionId": "sess-3",
            "agentName": "planner",
            "fileName": "README.md"
        });
        let frame: ClientFrame = serde_json::from_value(raw).unwrap();
        match normalize(frame).unwrap() {
            InboundAction::Begin {
                session_id,
                actor,
                file_name,
            } => {
                assert_eq!(session_id, "sess-3");
                assert_eq!(actor, "planner");
                assert_eq!(file_name.as_deref(), Some("README.md"));
            }
            other => panic!("Expected Begin, got {:?}", other),
        }
    }

    #[test]
    fn legacy_code_update_frame_becomes_code_change_event() {
        let raw = serde_json::json!({
            "type": "code_update",
            "sessionId": "sess-4",
            "content": "let y = 2;"
        });
        let frame: ClientFrame = serde_json::from_value(raw).unwrap();
        match normalize(frame).unwrap() {
            InboundAction::Publish(event) => {
                assert_eq!(event.kind, LiveEventKind::CodeChange);
                assert_eq!(event.payload["content"], "let y = 2;");
                // Missing agentName falls back
                assert_eq!(event.actor, "agent");
            }
            other => panic!("Expected Publish, got {:?}", other),
        }
    }

    #[test]
    fn legacy_session_end_frame_decodes() {
        let raw = serde_json::json!({"type": "session_end", "sessionId": "sess-5"});
        let frame: ClientFrame = serde_json::from_value(raw).unwrap();
        match normalize(frame).unwrap() {
            InboundAction::End { session_id } => assert_eq!(session_id, "sess-5"),
            other => panic!("Expected End, got {:?}", other),
        }
    }

    #[test]
    fn malformed_nested_payload_is_an_error_not_a_panic() {
        let raw = serde_json::json!({"type": "liveUpdate", "data": "{not json"});
        let frame: ClientFrame = serde_json::from_value(raw).unwrap();
        assert!(normalize(frame).is_err());
    }

    #[test]
    fn unknown_frame_type_fails_to_decode() {
        let raw = serde_json::json!({"type": "telemetry", "data": {}});
        assert!(serde_json::from_value::<ClientFrame>(raw).is_err());
    }

    #[test]
    fn ws_message_envelope_has_type_and_data() {
        let msg = WsMessage::LiveSessionEnded {
            session_id: "sess-6".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"LiveSessionEnded""#));
        assert!(json.contains(r#""data""#));
        assert!(json.contains(r#""session_id":"sess-6""#));
    }

    #[test]
    fn ws_message_roundtrip_deserialization() {
        let msg = WsMessage::LockReleased {
            file_id: 4,
            owner_id: 17,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: WsMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            WsMessage::LockReleased { file_id, owner_id } => {
                assert_eq!(file_id, 4);
                assert_eq!(owner_id, 17);
            }
            _ => panic!("Expected LockReleased variant"),
        }
    }

    #[test]
    fn session_scope_covers_session_frames_only() {
        let update = WsMessage::LiveSessionEnded {
            session_id: "s1".to_string(),
        };
        assert_eq!(update.session_scope(), Some("s1"));

        let lock = WsMessage::LockReleased {
            file_id: 1,
            owner_id: 2,
        };
        assert_eq!(lock.session_scope(), None);
    }

    #[test]
    fn keepalive_constants() {
        // PONG_TIMEOUT must exceed PING_INTERVAL so a fresh connection is
        // not immediately considered dead.
        assert!(PONG_TIMEOUT > PING_INTERVAL);
        assert_eq!(PING_INTERVAL, Duration::from_secs(30));
        assert_eq!(PONG_TIMEOUT, Duration::from_secs(60));
    }
}
