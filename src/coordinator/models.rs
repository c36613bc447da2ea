use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Locks ─────────────────────────────────────────────────────────────

/// An advisory per-file lock. At most one live lock per `file_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lock {
    pub file_id: i64,
    pub owner_id: i64,
    pub acquired_at: DateTime<Utc>,
}

// ── Checkpoints ───────────────────────────────────────────────────────

/// An immutable, named snapshot of a file's content. Checkpoints form an
/// append-only history per file; restore never deletes history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: i64,
    pub file_id: i64,
    pub project_id: i64,
    /// Display label only; `file_id` is the identity shared with the lock
    /// manager.
    pub file_path: Option<String>,
    pub content: String,
    pub message: String,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

// ── Live events ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LiveEventKind {
    Thinking,
    Partial,
    CodeChange,
    Complete,
    Error,
}

impl LiveEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::Partial => "partial",
            Self::CodeChange => "code_change",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// A terminal kind deactivates the owning live session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl FromStr for LiveEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thinking" => Ok(Self::Thinking),
            "partial" => Ok(Self::Partial),
            "code_change" => Ok(Self::CodeChange),
            "complete" => Ok(Self::Complete),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid live event kind: {}", s)),
        }
    }
}

/// One incremental edit/status event from an actor. Transient: relayed to
/// connected observers, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveEvent {
    pub session_id: String,
    pub actor: String,
    pub file_name: Option<String>,
    pub kind: LiveEventKind,
    /// Free-form payload: content, message, action, line_count, ...
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Bookkeeping record the hub maintains per live-edit session, registered
/// implicitly by the first event seen for a `session_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSession {
    pub session_id: String,
    pub actor: String,
    pub file_name: Option<String>,
    pub is_active: bool,
    pub started_at: DateTime<Utc>,
}

// ── Terminal sessions ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Running,
    Exited,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessEventKind {
    Stdout,
    Stderr,
    Exit,
    Clear,
}

/// Structured output event from a terminal session, pushed through the hub
/// as it occurs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEvent {
    pub session_id: String,
    pub kind: ProcessEventKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub timestamp: DateTime<Utc>,
}

impl ProcessEvent {
    pub fn new(session_id: &str, kind: ProcessEventKind, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.to_string(),
            kind,
            content: content.into(),
            exit_code: None,
            timestamp: Utc::now(),
        }
    }

    pub fn exit(session_id: &str, exit_code: Option<i32>) -> Self {
        Self {
            session_id: session_id.to_string(),
            kind: ProcessEventKind::Exit,
            content: String::new(),
            exit_code,
            timestamp: Utc::now(),
        }
    }
}

/// Snapshot of a terminal session for the dashboard listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSessionInfo {
    pub session_id: String,
    pub command: String,
    pub working_directory: String,
    pub state: ProcessState,
    pub started_at: DateTime<Utc>,
}

// ── Collaboration sessions ────────────────────────────────────────────

/// Stage of a collaboration session. Strictly monotonic: a session only
/// advances to the immediate successor, never skips or goes back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Implementation,
    Review,
    Completed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Implementation => "implementation",
            Self::Review => "review",
            Self::Completed => "completed",
        }
    }

    /// The only phase this one may advance to, if any.
    pub fn successor(&self) -> Option<Phase> {
        match self {
            Self::Planning => Some(Self::Implementation),
            Self::Implementation => Some(Self::Review),
            Self::Review => Some(Self::Completed),
            Self::Completed => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(Self::Planning),
            "implementation" => Ok(Self::Implementation),
            "review" => Ok(Self::Review),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid phase: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
}

/// One attributed entry in a session's append-only decision log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub decision: String,
    pub made_by: i64,
    pub reasoning: String,
    pub decided_at: DateTime<Utc>,
}

/// Groups a set of agents around an objective and tracks phase progression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationSession {
    pub session_id: String,
    pub project_id: i64,
    pub participant_ids: Vec<i64>,
    pub objective: String,
    pub phase: Phase,
    pub decisions: Vec<Decision>,
    pub outcomes: Vec<String>,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Inter-agent communication recorded against a collaboration session.
/// `to_agent_id: None` means broadcast to all participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub session_id: String,
    pub from_agent_id: i64,
    pub to_agent_id: Option<i64>,
    pub message_type: String,
    pub content: String,
    pub priority: MessagePriority,
    pub response_required: bool,
    pub sent_at: DateTime<Utc>,
}

// ── Agent memory ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    ProjectContext,
    UserPreference,
    CodePattern,
    DecisionHistory,
}

impl FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project_context" => Ok(Self::ProjectContext),
            "user_preference" => Ok(Self::UserPreference),
            "code_pattern" => Ok(Self::CodePattern),
            "decision_history" => Ok(Self::DecisionHistory),
            _ => Err(format!("Invalid memory type: {}", s)),
        }
    }
}

/// Append-only memory entry. `importance` (0-10) orders retrieval only;
/// it never drives eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: i64,
    pub agent_id: i64,
    pub project_id: Option<i64>,
    pub memory_type: MemoryType,
    pub summary: String,
    pub details: String,
    pub importance: u8,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_event_kind_roundtrips_through_str() {
        for kind in [
            LiveEventKind::Thinking,
            LiveEventKind::Partial,
            LiveEventKind::CodeChange,
            LiveEventKind::Complete,
            LiveEventKind::Error,
        ] {
            assert_eq!(kind.as_str().parse::<LiveEventKind>().unwrap(), kind);
        }
    }

    #[test]
    fn live_event_kind_terminal_variants() {
        assert!(LiveEventKind::Complete.is_terminal());
        assert!(LiveEventKind::Error.is_terminal());
        assert!(!LiveEventKind::Partial.is_terminal());
        assert!(!LiveEventKind::Thinking.is_terminal());
    }

    #[test]
    fn phase_successor_chain() {
        assert_eq!(Phase::Planning.successor(), Some(Phase::Implementation));
        assert_eq!(Phase::Implementation.successor(), Some(Phase::Review));
        assert_eq!(Phase::Review.successor(), Some(Phase::Completed));
        assert_eq!(Phase::Completed.successor(), None);
    }

    #[test]
    fn phase_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Phase::Implementation).unwrap(),
            r#""implementation""#
        );
        let parsed: Phase = serde_json::from_str(r#""review""#).unwrap();
        assert_eq!(parsed, Phase::Review);
    }

    #[test]
    fn process_event_exit_helper_sets_kind_and_code() {
        let event = ProcessEvent::exit("term-1", Some(0));
        assert_eq!(event.kind, ProcessEventKind::Exit);
        assert_eq!(event.exit_code, Some(0));
        assert_eq!(event.session_id, "term-1");
    }

    #[test]
    fn process_event_omits_exit_code_when_absent() {
        let event = ProcessEvent::new("t", ProcessEventKind::Stdout, "hello");
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("exit_code"));
        assert!(json.contains(r#""kind":"stdout""#));
    }

    #[test]
    fn memory_type_parses_snake_case() {
        assert_eq!(
            "code_pattern".parse::<MemoryType>().unwrap(),
            MemoryType::CodePattern
        );
        assert!("nonsense".parse::<MemoryType>().is_err());
    }

    #[test]
    fn message_priority_defaults_to_normal() {
        assert_eq!(MessagePriority::default(), MessagePriority::Normal);
    }

    #[test]
    fn checkpoint_serialization_keeps_content_verbatim() {
        let cp = Checkpoint {
            id: 1,
            file_id: 2,
            project_id: 3,
            file_path: Some("src/main.rs".to_string()),
            content: "fn main() {}\n".to_string(),
            message: "initial pass".to_string(),
            created_by: 9,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&cp).unwrap();
        let parsed: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.content, "fn main() {}\n");
        assert_eq!(parsed.message, "initial pass");
    }
}
