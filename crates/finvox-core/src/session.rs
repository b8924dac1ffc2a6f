//! Session model — call sessions, transcript turns, and conversation context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One bounded call interaction, as stored by the transcript store.
///
/// Created when a call starts; mutated exactly once at call end to set
/// `ended_at` and `session_duration`, never thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Total call duration in whole seconds.
    #[serde(default)]
    pub session_duration: Option<i64>,
}

/// A persisted utterance tied to a session. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Playback length in seconds, when the store has it. Not consumed by
    /// the pipeline.
    #[serde(default)]
    pub audio_duration: Option<f64>,
}

/// Insert payload for a new turn — the store assigns the row id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTurn {
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl NewTurn {
    pub fn new(session_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// One `{role, content}` pair of the in-memory conversation context
/// supplied to inference for continuity within a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
}

impl ContextMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Phase of the call session state machine. Exactly one phase is active at
/// any time; capture and playback are never simultaneously active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    /// No active session.
    Idle,
    /// Session open, neither capturing nor speaking.
    Ready,
    /// Capture in progress.
    Listening,
    /// Transcript captured, inference request in flight.
    Processing,
    /// Playback in progress.
    Speaking,
}

impl CallPhase {
    /// Whether a session is open in this phase.
    pub fn is_active(&self) -> bool {
        !matches!(self, CallPhase::Idle)
    }
}
