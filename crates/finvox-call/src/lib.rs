//! Call session state machine — coordinates speech capture, remote inference,
//! and synthesis playback for one tutoring call at a time.
//!
//! The session runs as a background task started with [`CallSession::start`],
//! which returns a [`CallHandle`] for user gestures and a receiver of
//! [`CallEvent`]s for the embedding surface. Capture and playback are never
//! active at the same time: listening preempts speaking (barge-in), and
//! `end_call` cancels whatever is in flight.

use serde::{Deserialize, Serialize};

use finvox_core::session::CallPhase;

pub mod session;

pub use session::{CallContext, CallHandle, CallSession, GREETING};

/// User gestures driving the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallCommand {
    StartCall,
    ToggleListening,
    ToggleSpeaking,
    EndCall,
}

/// Events emitted by the call session for the embedding surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CallEvent {
    /// The state machine moved to a new phase.
    #[serde(rename = "phase")]
    PhaseChanged { phase: CallPhase },

    /// User-visible status line, including start-failure statuses.
    #[serde(rename = "status")]
    Status { text: String },

    /// A session record was opened for this call.
    #[serde(rename = "session_started")]
    SessionStarted { session_id: String },

    /// Finalized user speech.
    #[serde(rename = "transcript")]
    Transcript { text: String },

    /// The call ended; total duration in whole seconds.
    #[serde(rename = "session_ended")]
    SessionEnded { duration_secs: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serde_tags() {
        let event = CallEvent::PhaseChanged {
            phase: CallPhase::Listening,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "phase");
        assert_eq!(json["phase"], "listening");

        let event = CallEvent::SessionEnded { duration_secs: 90 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session_ended");
        assert_eq!(json["duration_secs"], 90);
    }
}

