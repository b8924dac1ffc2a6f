//! In-memory transcript store for tests and offline development.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use finvox_core::error::{FinVoxError, Result};
use finvox_core::session::{NewTurn, Session, TurnRecord};

use crate::{TranscriptStore, TurnSubscription};

#[derive(Default)]
struct Inner {
    sessions: Vec<Session>,
    turns: Vec<TurnRecord>,
    subscribers: Vec<(String, mpsc::UnboundedSender<TurnRecord>)>,
}

/// Vec-backed store with the same observable behavior as [`crate::RestStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of turns currently held, across all sessions.
    pub fn turn_count(&self) -> usize {
        self.inner.lock().unwrap().turns.len()
    }

    /// Current state of one session record.
    pub fn session(&self, id: &str) -> Option<Session> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }
}

#[async_trait]
impl TranscriptStore for MemoryStore {
    async fn create_session(&self) -> Result<Session> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            ended_at: None,
            session_duration: None,
        };
        self.inner.lock().unwrap().sessions.push(session.clone());
        Ok(session)
    }

    async fn update_session(
        &self,
        id: &str,
        ended_at: DateTime<Utc>,
        session_duration: i64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| FinVoxError::Store(format!("no session {id}")))?;
        session.ended_at = Some(ended_at);
        session.session_duration = Some(session_duration);
        Ok(())
    }

    async fn insert_turn(&self, turn: NewTurn) -> Result<()> {
        let record = TurnRecord {
            id: Uuid::new_v4().to_string(),
            session_id: turn.session_id,
            role: turn.role,
            content: turn.content,
            created_at: turn.created_at,
            audio_duration: None,
        };

        let mut inner = self.inner.lock().unwrap();
        inner
            .subscribers
            .retain(|(session_id, tx)| {
                session_id != &record.session_id || tx.send(record.clone()).is_ok()
            });
        inner.turns.push(record);
        Ok(())
    }

    async fn query_turns(&self, session_id: &str) -> Result<Vec<TurnRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut turns: Vec<TurnRecord> = inner
            .turns
            .iter()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect();
        turns.sort_by_key(|t| t.created_at);
        Ok(turns)
    }

    async fn subscribe_inserts(&self, session_id: &str) -> Result<TurnSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .unwrap()
            .subscribers
            .push((session_id.to_string(), tx));
        Ok(TurnSubscription::new(rx, CancellationToken::new()))
    }
}
