//! Transcript store — session and turn persistence with realtime insert push.
//!
//! The store is an external collaborator: the call pipeline appends turns and
//! session records through the [`TranscriptStore`] trait, and review surfaces
//! follow newly inserted turns through [`TurnSubscription`]. Two
//! implementations are provided: [`rest::RestStore`] against the hosted data
//! platform, and [`memory::MemoryStore`] for tests and offline use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use finvox_core::error::Result;
use finvox_core::session::{NewTurn, Session, TurnRecord};

pub mod feed;
pub mod memory;
pub mod realtime;
pub mod rest;

pub use feed::TranscriptFeed;
pub use memory::MemoryStore;
pub use rest::RestStore;

/// Live subscription to turns inserted for one session.
///
/// Dropping the subscription tears down the underlying channel.
pub struct TurnSubscription {
    rx: mpsc::UnboundedReceiver<TurnRecord>,
    cancel: CancellationToken,
}

impl TurnSubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<TurnRecord>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Receive the next inserted turn. `None` once the channel has ended.
    pub async fn recv(&mut self) -> Option<TurnRecord> {
        self.rx.recv().await
    }
}

impl Drop for TurnSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Append/query persistence plus realtime push of new turns.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Open a new session record.
    async fn create_session(&self) -> Result<Session>;

    /// Close a session: set its end timestamp and total duration in seconds.
    async fn update_session(
        &self,
        id: &str,
        ended_at: DateTime<Utc>,
        session_duration: i64,
    ) -> Result<()>;

    /// Append one turn.
    async fn insert_turn(&self, turn: NewTurn) -> Result<()>;

    /// All turns for a session, ordered by `created_at` ascending.
    async fn query_turns(&self, session_id: &str) -> Result<Vec<TurnRecord>>;

    /// Subscribe to turns inserted for `session_id` from now on.
    async fn subscribe_inserts(&self, session_id: &str) -> Result<TurnSubscription>;
}
