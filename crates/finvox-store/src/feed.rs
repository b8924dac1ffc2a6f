//! Live transcript feed — initial query plus realtime follow of one session.

use finvox_core::error::Result;
use finvox_core::session::TurnRecord;

use crate::{TranscriptStore, TurnSubscription};

/// A session's persisted turns plus a stream of subsequent inserts, for a
/// review surface to render.
pub struct TranscriptFeed {
    history: Vec<TurnRecord>,
    subscription: TurnSubscription,
}

impl TranscriptFeed {
    /// Load the turns persisted so far and start following new inserts.
    ///
    /// The subscription is opened before the query so no insert falls in the
    /// gap between them; an insert landing in that window may therefore show
    /// up both in `history` and from `next` — consumers key turns by id.
    pub async fn follow(store: &dyn TranscriptStore, session_id: &str) -> Result<Self> {
        let subscription = store.subscribe_inserts(session_id).await?;
        let history = store.query_turns(session_id).await?;
        Ok(Self {
            history,
            subscription,
        })
    }

    /// Turns already persisted when the feed was opened.
    pub fn history(&self) -> &[TurnRecord] {
        &self.history
    }

    /// The next turn inserted after the feed was opened.
    pub async fn next(&mut self) -> Option<TurnRecord> {
        self.subscription.recv().await
    }
}
