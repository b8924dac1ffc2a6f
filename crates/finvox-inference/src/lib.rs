//! Inference client — turns a user question plus conversation context into a
//! tutoring reply, substituting a fixed fallback when the endpoint fails.

use async_trait::async_trait;

use finvox_core::session::ContextMessage;

pub mod chat;
pub mod prompt;

pub use chat::ChatInference;
pub use prompt::{FALLBACK_REPLY, SYSTEM_PROMPT};

/// Produces one reply per user turn. Implementations never raise: any
/// endpoint failure must be absorbed into a usable reply so turn-taking
/// always completes.
#[async_trait]
pub trait ReplyProvider: Send + Sync {
    /// Reply to `user_text` given the turns emitted so far (in order, not
    /// including the new user turn).
    async fn get_reply(&self, user_text: &str, history: &[ContextMessage]) -> String;
}
