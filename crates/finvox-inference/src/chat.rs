//! Chat Completions client for the remote inference endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

use finvox_core::config::InferenceConfig;
use finvox_core::session::ContextMessage;

use crate::prompt::{FALLBACK_REPLY, SYSTEM_PROMPT};
use crate::ReplyProvider;

const INFERENCE_BASE_URL: &str = "https://api.openai.com";

/// Non-streaming chat-completion client with the tutoring persona baked in.
pub struct ChatInference {
    config: InferenceConfig,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Assemble the request message list: persona, then the history in order,
/// then the new user turn.
fn build_messages(user_text: &str, history: &[ContextMessage]) -> Vec<serde_json::Value> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(json!({ "role": "system", "content": SYSTEM_PROMPT }));
    for msg in history {
        messages.push(json!({ "role": msg.role.as_str(), "content": msg.content }));
    }
    messages.push(json!({ "role": "user", "content": user_text }));
    messages
}

impl ChatInference {
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(INFERENCE_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            config: config.clone(),
            client: reqwest::Client::new(),
        }
    }

    async fn request_reply(
        &self,
        user_text: &str,
        history: &[ContextMessage],
    ) -> anyhow::Result<String> {
        let api_key = self
            .config
            .resolve_api_key()
            .ok_or_else(|| anyhow::anyhow!("no inference API key configured"))?;

        let body = ChatRequest {
            model: self.config.model.clone(),
            messages: build_messages(user_text, history),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        debug!(
            model = %body.model,
            history_len = history.len(),
            "Requesting chat completion"
        );

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("inference API error {status}: {body}");
        }

        let parsed: ChatResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("inference response had no choices"))
    }
}

#[async_trait]
impl ReplyProvider for ChatInference {
    async fn get_reply(&self, user_text: &str, history: &[ContextMessage]) -> String {
        match self.request_reply(user_text, history).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(%e, "Inference failed, using fallback reply");
                FALLBACK_REPLY.to_string()
            }
        }
    }
}
