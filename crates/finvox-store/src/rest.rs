//! REST rows client for the hosted data platform (PostgREST dialect).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use finvox_core::config::StoreConfig;
use finvox_core::error::{FinVoxError, Result};
use finvox_core::session::{NewTurn, Session, TurnRecord};

use crate::realtime;
use crate::{TranscriptStore, TurnSubscription};

/// Transcript store backed by the hosted platform's rows API.
///
/// Row access goes through `<base>/rest/v1/<table>`; realtime inserts come
/// from the platform's websocket channel (see [`realtime`]).
pub struct RestStore {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl RestStore {
    /// Build a store from config. Fails when no API key is resolvable.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| FinVoxError::Store("No store API key configured".into()))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        })
    }

    fn rows_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(FinVoxError::Store(format!("rows API error {status}: {body}")));
        }
        Ok(resp)
    }
}

#[async_trait]
impl TranscriptStore for RestStore {
    async fn create_session(&self) -> Result<Session> {
        let resp = self
            .authed(self.client.post(self.rows_url("sessions")))
            .header("Prefer", "return=representation")
            .json(&json!({ "created_at": Utc::now() }))
            .send()
            .await?;

        let resp = Self::check(resp)
            .await
            .map_err(|e| FinVoxError::SessionCreate(e.to_string()))?;

        let mut rows: Vec<Session> = resp.json().await?;
        let session = rows
            .pop()
            .ok_or_else(|| FinVoxError::SessionCreate("insert returned no row".into()))?;

        debug!(session_id = %session.id, "Created session");
        Ok(session)
    }

    async fn update_session(
        &self,
        id: &str,
        ended_at: DateTime<Utc>,
        session_duration: i64,
    ) -> Result<()> {
        let url = format!("{}?id=eq.{id}", self.rows_url("sessions"));
        let resp = self
            .authed(self.client.patch(&url))
            .json(&json!({
                "ended_at": ended_at,
                "session_duration": session_duration,
            }))
            .send()
            .await?;

        Self::check(resp).await?;
        debug!(session_id = %id, session_duration, "Closed session");
        Ok(())
    }

    async fn insert_turn(&self, turn: NewTurn) -> Result<()> {
        let resp = self
            .authed(self.client.post(self.rows_url("messages")))
            .header("Prefer", "return=minimal")
            .json(&turn)
            .send()
            .await?;

        Self::check(resp).await?;
        debug!(session_id = %turn.session_id, role = turn.role.as_str(), "Inserted turn");
        Ok(())
    }

    async fn query_turns(&self, session_id: &str) -> Result<Vec<TurnRecord>> {
        let url = format!(
            "{}?select=*&session_id=eq.{session_id}&order=created_at.asc",
            self.rows_url("messages")
        );
        let resp = self.authed(self.client.get(&url)).send().await?;
        let resp = Self::check(resp).await?;
        Ok(resp.json().await?)
    }

    async fn subscribe_inserts(&self, session_id: &str) -> Result<TurnSubscription> {
        realtime::subscribe(&self.base_url, &self.api_key, session_id)
    }
}
