//! Speech playback adapter — remote synthesis preferred, local voice fallback.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use finvox_core::config::SynthesisConfig;

const SYNTHESIS_BASE_URL: &str = "https://api.openai.com";

/// Speaking rate for the local path, slightly below normal for clarity.
const LOCAL_RATE: f32 = 0.95;

/// Audio output device for remotely synthesized buffers.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Decode and play one audio buffer, suspending until playback completes
    /// or `cancel` fires. Halting on cancel is not an error.
    async fn play(&self, audio: Vec<u8>, cancel: CancellationToken) -> anyhow::Result<()>;
}

/// On-device utterance synthesis, the fallback path.
#[async_trait]
pub trait LocalSynthesis: Send + Sync {
    /// Voices the platform offers, in platform order.
    fn voices(&self) -> Vec<VoiceInfo>;

    /// Speak one utterance, suspending until playback completes or `cancel`
    /// fires. Cancellation drops the pending utterance queue.
    async fn speak(&self, utterance: &Utterance, cancel: CancellationToken)
        -> anyhow::Result<()>;
}

/// A local voice as reported by the platform.
#[derive(Debug, Clone)]
pub struct VoiceInfo {
    pub name: String,
    pub lang: String,
}

/// One utterance for the local synthesis queue.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub text: String,
    /// Platform voice name; `None` selects the platform default.
    pub voice: Option<String>,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

/// Pick the local voice to speak with, in preference order: a name that
/// signals higher quality, else an en-US voice, else any voice at all.
/// `None` leaves the platform default in place.
pub fn preferred_voice(voices: &[VoiceInfo]) -> Option<&VoiceInfo> {
    voices
        .iter()
        .find(|v| v.name.contains("Premium") || v.name.contains("Enhanced"))
        .or_else(|| voices.iter().find(|v| v.lang == "en-US"))
        .or_else(|| voices.first())
}

/// Plays one utterance at a time: remote synthesis when configured and
/// reachable, the local voice otherwise. [`speak`](PlaybackAdapter::speak)
/// never propagates a synthesis failure to the caller.
pub struct PlaybackAdapter {
    config: SynthesisConfig,
    client: reqwest::Client,
    sink: Arc<dyn AudioSink>,
    local: Arc<dyn LocalSynthesis>,
    current: Mutex<Option<CancellationToken>>,
}

impl PlaybackAdapter {
    pub fn new(
        sink: Arc<dyn AudioSink>,
        local: Arc<dyn LocalSynthesis>,
        config: &SynthesisConfig,
    ) -> Self {
        Self {
            config: config.clone(),
            client: reqwest::Client::new(),
            sink,
            local,
            current: Mutex::new(None),
        }
    }

    /// Speak `text`, suspending until playback completes or is cancelled.
    ///
    /// Remote failures fall back to the local voice; a local failure is
    /// logged and swallowed, so the call always resolves.
    pub async fn speak(&self, text: &str) {
        // Starting a new utterance supersedes whatever was playing.
        self.stop_speaking();

        let cancel = CancellationToken::new();
        *self.current.lock().unwrap() = Some(cancel.clone());

        // Remote synthesis only when a key is configured; otherwise the
        // local voice is the primary path.
        if let Some(api_key) = self.config.resolve_api_key() {
            match self.speak_remote(text, &api_key, cancel.clone()).await {
                Ok(()) => return,
                Err(_) if cancel.is_cancelled() => return,
                Err(e) => {
                    warn!(%e, "Remote synthesis failed, falling back to local voice");
                }
            }
        }

        if let Err(e) = self.speak_local(text, cancel.clone()).await {
            if !cancel.is_cancelled() {
                error!(%e, "Local synthesis failed");
            }
        }
        // The slot may keep the token of a finished utterance; cancelling a
        // completed token is a no-op, so stop_speaking stays safe when idle.
    }

    async fn speak_remote(
        &self,
        text: &str,
        api_key: &str,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(SYNTHESIS_BASE_URL)
            .trim_end_matches('/');

        let resp = self
            .client
            .post(format!("{base}/v1/audio/speech"))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&json!({
                "model": self.config.model,
                "voice": self.config.voice,
                "input": text,
                "speed": self.config.speed,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("synthesis API error {status}: {body}");
        }

        let audio = resp.bytes().await?.to_vec();
        debug!(bytes = audio.len(), "Playing remote synthesis audio");
        self.sink.play(audio, cancel).await
    }

    async fn speak_local(&self, text: &str, cancel: CancellationToken) -> anyhow::Result<()> {
        let voices = self.local.voices();
        let utterance = Utterance {
            text: text.to_string(),
            voice: preferred_voice(&voices).map(|v| v.name.clone()),
            rate: LOCAL_RATE,
            pitch: 1.0,
            volume: 1.0,
        };
        debug!(voice = ?utterance.voice, "Speaking via local voice");
        self.local.speak(&utterance, cancel).await
    }

    /// Cancel whichever playback path is active. No-op when idle.
    pub fn stop_speaking(&self) {
        if let Some(cancel) = self.current.lock().unwrap().take() {
            cancel.cancel();
        }
    }
}
