//! Configuration for the voice pipeline and its remote collaborators.

use serde::{Deserialize, Serialize};

/// Top-level FinVox configuration, constructed by the embedding application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub recognition: RecognitionConfig,

    #[serde(default)]
    pub synthesis: SynthesisConfig,

    #[serde(default)]
    pub inference: InferenceConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

/// Platform speech-recognition configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Recognition locale (default: "en-US").
    #[serde(default = "default_locale")]
    pub locale: String,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            locale: default_locale(),
        }
    }
}

fn default_locale() -> String {
    "en-US".into()
}

/// Remote speech-synthesis configuration (preferred playback path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Synthesis model (default: "tts-1").
    #[serde(default = "default_synthesis_model")]
    pub model: String,

    /// Voice id (default: "alloy").
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Playback speed multiplier (default: 1.0).
    #[serde(default = "default_speed")]
    pub speed: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Endpoint base URL override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            model: default_synthesis_model(),
            voice: default_voice(),
            speed: default_speed(),
            api_key: None,
            api_key_env: None,
            base_url: None,
        }
    }
}

impl SynthesisConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

fn default_synthesis_model() -> String {
    "tts-1".into()
}

fn default_voice() -> String {
    "alloy".into()
}

fn default_speed() -> f64 {
    1.0
}

/// Chat-completion endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Model identifier (default: "gpt-4o-mini").
    #[serde(default = "default_inference_model")]
    pub model: String,

    /// Sampling temperature (default: 0.7).
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Soft response-length cap in output tokens (default: 300).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Endpoint base URL override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model: default_inference_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            api_key: None,
            api_key_env: None,
            base_url: None,
        }
    }
}

impl InferenceConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

fn default_inference_model() -> String {
    "gpt-4o-mini".into()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    300
}

/// Hosted data platform configuration (transcript persistence + realtime).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Platform project URL, e.g. `https://xyz.example.co`.
    #[serde(default)]
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl StoreConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Resolve a secret from a direct value or a named environment variable,
/// preferring the direct value. Empty strings count as unset.
fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}
