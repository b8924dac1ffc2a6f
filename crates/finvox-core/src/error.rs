use thiserror::Error;

#[derive(Debug, Error)]
pub enum FinVoxError {
    /// The platform offers no speech recognition or synthesis facility.
    #[error("Speech capability not supported on this platform")]
    UnsupportedCapability,

    #[error("Session create failed: {0}")]
    SessionCreate(String),

    /// A capture attempt was started while one was already in progress.
    #[error("Capture already in progress")]
    CaptureBusy,

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FinVoxError>;
