//! Speech capture adapter — single-shot recognition with cooperative cancel.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use finvox_core::config::RecognitionConfig;
use finvox_core::error::{FinVoxError, Result};

/// Platform speech-to-text capability.
#[async_trait]
pub trait RecognitionBackend: Send + Sync {
    /// Whether the platform offers speech recognition at all.
    fn is_available(&self) -> bool;

    /// Run one capture attempt, suspending until a single finalized
    /// transcript. No interim results are produced.
    async fn recognize_once(&self, locale: &str) -> anyhow::Result<String>;
}

/// Single-shot speech capture over a [`RecognitionBackend`].
///
/// At most one capture may be in progress per adapter instance.
pub struct CaptureAdapter {
    backend: Arc<dyn RecognitionBackend>,
    locale: String,
    active: Mutex<Option<CancellationToken>>,
}

/// Clears the active slot even when the `listen` future is dropped mid-way.
struct ActiveGuard<'a>(&'a Mutex<Option<CancellationToken>>);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap() = None;
    }
}

impl CaptureAdapter {
    pub fn new(backend: Arc<dyn RecognitionBackend>, config: &RecognitionConfig) -> Self {
        Self {
            backend,
            locale: config.locale.clone(),
            active: Mutex::new(None),
        }
    }

    /// Whether capture can be used at all. Callers must check before the
    /// first [`listen`](Self::listen).
    pub fn is_supported(&self) -> bool {
        self.backend.is_available()
    }

    /// Run one capture attempt.
    ///
    /// Resolves to `Some(transcript)` on a finalized result, or `None` when
    /// [`stop`](Self::stop) cancelled the attempt — no transcript is
    /// delivered after cancellation.
    pub async fn listen(&self) -> Result<Option<String>> {
        if !self.is_supported() {
            return Err(FinVoxError::UnsupportedCapability);
        }

        let cancel = CancellationToken::new();
        {
            let mut active = self.active.lock().unwrap();
            if active.is_some() {
                return Err(FinVoxError::CaptureBusy);
            }
            *active = Some(cancel.clone());
        }
        let _guard = ActiveGuard(&self.active);

        debug!(locale = %self.locale, "Capture started");
        // Biased: once stop() has fired, no transcript is delivered even if
        // one finalized in the same instant.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Capture cancelled");
                Ok(None)
            }
            transcript = self.backend.recognize_once(&self.locale) => match transcript {
                Ok(text) => {
                    debug!(chars = text.len(), "Capture finalized");
                    Ok(Some(text))
                }
                Err(e) => Err(FinVoxError::Capture(e.to_string())),
            },
        }
    }

    /// Cancel an in-progress capture. No-op when idle.
    pub fn stop(&self) {
        if let Some(cancel) = self.active.lock().unwrap().take() {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct ScriptedRecognizer {
        text: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl RecognitionBackend for ScriptedRecognizer {
        fn is_available(&self) -> bool {
            true
        }

        async fn recognize_once(&self, _locale: &str) -> anyhow::Result<String> {
            tokio::time::sleep(self.delay).await;
            Ok(self.text.to_string())
        }
    }

    struct NoRecognizer;

    #[async_trait]
    impl RecognitionBackend for NoRecognizer {
        fn is_available(&self) -> bool {
            false
        }

        async fn recognize_once(&self, _locale: &str) -> anyhow::Result<String> {
            unreachable!("unavailable backend must not be invoked")
        }
    }

    fn adapter(backend: Arc<dyn RecognitionBackend>) -> CaptureAdapter {
        CaptureAdapter::new(backend, &RecognitionConfig::default())
    }

    #[tokio::test]
    async fn test_single_shot_transcript() {
        let capture = adapter(Arc::new(ScriptedRecognizer {
            text: "What is EBITDA?",
            delay: Duration::from_millis(5),
        }));
        let result = capture.listen().await.unwrap();
        assert_eq!(result.as_deref(), Some("What is EBITDA?"));
    }

    #[tokio::test]
    async fn test_stop_cancels_without_transcript() {
        let capture = Arc::new(adapter(Arc::new(ScriptedRecognizer {
            text: "never delivered",
            delay: Duration::from_secs(60),
        })));

        let listener = {
            let capture = capture.clone();
            tokio::spawn(async move { capture.listen().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        capture.stop();

        let result = listener.await.unwrap().unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_second_listen_is_busy() {
        let capture = Arc::new(adapter(Arc::new(ScriptedRecognizer {
            text: "slow",
            delay: Duration::from_secs(60),
        })));

        let first = {
            let capture = capture.clone();
            tokio::spawn(async move { capture.listen().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(
            capture.listen().await,
            Err(FinVoxError::CaptureBusy)
        ));

        capture.stop();
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let capture = adapter(Arc::new(ScriptedRecognizer {
            text: "hello",
            delay: Duration::from_millis(1),
        }));
        capture.stop();
        // Still usable after the no-op stop.
        let result = capture.listen().await.unwrap();
        assert_eq!(result.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_unsupported_backend() {
        let capture = adapter(Arc::new(NoRecognizer));
        assert!(!capture.is_supported());
        assert!(matches!(
            capture.listen().await,
            Err(FinVoxError::UnsupportedCapability)
        ));
    }
}
