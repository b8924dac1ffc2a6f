//! Voice adapters — speech capture and synthesis playback.

pub mod capture;
pub mod playback;

pub use capture::{CaptureAdapter, RecognitionBackend};
pub use playback::{AudioSink, LocalSynthesis, PlaybackAdapter, Utterance, VoiceInfo};
