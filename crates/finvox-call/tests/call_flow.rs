//! End-to-end call flow tests with instrumented fake backends.
//!
//! The fakes track when capture and playback are live so every test doubles
//! as a check that the two are never active at the same time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use finvox_call::{CallContext, CallEvent, CallHandle, CallSession, GREETING};
use finvox_core::config::{RecognitionConfig, SynthesisConfig};
use finvox_core::error::{FinVoxError, Result};
use finvox_core::session::{CallPhase, ContextMessage, NewTurn, Role, TurnRecord};
use finvox_inference::ReplyProvider;
use finvox_store::{MemoryStore, TranscriptStore, TurnSubscription};
use finvox_voice::{
    AudioSink, CaptureAdapter, LocalSynthesis, PlaybackAdapter, RecognitionBackend, Utterance,
    VoiceInfo,
};

const CAPTURE_TIME: Duration = Duration::from_millis(30);
const SPEAK_TIME: Duration = Duration::from_millis(40);

/// Shared instrumentation: an ordered activity log plus live flags used to
/// detect capture/playback overlap.
#[derive(Default)]
struct Probe {
    log: Mutex<Vec<String>>,
    listening: AtomicBool,
    speaking: AtomicBool,
    violations: Mutex<Vec<String>>,
}

impl Probe {
    fn record(&self, entry: &str) {
        self.log.lock().unwrap().push(entry.to_string());
    }

    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn violations(&self) -> Vec<String> {
        self.violations.lock().unwrap().clone()
    }

    fn begin_listening(&self) {
        if self.speaking.load(Ordering::SeqCst) {
            self.violations
                .lock()
                .unwrap()
                .push("capture started while playback active".into());
        }
        self.listening.store(true, Ordering::SeqCst);
        self.record("capture:start");
    }

    fn end_listening(&self) {
        self.listening.store(false, Ordering::SeqCst);
        self.record("capture:end");
    }

    fn begin_speaking(&self) {
        if self.listening.load(Ordering::SeqCst) {
            self.violations
                .lock()
                .unwrap()
                .push("playback started while capture active".into());
        }
        self.speaking.store(true, Ordering::SeqCst);
        self.record("speak:start");
    }

    fn end_speaking(&self, cancelled: bool) {
        self.speaking.store(false, Ordering::SeqCst);
        self.record(if cancelled {
            "speak:cancelled"
        } else {
            "speak:done"
        });
    }
}

/// Clears the listening flag even when the capture future is dropped by
/// cancellation.
struct ListenGuard(Arc<Probe>);

impl Drop for ListenGuard {
    fn drop(&mut self) {
        self.0.end_listening();
    }
}

/// Scripted recognizer: yields queued transcripts in order; hangs once the
/// queue is empty (like a microphone hearing silence).
struct FakeRecognizer {
    probe: Arc<Probe>,
    transcripts: Mutex<VecDeque<String>>,
}

#[async_trait]
impl RecognitionBackend for FakeRecognizer {
    fn is_available(&self) -> bool {
        true
    }

    async fn recognize_once(&self, _locale: &str) -> anyhow::Result<String> {
        self.probe.begin_listening();
        let _guard = ListenGuard(self.probe.clone());
        tokio::time::sleep(CAPTURE_TIME).await;
        let next = self.transcripts.lock().unwrap().pop_front();
        match next {
            Some(text) => Ok(text),
            None => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

struct FakeVoice {
    probe: Arc<Probe>,
    utterances: Mutex<Vec<Utterance>>,
}

#[async_trait]
impl LocalSynthesis for FakeVoice {
    fn voices(&self) -> Vec<VoiceInfo> {
        vec![VoiceInfo {
            name: "Samantha (Enhanced)".into(),
            lang: "en-US".into(),
        }]
    }

    async fn speak(
        &self,
        utterance: &Utterance,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        self.probe.begin_speaking();
        self.utterances.lock().unwrap().push(utterance.clone());
        tokio::select! {
            _ = cancel.cancelled() => self.probe.end_speaking(true),
            _ = tokio::time::sleep(SPEAK_TIME) => self.probe.end_speaking(false),
        }
        Ok(())
    }
}

/// The remote synthesis path is never taken in these tests (no API key), so
/// the sink only has to exist.
struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, _audio: Vec<u8>, _cancel: CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }
}

struct InferenceCall {
    user_text: String,
    history: Vec<ContextMessage>,
    /// Turns persisted at the moment the request went out.
    turns_persisted: usize,
}

struct FakeInference {
    probe: Arc<Probe>,
    store: Arc<MemoryStore>,
    reply: String,
    delay: Duration,
    calls: Mutex<Vec<InferenceCall>>,
}

#[async_trait]
impl ReplyProvider for FakeInference {
    async fn get_reply(&self, user_text: &str, history: &[ContextMessage]) -> String {
        self.probe.record("inference:start");
        self.calls.lock().unwrap().push(InferenceCall {
            user_text: user_text.to_string(),
            history: history.to_vec(),
            turns_persisted: self.store.turn_count(),
        });
        tokio::time::sleep(self.delay).await;
        self.probe.record("inference:done");
        self.reply.clone()
    }
}

/// Store that rejects session creation, for start-failure scenarios.
struct FailingStore;

#[async_trait]
impl TranscriptStore for FailingStore {
    async fn create_session(&self) -> Result<finvox_core::session::Session> {
        Err(FinVoxError::SessionCreate("simulated outage".into()))
    }

    async fn update_session(&self, _id: &str, _ended_at: DateTime<Utc>, _: i64) -> Result<()> {
        Err(FinVoxError::Store("store offline".into()))
    }

    async fn insert_turn(&self, _turn: NewTurn) -> Result<()> {
        Err(FinVoxError::Store("store offline".into()))
    }

    async fn query_turns(&self, _session_id: &str) -> Result<Vec<TurnRecord>> {
        Err(FinVoxError::Store("store offline".into()))
    }

    async fn subscribe_inserts(&self, _session_id: &str) -> Result<TurnSubscription> {
        Err(FinVoxError::Store("store offline".into()))
    }
}

struct Harness {
    handle: CallHandle,
    events: mpsc::UnboundedReceiver<CallEvent>,
    probe: Arc<Probe>,
    store: Arc<MemoryStore>,
    inference: Arc<FakeInference>,
    voice: Arc<FakeVoice>,
}

fn start_harness(
    transcripts: &[&str],
    reply: &str,
    inference_delay: Duration,
    store_override: Option<Arc<dyn TranscriptStore>>,
) -> Harness {
    let probe = Arc::new(Probe::default());
    let store = Arc::new(MemoryStore::new());

    let recognizer = Arc::new(FakeRecognizer {
        probe: probe.clone(),
        transcripts: Mutex::new(transcripts.iter().map(|s| s.to_string()).collect()),
    });
    let voice = Arc::new(FakeVoice {
        probe: probe.clone(),
        utterances: Mutex::new(Vec::new()),
    });
    let inference = Arc::new(FakeInference {
        probe: probe.clone(),
        store: store.clone(),
        reply: reply.to_string(),
        delay: inference_delay,
        calls: Mutex::new(Vec::new()),
    });

    let ctx = CallContext {
        store: store_override.unwrap_or_else(|| store.clone()),
        inference: inference.clone(),
        capture: CaptureAdapter::new(recognizer, &RecognitionConfig::default()),
        playback: PlaybackAdapter::new(
            Arc::new(NullSink),
            voice.clone(),
            &SynthesisConfig::default(),
        ),
    };

    let (handle, events) = CallSession::start(ctx);
    Harness {
        handle,
        events,
        probe,
        store,
        inference,
        voice,
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<CallEvent>) -> CallEvent {
    tokio::time::timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("timed out waiting for call event")
        .expect("event channel closed")
}

async fn wait_for_phase(events: &mut mpsc::UnboundedReceiver<CallEvent>, phase: CallPhase) {
    loop {
        if let CallEvent::PhaseChanged { phase: seen } = next_event(events).await {
            if seen == phase {
                return;
            }
        }
    }
}

async fn wait_for_session_started(events: &mut mpsc::UnboundedReceiver<CallEvent>) -> String {
    loop {
        if let CallEvent::SessionStarted { session_id } = next_event(events).await {
            return session_id;
        }
    }
}

async fn wait_for_status(events: &mut mpsc::UnboundedReceiver<CallEvent>, needle: &str) {
    loop {
        if let CallEvent::Status { text } = next_event(events).await {
            if text.contains(needle) {
                return;
            }
        }
    }
}

async fn expect_no_events(events: &mut mpsc::UnboundedReceiver<CallEvent>) {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(
        matches!(events.try_recv(), Err(mpsc::error::TryRecvError::Empty)),
        "expected no further events"
    );
}

#[tokio::test(start_paused = true)]
async fn test_full_exchange_flow() {
    let mut h = start_harness(
        &["What is EBITDA?"],
        "Great question! EBITDA is earnings before interest, taxes, depreciation, and amortization.",
        Duration::from_millis(20),
        None,
    );

    h.handle.start_call();
    let session_id = wait_for_session_started(&mut h.events).await;

    // Greeting: speaking, then back to ready.
    wait_for_phase(&mut h.events, CallPhase::Speaking).await;
    wait_for_phase(&mut h.events, CallPhase::Ready).await;

    let turns = h.store.query_turns(&session_id).await.unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].role, Role::Assistant);
    assert_eq!(turns[0].content, GREETING);

    h.handle.toggle_listening();
    wait_for_phase(&mut h.events, CallPhase::Listening).await;
    wait_for_phase(&mut h.events, CallPhase::Speaking).await;
    wait_for_phase(&mut h.events, CallPhase::Ready).await;
    assert_eq!(h.handle.phase(), CallPhase::Ready);

    // Inference saw history = [greeting] plus the user text separately, and
    // the user turn was persisted before the request went out.
    {
        let calls = h.inference.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].user_text, "What is EBITDA?");
        assert_eq!(calls[0].history.len(), 1);
        assert_eq!(calls[0].history[0].role, Role::Assistant);
        assert_eq!(calls[0].history[0].content, GREETING);
        assert_eq!(calls[0].turns_persisted, 2);
    }

    // Persisted sequence matches emission order exactly.
    let turns = h.store.query_turns(&session_id).await.unwrap();
    let expected: Vec<(Role, bool)> = vec![
        (Role::Assistant, true),
        (Role::User, false),
        (Role::Assistant, false),
    ];
    assert_eq!(turns.len(), expected.len());
    for (turn, (role, is_greeting)) in turns.iter().zip(expected) {
        assert_eq!(turn.role, role);
        assert_eq!(turn.content == GREETING, is_greeting);
    }
    assert_eq!(turns[1].content, "What is EBITDA?");

    // Playback spoke the greeting and then exactly the reply text.
    {
        let utterances = h.voice.utterances.lock().unwrap();
        assert_eq!(utterances.len(), 2);
        assert_eq!(utterances[0].text, GREETING);
        assert!(utterances[1].text.starts_with("Great question!"));
    }

    assert!(h.probe.violations().is_empty(), "{:?}", h.probe.violations());
}

#[tokio::test(start_paused = true)]
async fn test_barge_in_cancels_playback_before_capture() {
    let mut h = start_harness(
        &["What about cash flow?"],
        "Cash flow is the movement of money in and out of the business.",
        Duration::from_millis(10),
        None,
    );

    h.handle.start_call();
    wait_for_phase(&mut h.events, CallPhase::Speaking).await;

    // Barge in while the greeting is playing.
    h.handle.toggle_listening();
    wait_for_phase(&mut h.events, CallPhase::Listening).await;
    wait_for_phase(&mut h.events, CallPhase::Speaking).await;
    wait_for_phase(&mut h.events, CallPhase::Ready).await;

    let log = h.probe.entries();
    let cancelled = log
        .iter()
        .position(|e| e == "speak:cancelled")
        .expect("greeting playback was never cancelled");
    let captured = log
        .iter()
        .position(|e| e == "capture:start")
        .expect("capture never started");
    assert!(
        cancelled < captured,
        "playback must be cancelled strictly before capture starts: {log:?}"
    );
    assert!(h.probe.violations().is_empty(), "{:?}", h.probe.violations());
}

#[tokio::test(start_paused = true)]
async fn test_mute_skips_audio_without_new_turn() {
    let mut h = start_harness(&[], "unused", Duration::from_millis(10), None);

    h.handle.start_call();
    let session_id = wait_for_session_started(&mut h.events).await;
    wait_for_phase(&mut h.events, CallPhase::Speaking).await;

    h.handle.toggle_speaking();
    wait_for_phase(&mut h.events, CallPhase::Ready).await;
    assert_eq!(h.handle.phase(), CallPhase::Ready);

    assert!(h.probe.entries().iter().any(|e| e == "speak:cancelled"));
    // Only the greeting exists; the mute created nothing.
    let turns = h.store.query_turns(&session_id).await.unwrap();
    assert_eq!(turns.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_end_call_from_ready() {
    let mut h = start_harness(&[], "unused", Duration::from_millis(10), None);

    h.handle.start_call();
    let session_id = wait_for_session_started(&mut h.events).await;
    wait_for_phase(&mut h.events, CallPhase::Speaking).await;
    wait_for_phase(&mut h.events, CallPhase::Ready).await;

    h.handle.end_call();
    wait_for_phase(&mut h.events, CallPhase::Idle).await;
    assert_eq!(h.handle.phase(), CallPhase::Idle);

    let session = h.store.session(&session_id).unwrap();
    assert!(session.ended_at.is_some());
    assert!(session.session_duration.is_some());

    // Ending again is a no-op.
    h.handle.end_call();
    expect_no_events(&mut h.events).await;
}

#[tokio::test(start_paused = true)]
async fn test_end_call_from_listening() {
    // Empty script: capture hangs until cancelled.
    let mut h = start_harness(&[], "unused", Duration::from_millis(10), None);

    h.handle.start_call();
    wait_for_phase(&mut h.events, CallPhase::Speaking).await;
    wait_for_phase(&mut h.events, CallPhase::Ready).await;

    h.handle.toggle_listening();
    wait_for_phase(&mut h.events, CallPhase::Listening).await;

    h.handle.end_call();
    wait_for_phase(&mut h.events, CallPhase::Idle).await;

    // The hanging capture was cancelled on the way down.
    assert!(h.probe.entries().iter().any(|e| e == "capture:end"));
    assert!(h.probe.violations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_end_call_from_processing_drops_request() {
    let mut h = start_harness(
        &["What is working capital?"],
        "unused",
        Duration::from_secs(3600), // inference never finishes on its own
        None,
    );

    h.handle.start_call();
    let session_id = wait_for_session_started(&mut h.events).await;
    wait_for_phase(&mut h.events, CallPhase::Speaking).await;
    wait_for_phase(&mut h.events, CallPhase::Ready).await;

    h.handle.toggle_listening();
    wait_for_phase(&mut h.events, CallPhase::Processing).await;

    h.handle.end_call();
    wait_for_phase(&mut h.events, CallPhase::Idle).await;
    assert_eq!(h.handle.phase(), CallPhase::Idle);

    // The user turn made it to the store before the request; no assistant
    // reply ever did.
    let turns = h.store.query_turns(&session_id).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].role, Role::User);
    assert_eq!(h.inference.calls.lock().unwrap().len(), 1);
    assert!(!h.probe.entries().iter().any(|e| e == "inference:done"));
}

#[tokio::test(start_paused = true)]
async fn test_end_call_from_speaking() {
    let mut h = start_harness(
        &["What is EBITDA?"],
        "A long answer that gets cut off.",
        Duration::from_millis(10),
        None,
    );

    h.handle.start_call();
    wait_for_phase(&mut h.events, CallPhase::Speaking).await;
    wait_for_phase(&mut h.events, CallPhase::Ready).await;

    h.handle.toggle_listening();
    // Wait until the reply is being spoken.
    wait_for_phase(&mut h.events, CallPhase::Speaking).await;

    h.handle.end_call();
    wait_for_phase(&mut h.events, CallPhase::Idle).await;

    let log = h.probe.entries();
    assert_eq!(log.last().map(String::as_str), Some("speak:cancelled"));
    assert!(h.probe.violations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_session_create_stays_idle() {
    let mut h = start_harness(
        &["unused"],
        "unused",
        Duration::from_millis(10),
        Some(Arc::new(FailingStore)),
    );

    h.handle.start_call();
    wait_for_status(&mut h.events, "Failed to start session").await;
    assert_eq!(h.handle.phase(), CallPhase::Idle);

    // No session artifacts: ending is a no-op and nothing was captured or
    // spoken.
    h.handle.end_call();
    expect_no_events(&mut h.events).await;
    assert!(h.probe.entries().is_empty());
    assert_eq!(h.store.turn_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_toggle_storm_never_overlaps_capture_and_playback() {
    let mut h = start_harness(
        &["one", "two", "three"],
        "Short reply.",
        Duration::from_millis(5),
        None,
    );

    h.handle.start_call();
    wait_for_phase(&mut h.events, CallPhase::Speaking).await;

    // Hammer the controls across greeting, capture, and replies.
    h.handle.toggle_listening(); // barge-in
    wait_for_phase(&mut h.events, CallPhase::Listening).await;
    h.handle.toggle_listening(); // abort capture
    wait_for_phase(&mut h.events, CallPhase::Ready).await;
    h.handle.toggle_listening();
    wait_for_phase(&mut h.events, CallPhase::Speaking).await;
    h.handle.toggle_speaking(); // mute the reply
    wait_for_phase(&mut h.events, CallPhase::Ready).await;
    h.handle.toggle_listening();
    wait_for_phase(&mut h.events, CallPhase::Speaking).await;
    h.handle.toggle_listening(); // barge-in over the reply
    wait_for_phase(&mut h.events, CallPhase::Listening).await;

    h.handle.end_call();
    let mut phases = h.handle.phase_changes();
    phases
        .wait_for(|phase| *phase == CallPhase::Idle)
        .await
        .unwrap();

    assert!(h.probe.violations().is_empty(), "{:?}", h.probe.violations());
}
