//! The call session actor: one task owns all call state and drives the
//! adapters, so capture, inference, and playback are strictly sequential.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use finvox_core::session::{CallPhase, ContextMessage, NewTurn, Role};
use finvox_inference::ReplyProvider;
use finvox_store::TranscriptStore;
use finvox_voice::{CaptureAdapter, PlaybackAdapter};

use crate::{CallCommand, CallEvent};

/// Opening line spoken and persisted at the start of every call.
pub const GREETING: &str = "Hello! I'm your CFO tutor. Ask me anything about finance, accounting, cash flow, EBITDA, investments, or any other financial concept.";

/// Pause between session creation and the greeting, so the session-start cue
/// lands before the tutor starts talking.
const GREETING_DELAY: Duration = Duration::from_millis(500);

const STATUS_READY: &str = "Ready to start your CFO tutoring session";
const STATUS_ACTIVE: &str = "Call active - Tap the microphone to ask a question";
const STATUS_LISTENING: &str = "Listening...";
const STATUS_PROCESSING: &str = "Processing your question...";
const STATUS_SPEAKING: &str = "Speaking...";
const STATUS_ENDED: &str = "Call ended";
const STATUS_UNSUPPORTED: &str = "Voice features not supported on this device";
const STATUS_START_FAILED: &str = "Failed to start session";
const STATUS_CAPTURE_FAILED: &str = "Didn't catch that - tap the microphone to try again";

/// Collaborators the session drives, constructed once at startup and owned
/// by the actor for the lifetime of the task.
pub struct CallContext {
    pub store: Arc<dyn TranscriptStore>,
    pub inference: Arc<dyn ReplyProvider>,
    pub capture: CaptureAdapter,
    pub playback: PlaybackAdapter,
}

/// Handle for driving a call session from the embedding surface.
#[derive(Clone)]
pub struct CallHandle {
    cmd_tx: mpsc::UnboundedSender<CallCommand>,
    phase_rx: watch::Receiver<CallPhase>,
}

impl CallHandle {
    pub fn start_call(&self) {
        self.send(CallCommand::StartCall);
    }

    pub fn toggle_listening(&self) {
        self.send(CallCommand::ToggleListening);
    }

    /// Mute: skip the rest of the current reply. Only meaningful while
    /// speaking.
    pub fn toggle_speaking(&self) {
        self.send(CallCommand::ToggleSpeaking);
    }

    pub fn end_call(&self) {
        self.send(CallCommand::EndCall);
    }

    /// Current phase of the state machine.
    pub fn phase(&self) -> CallPhase {
        *self.phase_rx.borrow()
    }

    /// Watch channel following phase transitions.
    pub fn phase_changes(&self) -> watch::Receiver<CallPhase> {
        self.phase_rx.clone()
    }

    fn send(&self, cmd: CallCommand) {
        // The session task only goes away on shutdown; late gestures are fine
        // to drop.
        let _ = self.cmd_tx.send(cmd);
    }
}

/// State of the currently open call.
struct ActiveCall {
    session_id: String,
    started_at: Instant,
    /// Turns emitted so far in this call, in emission order. Supplied to
    /// inference; reset once per call start.
    context: Vec<ContextMessage>,
}

/// What the caller of a nested suspension should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Proceed with the normal sequence.
    Continue,
    /// Listening preempted playback; start capture now.
    BargeIn,
    /// Tear the call down (end requested or the handle went away).
    End,
}

/// Outcome of one capture attempt.
enum ListenOutcome {
    Captured(String),
    Aborted,
    Failed(String),
    End,
}

/// The call session state machine.
pub struct CallSession {
    ctx: CallContext,
    phase_tx: watch::Sender<CallPhase>,
    event_tx: mpsc::UnboundedSender<CallEvent>,
    active: Option<ActiveCall>,
}

impl CallSession {
    /// Start the session actor, returning a command handle and the event
    /// stream.
    pub fn start(ctx: CallContext) -> (CallHandle, mpsc::UnboundedReceiver<CallEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(CallPhase::Idle);

        let session = Self {
            ctx,
            phase_tx,
            event_tx,
            active: None,
        };

        tokio::spawn(async move {
            session.run(cmd_rx).await;
            debug!("Call session task ended");
        });

        (CallHandle { cmd_tx, phase_rx }, event_rx)
    }

    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<CallCommand>) {
        self.emit_status(STATUS_READY);

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                CallCommand::StartCall => self.handle_start(&mut cmd_rx).await,
                CallCommand::EndCall => self.teardown().await,
                CallCommand::ToggleListening if self.phase() == CallPhase::Ready => {
                    self.listen_and_respond(&mut cmd_rx).await;
                }
                other => {
                    debug!(?other, phase = ?self.phase(), "Ignoring command in current phase");
                }
            }
        }

        // Handle dropped: tear down adapters and close any open session.
        self.teardown().await;
    }

    async fn handle_start(&mut self, cmd_rx: &mut mpsc::UnboundedReceiver<CallCommand>) {
        if self.phase() != CallPhase::Idle {
            // One call at a time; the adapters are exclusively owned.
            debug!("Start requested while a call is active");
            return;
        }
        if !self.ctx.capture.is_supported() {
            self.emit_status(STATUS_UNSUPPORTED);
            return;
        }

        let session = match self.ctx.store.create_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!(%e, "Session create failed");
                self.emit_status(STATUS_START_FAILED);
                return;
            }
        };

        info!(session_id = %session.id, "Call started");
        self.active = Some(ActiveCall {
            session_id: session.id.clone(),
            started_at: Instant::now(),
            context: Vec::new(),
        });
        self.set_phase(CallPhase::Ready);
        self.emit(CallEvent::SessionStarted {
            session_id: session.id,
        });
        self.emit_status(STATUS_ACTIVE);

        // Greeting delay; gestures arriving now are still honored.
        let delay = tokio::time::sleep(GREETING_DELAY);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(CallCommand::EndCall) | None => {
                        self.teardown().await;
                        return;
                    }
                    Some(CallCommand::ToggleListening) => {
                        // Listening preempts the pending greeting.
                        self.listen_and_respond(cmd_rx).await;
                        return;
                    }
                    Some(other) => {
                        debug!(?other, "Ignoring command before greeting");
                    }
                }
            }
        }

        self.append_turn(Role::Assistant, GREETING).await;
        match self.speak_phase(GREETING, cmd_rx).await {
            Flow::Continue => {
                self.set_phase(CallPhase::Ready);
                self.emit_status(STATUS_ACTIVE);
            }
            Flow::BargeIn => self.listen_and_respond(cmd_rx).await,
            Flow::End => self.teardown().await,
        }
    }

    /// Run one capture attempt and, when a transcript lands, the full
    /// user→assistant exchange. Loops only for barge-in during the reply.
    async fn listen_and_respond(&mut self, cmd_rx: &mut mpsc::UnboundedReceiver<CallCommand>) {
        loop {
            self.set_phase(CallPhase::Listening);
            self.emit_status(STATUS_LISTENING);

            let outcome = {
                let listen = self.ctx.capture.listen();
                tokio::pin!(listen);
                loop {
                    // Biased: the capture future is polled first, so its
                    // cancel token is registered before any command can ask
                    // to stop it.
                    tokio::select! {
                        biased;
                        result = &mut listen => break match result {
                            Ok(Some(text)) => ListenOutcome::Captured(text),
                            Ok(None) => ListenOutcome::Aborted,
                            Err(e) => ListenOutcome::Failed(e.to_string()),
                        },
                        cmd = cmd_rx.recv() => match cmd {
                            Some(CallCommand::ToggleListening) => {
                                // User-initiated abort: no turn is recorded.
                                self.ctx.capture.stop();
                                let _ = (&mut listen).await;
                                break ListenOutcome::Aborted;
                            }
                            Some(CallCommand::EndCall) | None => {
                                self.ctx.capture.stop();
                                let _ = (&mut listen).await;
                                break ListenOutcome::End;
                            }
                            Some(other) => {
                                debug!(?other, "Ignoring command while listening");
                            }
                        }
                    }
                }
            };

            let text = match outcome {
                ListenOutcome::Captured(text) => text,
                ListenOutcome::Aborted => {
                    self.set_phase(CallPhase::Ready);
                    self.emit_status(STATUS_ACTIVE);
                    return;
                }
                ListenOutcome::Failed(e) => {
                    warn!(%e, "Capture failed");
                    self.set_phase(CallPhase::Ready);
                    self.emit_status(STATUS_CAPTURE_FAILED);
                    return;
                }
                ListenOutcome::End => {
                    self.teardown().await;
                    return;
                }
            };

            self.set_phase(CallPhase::Processing);
            self.emit(CallEvent::Transcript { text: text.clone() });
            self.emit_status(STATUS_PROCESSING);

            // History for inference is the context before this user turn; the
            // turn itself rides along separately. Persist before the request
            // goes out so stored history never lags the context.
            let history = self.context_snapshot();
            self.append_turn(Role::User, &text).await;

            let reply = {
                let infer = self.ctx.inference.get_reply(&text, &history);
                tokio::pin!(infer);
                loop {
                    tokio::select! {
                        biased;
                        reply = &mut infer => break Some(reply),
                        cmd = cmd_rx.recv() => match cmd {
                            Some(CallCommand::EndCall) | None => break None,
                            Some(other) => {
                                debug!(?other, "Ignoring command while processing");
                            }
                        }
                    }
                }
            };
            let Some(reply) = reply else {
                // Ending the call drops the in-flight request.
                self.teardown().await;
                return;
            };

            self.append_turn(Role::Assistant, &reply).await;

            match self.speak_phase(&reply, cmd_rx).await {
                Flow::Continue => {
                    self.set_phase(CallPhase::Ready);
                    self.emit_status(STATUS_ACTIVE);
                    return;
                }
                Flow::BargeIn => continue,
                Flow::End => {
                    self.teardown().await;
                    return;
                }
            }
        }
    }

    /// Play one utterance, watching for mute, barge-in, and end. Cancelling
    /// playback always completes before this returns.
    async fn speak_phase(
        &self,
        text: &str,
        cmd_rx: &mut mpsc::UnboundedReceiver<CallCommand>,
    ) -> Flow {
        self.set_phase(CallPhase::Speaking);
        self.emit_status(STATUS_SPEAKING);

        let speak = self.ctx.playback.speak(text);
        tokio::pin!(speak);
        loop {
            // Biased: playback is polled first, so its cancel token is
            // registered before a mute or barge-in can ask to stop it.
            tokio::select! {
                biased;
                _ = &mut speak => return Flow::Continue,
                cmd = cmd_rx.recv() => match cmd {
                    Some(CallCommand::ToggleSpeaking) => {
                        // Mute: skip the remaining audio, no resumption.
                        self.ctx.playback.stop_speaking();
                        (&mut speak).await;
                        return Flow::Continue;
                    }
                    Some(CallCommand::ToggleListening) => {
                        // Barge-in: playback is fully cancelled before
                        // capture starts.
                        self.ctx.playback.stop_speaking();
                        (&mut speak).await;
                        return Flow::BargeIn;
                    }
                    Some(CallCommand::EndCall) | None => {
                        self.ctx.playback.stop_speaking();
                        (&mut speak).await;
                        return Flow::End;
                    }
                    Some(other) => {
                        debug!(?other, "Ignoring command while speaking");
                    }
                }
            }
        }
    }

    /// Append a turn to the conversation context and persist it.
    /// Persistence is best-effort: a failed write is logged and the call
    /// carries on.
    async fn append_turn(&mut self, role: Role, content: &str) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.context.push(ContextMessage {
            role,
            content: content.to_string(),
        });
        let turn = NewTurn::new(&active.session_id, role, content);

        if let Err(e) = self.ctx.store.insert_turn(turn).await {
            warn!(%e, role = role.as_str(), "Turn insert failed, continuing");
        }
    }

    /// End the call: cancel in-flight capture and playback, close the
    /// session record, drop the conversation context. Idempotent.
    async fn teardown(&mut self) {
        self.ctx.capture.stop();
        self.ctx.playback.stop_speaking();

        let Some(active) = self.active.take() else {
            return;
        };

        let duration = active.started_at.elapsed().as_secs() as i64;
        if let Err(e) = self
            .ctx
            .store
            .update_session(&active.session_id, Utc::now(), duration)
            .await
        {
            warn!(%e, session_id = %active.session_id, "Session end update failed");
        }

        info!(session_id = %active.session_id, duration, "Call ended");
        self.set_phase(CallPhase::Idle);
        self.emit(CallEvent::SessionEnded {
            duration_secs: duration,
        });
        self.emit_status(STATUS_ENDED);
    }

    fn phase(&self) -> CallPhase {
        *self.phase_tx.borrow()
    }

    fn set_phase(&self, phase: CallPhase) {
        let prev = self.phase_tx.send_replace(phase);
        if prev != phase {
            self.emit(CallEvent::PhaseChanged { phase });
        }
    }

    fn context_snapshot(&self) -> Vec<ContextMessage> {
        self.active
            .as_ref()
            .map(|a| a.context.clone())
            .unwrap_or_default()
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_status(&self, text: &str) {
        self.emit(CallEvent::Status {
            text: text.to_string(),
        });
    }
}
