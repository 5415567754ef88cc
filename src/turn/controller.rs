//! The turn controller actor.
//!
//! One task owns all conversation state. User commands, capture and speech
//! events, agent notifications and the results of work the controller spawned
//! all arrive on a single mailbox and are handled strictly in order, so no two
//! transitions ever interleave.

use super::events::{register_turn_handlers, TurnInput};
use super::state::{AutoListen, ListenSession, ReasoningBuffer, TurnSnapshot, TurnState};
use crate::app::logging::Logger;
use crate::backoff::BackoffPolicy;
use crate::capture::{CaptureEvent, CaptureSupervisor, StartOutcome};
use crate::error::{CaptureError, RpcError, TurnError};
use crate::ipc::{UiEvent, UiSink};
use crate::rpc::protocol::{
    methods, TurnInterruptParams, TurnStartParams, TurnStartResponse, TurnStatus, UserInput,
};
use crate::rpc::RpcSession;
use crate::speech::{SpeechEngine, SpeechEvent};
use crate::thread::{Thread, Turn};
use crate::transcript::sanitize_transcript;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Per-thread behaviour knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnConfig {
    pub model: Option<String>,
    pub effort: Option<String>,
    /// Read completed replies aloud.
    pub speak_replies: bool,
    /// Start listening whenever the controller is idle.
    pub auto_listen: bool,
    pub interrupt_backoff: BackoffPolicy,
    /// Auto-listen pause after a transient failure.
    pub error_cooldown: Duration,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            model: None,
            effort: None,
            speak_replies: false,
            auto_listen: true,
            interrupt_backoff: BackoffPolicy::fixed(3, Duration::from_millis(250)),
            error_cooldown: Duration::from_secs(3),
        }
    }
}

/// Collaborators handed to [`TurnController::spawn`].
pub struct TurnParts {
    pub session: Arc<RpcSession>,
    pub capture: Arc<CaptureSupervisor>,
    pub capture_events: mpsc::UnboundedReceiver<CaptureEvent>,
    pub speech: Arc<dyn SpeechEngine>,
    pub speech_events: mpsc::UnboundedReceiver<SpeechEvent>,
    pub ui: Arc<dyn UiSink>,
    pub thread: Thread,
    pub config: TurnConfig,
    pub log: Logger,
}

/// Cheap, cloneable front door to a running controller.
#[derive(Debug, Clone)]
pub struct TurnHandle {
    inbox: mpsc::UnboundedSender<TurnInput>,
}

impl TurnHandle {
    /// Returns false once the controller has shut down.
    pub fn send(&self, input: TurnInput) -> bool {
        self.inbox.send(input).is_ok()
    }

    pub fn start_listen(&self) -> bool {
        self.send(TurnInput::StartListen)
    }

    pub fn new_turn(&self, text: Option<String>) -> bool {
        self.send(TurnInput::UserRequestsNewTurn { text })
    }

    pub fn interrupt(&self) -> bool {
        self.send(TurnInput::Interrupt)
    }

    pub fn set_auto_listen(&self, enabled: bool) -> bool {
        self.send(TurnInput::SetAutoListen(enabled))
    }

    pub fn enable_mic(&self) -> bool {
        self.send(TurnInput::EnableMic)
    }

    pub async fn snapshot(&self) -> Option<TurnSnapshot> {
        let (tx, rx) = oneshot::channel();
        if !self.send(TurnInput::Snapshot(tx)) {
            return None;
        }
        rx.await.ok()
    }

    pub fn shutdown(&self) -> bool {
        self.send(TurnInput::Shutdown)
    }
}

pub struct TurnController {
    session: Arc<RpcSession>,
    capture: Arc<CaptureSupervisor>,
    speech: Arc<dyn SpeechEngine>,
    ui: Arc<dyn UiSink>,
    thread: Thread,
    config: TurnConfig,
    log: Logger,
    inbox: mpsc::UnboundedSender<TurnInput>,

    state: TurnState,
    active_turn: Option<Turn>,
    send_in_flight: bool,
    queued_utterance: Option<String>,
    reasoning: ReasoningBuffer,
    auto: AutoListen,
    next_listen_id: u64,
    rearm_pending: bool,
    /// Guards against late or duplicate notifications for a finished turn.
    last_completed: Option<String>,
    /// turn/completed arrived while turn/start was still unanswered.
    completed_before_reply: bool,
    /// Interrupt asked for before the turn id was known.
    interrupt_requested: bool,
    interrupt_sent_for: Option<String>,
}

impl TurnController {
    /// Wire the collaborators together and start the actor.
    ///
    /// The join handle yields the thread (with its transcript) after shutdown.
    pub fn spawn(parts: TurnParts) -> (TurnHandle, JoinHandle<Thread>) {
        let (inbox, rx) = mpsc::unbounded_channel();
        register_turn_handlers(&parts.session, &parts.thread.id, inbox.clone(), &parts.log);
        forward(parts.capture_events, inbox.clone(), TurnInput::Capture);
        forward(parts.speech_events, inbox.clone(), TurnInput::Speech);

        let controller = Self {
            session: parts.session,
            capture: parts.capture,
            speech: parts.speech,
            ui: parts.ui,
            thread: parts.thread,
            auto: AutoListen::new(parts.config.auto_listen),
            config: parts.config,
            log: parts.log,
            inbox: inbox.clone(),
            state: TurnState::Idle,
            active_turn: None,
            send_in_flight: false,
            queued_utterance: None,
            reasoning: ReasoningBuffer::default(),
            next_listen_id: 0,
            rearm_pending: false,
            last_completed: None,
            completed_before_reply: false,
            interrupt_requested: false,
            interrupt_sent_for: None,
        };
        let task = tokio::spawn(controller.run(rx));
        (TurnHandle { inbox }, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<TurnInput>) -> Thread {
        self.ui.emit(UiEvent::State {
            state: self.state.label().to_string(),
        });
        self.evaluate_auto_listen();

        while let Some(input) = rx.recv().await {
            if matches!(input, TurnInput::Shutdown) {
                break;
            }
            self.handle(input).await;
        }

        self.log.debug("turn controller shutting down");
        self.capture.request_stop(true).await;
        if matches!(self.state, TurnState::Speaking) {
            self.speech.stop().await;
        }
        self.thread.finish_reply();
        self.thread
    }

    async fn handle(&mut self, input: TurnInput) {
        match input {
            TurnInput::StartListen => self.on_start_listen(),
            TurnInput::UserRequestsNewTurn { text } => self.on_new_turn(text).await,
            TurnInput::Interrupt => self.on_interrupt().await,
            TurnInput::SetAutoListen(enabled) => {
                self.auto.enabled = enabled;
                self.log.info(&format!("auto-listen {}", on_off(enabled)));
                self.evaluate_auto_listen();
            }
            TurnInput::EnableMic => {
                self.auto.permission_blocked = false;
                self.auto.blocked_until = None;
                self.ui.emit(UiEvent::Status {
                    message: "microphone re-enabled".to_string(),
                });
                self.evaluate_auto_listen();
            }

            TurnInput::Capture(event) => self.on_capture(event).await,
            TurnInput::Speech(event) => self.on_speech(event),

            TurnInput::RemoteTurnStarted { turn_id } => self.on_turn_started(turn_id),
            TurnInput::RemoteReplyDelta { turn_id, delta } => {
                self.on_reply_delta(turn_id.as_deref(), &delta)
            }
            TurnInput::RemoteReasoningDelta { turn_id, delta } => {
                if self.accepts_reasoning(turn_id.as_deref()) && self.reasoning.push_delta(&delta) {
                    self.ui.emit(UiEvent::Reasoning {
                        text: self.reasoning.text().to_string(),
                    });
                }
            }
            TurnInput::RemoteReasoningPartAdded { turn_id } => {
                if self.accepts_reasoning(turn_id.as_deref()) {
                    self.reasoning.part_added();
                }
            }
            TurnInput::RemoteTurnCompleted {
                turn_id,
                status,
                error,
            } => self.on_turn_completed(turn_id, status, error),
            TurnInput::RemoteError {
                message,
                will_retry,
            } => self.on_remote_error(message, will_retry),
            TurnInput::Disconnected(reason) => {
                self.log.warn(&format!("agent disconnected: {reason}"));
                self.reset_after_disconnect(reason.to_string()).await;
            }

            TurnInput::CaptureStartFinished { listen_id, result } => {
                self.on_capture_started(listen_id, result).await
            }
            TurnInput::TurnStartFinished { result } => self.on_turn_start_finished(result),
            TurnInput::InterruptFinished { turn_id, result } => match result {
                Ok(attempts) => self
                    .log
                    .debug(&format!("interrupt of {turn_id} accepted after {attempts} attempt(s)")),
                // The turn still ends with turn/completed; keep waiting for it.
                Err(err) => {
                    self.log.warn(&format!("interrupt of {turn_id} failed: {err}"));
                    self.ui.emit(UiEvent::Error {
                        message: format!("interrupt failed: {err}"),
                        recoverable: true,
                    });
                }
            },
            TurnInput::SpeakFailed(err) => {
                self.log.warn(&err.to_string());
                self.ui.emit(UiEvent::Error {
                    message: err.to_string(),
                    recoverable: true,
                });
                if matches!(self.state, TurnState::Speaking) {
                    self.set_state(TurnState::Idle);
                    self.evaluate_auto_listen();
                }
            }
            TurnInput::ReArm => {
                self.rearm_pending = false;
                self.evaluate_auto_listen();
            }

            TurnInput::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            TurnInput::Shutdown => {}
        }
    }

    // ------------------------------------------------------------------
    // user input
    // ------------------------------------------------------------------

    /// Manual listen: ignores the error cool-down but not a permission block.
    fn on_start_listen(&mut self) {
        if !matches!(self.state, TurnState::Idle)
            || self.send_in_flight
            || self.active_turn.is_some()
        {
            self.log
                .debug(&format!("listen ignored while {}", self.state.label()));
            return;
        }
        if !self.can_listen() {
            return;
        }
        self.begin_listening();
    }

    async fn on_new_turn(&mut self, text: Option<String>) {
        let text = text
            .map(|text| sanitize_transcript(&text))
            .filter(|text| !text.is_empty());

        match self.state {
            TurnState::Idle => match text {
                Some(text) => self.send_turn(text),
                None => {
                    if self.can_listen() {
                        self.begin_listening();
                    }
                }
            },
            TurnState::Listening(_) => {
                if let Some(text) = text {
                    self.set_state(TurnState::Idle);
                    self.end_listening(true).await;
                    self.send_turn(text);
                }
            }
            TurnState::Busy => {
                self.request_interrupt();
                match text {
                    Some(text) => {
                        self.queued_utterance = Some(text);
                        self.set_state(TurnState::Interrupting);
                    }
                    None if self.can_listen() => self.begin_listening(),
                    None => self.set_state(TurnState::Interrupting),
                }
            }
            TurnState::Interrupting => match text {
                Some(text) => {
                    self.log.debug("replacing queued utterance");
                    self.queued_utterance = Some(text);
                }
                None => {
                    self.queued_utterance = None;
                    if self.can_listen() {
                        self.begin_listening();
                    }
                }
            },
            TurnState::Speaking => {
                self.speech.stop().await;
                self.set_state(TurnState::Idle);
                match text {
                    Some(text) => self.send_turn(text),
                    None => {
                        if self.can_listen() {
                            self.begin_listening();
                        }
                    }
                }
            }
        }
    }

    async fn on_interrupt(&mut self) {
        match self.state {
            TurnState::Busy => {
                self.request_interrupt();
                self.set_state(TurnState::Interrupting);
            }
            TurnState::Interrupting => self.queued_utterance = None,
            TurnState::Speaking => {
                self.speech.stop().await;
                self.set_state(TurnState::Idle);
            }
            TurnState::Listening(_) => {
                self.set_state(TurnState::Idle);
                self.end_listening(true).await;
                // Cancelled by the user; don't reopen the mic straight away.
                self.start_cooldown();
            }
            TurnState::Idle => {}
        }
    }

    // ------------------------------------------------------------------
    // capture
    // ------------------------------------------------------------------

    fn can_listen(&self) -> bool {
        if self.auto.permission_blocked {
            self.ui.emit(UiEvent::Error {
                message: "microphone access is blocked; use /enable-mic after granting it"
                    .to_string(),
                recoverable: false,
            });
            return false;
        }
        self.auto.connected
    }

    fn begin_listening(&mut self) {
        self.next_listen_id += 1;
        let listen_id = self.next_listen_id;
        self.set_state(TurnState::Listening(ListenSession {
            id: listen_id,
            partial: String::new(),
        }));
        self.ui.emit(UiEvent::ListenStart);

        // Claim the start here so a stop handled after this point cancels it.
        let ticket = self.capture.begin_start();
        let capture = Arc::clone(&self.capture);
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let result = capture.complete_start(ticket).await;
            let _ = inbox.send(TurnInput::CaptureStartFinished { listen_id, result });
        });
    }

    /// Stop capture and tell the UI. The caller has already moved the state on.
    async fn end_listening(&mut self, clear_buffer: bool) {
        self.capture.request_stop(clear_buffer).await;
        self.ui.emit(UiEvent::ListenEnd);
    }

    async fn on_capture_started(
        &mut self,
        listen_id: u64,
        result: Result<StartOutcome, CaptureError>,
    ) {
        let current = self.state.listen_id() == Some(listen_id);
        match result {
            Ok(StartOutcome::Started { attempts }) => {
                self.log
                    .debug(&format!("capture started after {attempts} attempt(s)"));
                if !current {
                    self.log.warn("capture started for a finished listen; stopping it");
                    self.capture.request_stop(true).await;
                }
            }
            Ok(StartOutcome::Cancelled) => {
                if current {
                    self.set_state(TurnState::Idle);
                    self.ui.emit(UiEvent::ListenEnd);
                    self.evaluate_auto_listen();
                }
            }
            Err(err) if current => self.capture_failed(err).await,
            Err(err) => self
                .log
                .debug(&format!("stale capture start failure ignored: {err}")),
        }
    }

    async fn on_capture(&mut self, event: CaptureEvent) {
        let listening = self.state.is_listening();
        match event {
            CaptureEvent::Listening => self.log.debug("capture confirmed listening"),
            CaptureEvent::Transcript { text, .. } if !listening => {
                self.log.debug("transcript outside listening dropped");
                self.log.content(&text);
            }
            CaptureEvent::Transcript {
                text,
                is_final: true,
            } => self.speech_finalized(text).await,
            CaptureEvent::Transcript {
                text,
                is_final: false,
            } => {
                if let TurnState::Listening(session) = &mut self.state {
                    session.partial.clone_from(&text);
                }
                self.ui.emit(UiEvent::Partial { text });
            }
            CaptureEvent::Level(level) => {
                if listening {
                    self.ui.emit(UiEvent::Level { level });
                }
            }
            CaptureEvent::SilenceTimeout => {
                if let TurnState::Listening(session) = &self.state {
                    let text = session.partial.clone();
                    self.speech_finalized(text).await;
                }
            }
            CaptureEvent::Error {
                error,
                recoverable: true,
            } => {
                self.log.warn(&format!("capture hiccup: {error}"));
                self.ui.emit(UiEvent::Status {
                    message: format!("microphone restarted: {error}"),
                });
            }
            CaptureEvent::Error {
                error,
                recoverable: false,
            } => {
                if listening {
                    self.capture_failed(error).await;
                } else {
                    self.log.warn(&format!("capture error while not listening: {error}"));
                }
            }
            CaptureEvent::Stopped => {
                if listening {
                    self.set_state(TurnState::Idle);
                    self.ui.emit(UiEvent::ListenEnd);
                    self.evaluate_auto_listen();
                }
            }
        }
    }

    async fn capture_failed(&mut self, error: CaptureError) {
        if self.state.is_listening() {
            self.set_state(TurnState::Idle);
            self.end_listening(true).await;
        }
        if error.is_permission() {
            self.auto.permission_blocked = true;
            self.log.error(&format!("microphone blocked: {error}"));
            self.ui.emit(UiEvent::Error {
                message: format!("{error}; use /enable-mic after granting access"),
                recoverable: false,
            });
        } else {
            self.log.warn(&format!("capture failed: {error}"));
            self.start_cooldown();
            self.ui.emit(UiEvent::Error {
                message: error.to_string(),
                recoverable: true,
            });
        }
        self.evaluate_auto_listen();
    }

    /// End of an utterance, from a final transcript or from silence.
    async fn speech_finalized(&mut self, text: String) {
        if !self.state.is_listening() {
            return;
        }
        self.set_state(TurnState::Idle);
        self.end_listening(false).await;

        let text = sanitize_transcript(&text);
        if text.is_empty() {
            self.log.debug("empty utterance discarded");
            self.evaluate_auto_listen();
            return;
        }
        self.send_turn(text);
    }

    // ------------------------------------------------------------------
    // turns
    // ------------------------------------------------------------------

    fn send_turn(&mut self, text: String) {
        if self.send_in_flight || self.active_turn.is_some() {
            self.log.debug("turn still running; utterance queued");
            self.queued_utterance = Some(text);
            return;
        }

        let message = self.thread.push_user(&text);
        self.ui.emit(UiEvent::UserMessage {
            id: message.id.clone(),
            text: message.text.clone(),
        });
        self.log.content(&format!("user: {text}"));

        self.set_state(TurnState::Busy);
        self.send_in_flight = true;
        self.completed_before_reply = false;
        self.queued_utterance = None;
        self.interrupt_requested = false;
        self.interrupt_sent_for = None;
        self.reasoning.reset();

        let params = TurnStartParams {
            thread_id: self.thread.id.clone(),
            input: vec![UserInput::text(text)],
            model: self.config.model.clone(),
            effort: self.config.effort.clone(),
        };
        let session = Arc::clone(&self.session);
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let result = session
                .call_typed::<TurnStartResponse>(methods::TURN_START, params)
                .await
                .map(|response| response.turn.id);
            let _ = inbox.send(TurnInput::TurnStartFinished { result });
        });
    }

    fn on_turn_start_finished(&mut self, result: Result<String, RpcError>) {
        self.send_in_flight = false;
        let already_completed = std::mem::take(&mut self.completed_before_reply);
        match result {
            Ok(turn_id) => {
                if already_completed || self.last_completed.as_deref() == Some(turn_id.as_str()) {
                    // turn/completed beat the response.
                    self.log.debug(&format!("turn {turn_id} finished before its start reply"));
                    self.last_completed = Some(turn_id);
                    self.evaluate_auto_listen();
                    return;
                }
                if self.active_turn.is_none() {
                    self.active_turn = Some(Turn::active(turn_id));
                }
                if self.interrupt_requested {
                    self.interrupt_requested = false;
                    self.request_interrupt();
                }
            }
            Err(err) => {
                let err = TurnError::Start(err);
                self.log.warn(&err.to_string());
                self.ui.emit(UiEvent::Error {
                    message: err.to_string(),
                    recoverable: true,
                });
                self.interrupt_requested = false;
                self.queued_utterance = None;
                if self.reasoning.clear() {
                    self.ui.emit(UiEvent::ReasoningCleared);
                }
                if matches!(self.state, TurnState::Busy | TurnState::Interrupting) {
                    self.set_state(TurnState::Idle);
                }
                self.start_cooldown();
                self.evaluate_auto_listen();
            }
        }
    }

    fn on_turn_started(&mut self, turn_id: String) {
        if self.last_completed.as_deref() == Some(turn_id.as_str()) {
            return;
        }
        let ours = self.send_in_flight
            || matches!(self.state, TurnState::Busy | TurnState::Interrupting);
        if self.active_turn.is_none() && ours {
            self.log.debug(&format!("turn {turn_id} started"));
            self.active_turn = Some(Turn::active(turn_id));
            if self.interrupt_requested {
                self.interrupt_requested = false;
                self.request_interrupt();
            }
        }
    }

    /// Late or foreign turn ids.
    fn is_stale(&self, turn_id: Option<&str>) -> bool {
        let Some(turn_id) = turn_id else {
            return false;
        };
        if self.last_completed.as_deref() == Some(turn_id) {
            return true;
        }
        matches!(&self.active_turn, Some(turn) if turn.id != turn_id)
    }

    fn on_reply_delta(&mut self, turn_id: Option<&str>, delta: &str) {
        if !matches!(self.state, TurnState::Busy) {
            self.log
                .debug(&format!("reply delta dropped while {}", self.state.label()));
            return;
        }
        if self.is_stale(turn_id) {
            self.log.debug("stale reply delta dropped");
            return;
        }
        if self.active_turn.is_none() {
            if let Some(turn_id) = turn_id {
                self.active_turn = Some(Turn::active(turn_id));
            }
        }
        if self.reasoning.mark_response_started() {
            self.ui.emit(UiEvent::ReasoningCleared);
        }
        let message = self.thread.append_reply(delta);
        let message_id = message.id.clone();
        self.ui.emit(UiEvent::Token {
            message_id,
            text: delta.to_string(),
        });
    }

    fn accepts_reasoning(&self, turn_id: Option<&str>) -> bool {
        matches!(self.state, TurnState::Busy)
            && !self.reasoning.response_started()
            && !self.is_stale(turn_id)
    }

    fn on_turn_completed(&mut self, turn_id: Option<String>, status: TurnStatus, error: Option<String>) {
        if self.is_stale(turn_id.as_deref()) {
            self.log.debug("duplicate or foreign turn/completed ignored");
            return;
        }
        let ours = self.active_turn.is_some()
            || self.send_in_flight
            || matches!(self.state, TurnState::Busy | TurnState::Interrupting);
        if !ours {
            self.log.debug("turn/completed with no turn running ignored");
            return;
        }

        let finished = self.active_turn.take();
        if finished.is_none() && self.send_in_flight {
            self.completed_before_reply = true;
        }
        self.last_completed = turn_id.or(finished.map(|turn| turn.id));
        self.interrupt_requested = false;
        self.interrupt_sent_for = None;
        self.log.info(&format!("turn completed: {status:?}"));

        let reply = self.finish_reply();
        if self.reasoning.clear() {
            self.ui.emit(UiEvent::ReasoningCleared);
        }

        if status == TurnStatus::Failed {
            let err = TurnError::Remote(error.unwrap_or_else(|| "turn failed".to_string()));
            self.ui.emit(UiEvent::Error {
                message: err.to_string(),
                recoverable: true,
            });
            self.queued_utterance = None;
            if matches!(self.state, TurnState::Busy | TurnState::Interrupting) {
                self.set_state(TurnState::Idle);
            }
            self.start_cooldown();
            self.evaluate_auto_listen();
            return;
        }

        if !matches!(self.state, TurnState::Busy | TurnState::Interrupting) {
            // Barge-in moved on. An utterance it left queued goes out now,
            // unless the user is still talking.
            self.evaluate_auto_listen();
            return;
        }
        if let Some(next) = self.queued_utterance.take() {
            self.set_state(TurnState::Idle);
            self.send_turn(next);
            return;
        }

        let speak = self.config.speak_replies
            && matches!(self.state, TurnState::Busy)
            && status == TurnStatus::Completed;
        match reply {
            Some(text) if speak && !text.trim().is_empty() => self.start_speaking(text),
            _ => {
                self.set_state(TurnState::Idle);
                self.evaluate_auto_listen();
            }
        }
    }

    /// Freeze the streaming reply and announce it. Returns its text.
    fn finish_reply(&mut self) -> Option<String> {
        let message = self.thread.finish_reply()?;
        let (message_id, text) = (message.id.clone(), message.text.clone());
        self.log.content(&format!("assistant: {text}"));
        self.ui.emit(UiEvent::ReplyDone {
            message_id,
            text: text.clone(),
        });
        Some(text)
    }

    fn on_remote_error(&mut self, message: String, will_retry: bool) {
        if will_retry {
            self.log.info(&format!("agent retrying after: {message}"));
            self.ui.emit(UiEvent::Status {
                message: format!("retrying: {message}"),
            });
            return;
        }

        self.log.warn(&format!("agent error: {message}"));
        self.ui.emit(UiEvent::Error {
            message,
            recoverable: true,
        });
        if let Some(turn) = self.active_turn.take() {
            self.last_completed = Some(turn.id);
        }
        self.finish_reply();
        if self.reasoning.clear() {
            self.ui.emit(UiEvent::ReasoningCleared);
        }
        self.queued_utterance = None;
        self.interrupt_requested = false;
        self.interrupt_sent_for = None;
        if matches!(self.state, TurnState::Busy | TurnState::Interrupting) {
            self.set_state(TurnState::Idle);
        }
        self.start_cooldown();
        self.evaluate_auto_listen();
    }

    /// Send turn/interrupt once per turn, deferring it until the id is known.
    fn request_interrupt(&mut self) {
        let Some(turn) = &self.active_turn else {
            self.log.debug("interrupt deferred until the turn id is known");
            self.interrupt_requested = true;
            return;
        };
        if self.interrupt_sent_for.as_deref() == Some(turn.id.as_str()) {
            return;
        }
        let turn_id = turn.id.clone();
        self.interrupt_sent_for = Some(turn_id.clone());
        self.log.info(&format!("interrupting turn {turn_id}"));

        let params = TurnInterruptParams {
            thread_id: self.thread.id.clone(),
            turn_id: turn_id.clone(),
        };
        let policy = self.config.interrupt_backoff.clone();
        let session = Arc::clone(&self.session);
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let result = policy
                .retry(
                    |_| {
                        let session = Arc::clone(&session);
                        let params = params.clone();
                        async move { session.call(methods::TURN_INTERRUPT, params).await }
                    },
                    |err: &RpcError| !err.is_transport(),
                )
                .await
                .map(|(_, attempts)| attempts);
            let _ = inbox.send(TurnInput::InterruptFinished { turn_id, result });
        });
    }

    // ------------------------------------------------------------------
    // speech
    // ------------------------------------------------------------------

    fn start_speaking(&mut self, text: String) {
        self.set_state(TurnState::Speaking);
        let speech = Arc::clone(&self.speech);
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            if let Err(err) = speech.speak(&text).await {
                let _ = inbox.send(TurnInput::SpeakFailed(err));
            }
        });
    }

    fn on_speech(&mut self, event: SpeechEvent) {
        match event {
            SpeechEvent::Started => self.ui.emit(UiEvent::SpeakStart),
            SpeechEvent::SpokenPrefix(chars) => {
                self.log.debug(&format!("spoken {chars} chars"));
            }
            SpeechEvent::Finished { interrupted } => {
                self.ui.emit(UiEvent::SpeakEnd { interrupted });
                if matches!(self.state, TurnState::Speaking) {
                    self.set_state(TurnState::Idle);
                    self.evaluate_auto_listen();
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // auto-listen and housekeeping
    // ------------------------------------------------------------------

    fn start_cooldown(&mut self) {
        self.auto.blocked_until = Some(Instant::now() + self.config.error_cooldown);
    }

    /// Called whenever the controller may have gone idle: sends a queued
    /// utterance, else begins listening or schedules a retry for when the
    /// cool-down runs out.
    fn evaluate_auto_listen(&mut self) {
        if !matches!(self.state, TurnState::Idle)
            || self.send_in_flight
            || self.active_turn.is_some()
        {
            return;
        }
        if let Some(next) = self.queued_utterance.take() {
            if self.auto.connected {
                self.send_turn(next);
            }
            return;
        }
        if !self.auto.enabled || !self.auto.connected || self.auto.permission_blocked {
            return;
        }
        if let Some(until) = self.auto.blocked_until {
            if Instant::now() < until {
                self.schedule_rearm(until);
                return;
            }
            self.auto.blocked_until = None;
        }
        self.begin_listening();
    }

    fn schedule_rearm(&mut self, at: Instant) {
        if self.rearm_pending {
            return;
        }
        self.rearm_pending = true;
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            let _ = inbox.send(TurnInput::ReArm);
        });
    }

    async fn reset_after_disconnect(&mut self, reason: String) {
        match self.state {
            TurnState::Listening(_) => self.end_listening(true).await,
            TurnState::Speaking => self.speech.stop().await,
            _ => {}
        }
        self.set_state(TurnState::Idle);
        self.active_turn = None;
        self.send_in_flight = false;
        self.completed_before_reply = false;
        self.queued_utterance = None;
        self.interrupt_requested = false;
        self.interrupt_sent_for = None;
        self.reasoning.reset();
        self.thread.finish_reply();
        self.auto.connected = false;
        self.ui.emit(UiEvent::Disconnected { reason });
    }

    fn set_state(&mut self, state: TurnState) {
        let changed = self.state.label() != state.label();
        self.state = state;
        if changed {
            self.log.debug(&format!("state -> {}", self.state.label()));
            self.ui.emit(UiEvent::State {
                state: self.state.label().to_string(),
            });
        }
    }

    fn snapshot(&self) -> TurnSnapshot {
        TurnSnapshot {
            state: self.state.clone(),
            active_turn: self.active_turn.clone(),
            send_in_flight: self.send_in_flight,
            queued_utterance: self.queued_utterance.clone(),
            reasoning: self.reasoning.text().to_string(),
            response_started: self.reasoning.response_started(),
            auto_listen: self.auto.enabled,
            permission_blocked: self.auto.permission_blocked,
            connected: self.auto.connected,
            messages: self.thread.messages.clone(),
        }
    }
}

fn forward<T: Send + 'static>(
    mut rx: mpsc::UnboundedReceiver<T>,
    inbox: mpsc::UnboundedSender<TurnInput>,
    wrap: fn(T) -> TurnInput,
) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if inbox.send(wrap(event)).is_err() {
                break;
            }
        }
    });
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}
