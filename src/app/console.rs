//! Console front end: typed lines stand in for the microphone and events are
//! printed as plain text.

use crate::capture::{CaptureEngine, CaptureEngineEvent, EnginePhase, InputFormat};
use crate::error::CaptureError;
use crate::ipc::{UiEvent, UiSink};
use crate::lock_or_recover;
use async_trait::async_trait;
use std::io::{self, Write};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Capture engine fed by typed lines.
///
/// While running, [`offer`](Self::offer) turns a line into a final transcript,
/// which is how the rest of the core sees a finished utterance.
pub struct ConsoleEngine {
    phase: Mutex<EnginePhase>,
    events: mpsc::UnboundedSender<CaptureEngineEvent>,
}

impl ConsoleEngine {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CaptureEngineEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                phase: Mutex::new(EnginePhase::Idle),
                events,
            },
            rx,
        )
    }

    /// Hand a typed line to capture. Returns false when nothing is listening.
    pub fn offer(&self, text: &str) -> bool {
        if *lock_or_recover(&self.phase, "console phase") != EnginePhase::Running {
            return false;
        }
        let _ = self.events.send(CaptureEngineEvent::Level(1.0));
        self.events
            .send(CaptureEngineEvent::Transcript {
                text: text.to_string(),
                is_final: true,
            })
            .is_ok()
    }
}

#[async_trait]
impl CaptureEngine for ConsoleEngine {
    fn input_format(&self) -> InputFormat {
        InputFormat::new(1, 16_000)
    }

    fn phase(&self) -> EnginePhase {
        *lock_or_recover(&self.phase, "console phase")
    }

    async fn start(&self) -> Result<(), CaptureError> {
        *lock_or_recover(&self.phase, "console phase") = EnginePhase::Running;
        let _ = self.events.send(CaptureEngineEvent::Listening);
        Ok(())
    }

    async fn stop(&self, _clear_buffer: bool) {
        *lock_or_recover(&self.phase, "console phase") = EnginePhase::Idle;
    }
}

/// Prints events for a person at a terminal.
pub struct ConsoleSink {
    out: Mutex<io::Stdout>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(io::stdout()),
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl UiSink for ConsoleSink {
    fn emit(&self, event: UiEvent) {
        let Some(text) = render(&event) else {
            return;
        };
        let mut out = lock_or_recover(&self.out, "console stdout");
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

/// Text for one event; `None` for events a console has no use for.
pub(crate) fn render(event: &UiEvent) -> Option<String> {
    let line = match event {
        UiEvent::Ready {
            version,
            thread_id,
            model,
        } => format!(
            "voxterm-core {version} ready (thread {thread_id}, model {})\n",
            model.as_deref().unwrap_or("default")
        ),
        UiEvent::AuthRequired { auth_url } => match auth_url {
            Some(url) => format!("login required: open {url}\n"),
            None => "login required\n".to_string(),
        },
        UiEvent::AuthEnd { success: true, .. } => "login complete\n".to_string(),
        UiEvent::AuthEnd { error, .. } => format!(
            "login failed: {}\n",
            error.as_deref().unwrap_or("unknown error")
        ),
        UiEvent::ListenStart => "[listening] type what you would say\n".to_string(),
        UiEvent::UserMessage { text, .. } => format!("you: {text}\n"),
        UiEvent::Reasoning { text } => {
            let last = text.lines().last().unwrap_or_default();
            format!("  (thinking) {last}\n")
        }
        UiEvent::Token { text, .. } => text.clone(),
        UiEvent::ReplyDone { .. } => "\n".to_string(),
        UiEvent::Threads { threads } => {
            let mut out = String::new();
            for thread in threads {
                out.push_str(&format!("  {}  {}\n", thread.id, thread.preview));
            }
            if threads.is_empty() {
                out.push_str("  (no threads)\n");
            }
            out
        }
        UiEvent::Models { models } => {
            let mut out = String::new();
            for model in models {
                let marker = if model.is_default { "*" } else { " " };
                out.push_str(&format!("{marker} {}  {}\n", model.id, model.display_name));
            }
            out
        }
        UiEvent::Status { message } => format!("{message}\n"),
        UiEvent::Disconnected { reason } => format!("agent disconnected: {reason}\n"),
        UiEvent::Error {
            message,
            recoverable,
        } => {
            let label = if *recoverable { "error" } else { "fatal" };
            format!("{label}: {message}\n")
        }
        UiEvent::State { .. }
        | UiEvent::ListenEnd
        | UiEvent::Partial { .. }
        | UiEvent::Level { .. }
        | UiEvent::ReasoningCleared
        | UiEvent::SpeakStart
        | UiEvent::SpeakEnd { .. } => return None,
    };
    Some(line)
}
