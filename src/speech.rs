//! Speech output collaborators.
//!
//! The engine speaks a reply and reports progress as [`SpeechEvent`]s on the
//! channel it was built with; the turn controller only sees those events.

use crate::app::logging::Logger;
use crate::error::SpeechError;
use crate::lock_or_recover;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    Started,
    /// Characters of the current utterance spoken so far.
    SpokenPrefix(usize),
    Finished { interrupted: bool },
}

#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Begin speaking. Returns once output has started; completion arrives as an event.
    async fn speak(&self, text: &str) -> Result<(), SpeechError>;

    /// Cut off the current utterance, if any.
    async fn stop(&self);
}

/// Engine that never makes a sound; finishes every utterance immediately.
pub struct SilentSpeech {
    events: mpsc::UnboundedSender<SpeechEvent>,
}

impl SilentSpeech {
    pub fn new(events: mpsc::UnboundedSender<SpeechEvent>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl SpeechEngine for SilentSpeech {
    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        let _ = self.events.send(SpeechEvent::Started);
        let _ = self
            .events
            .send(SpeechEvent::SpokenPrefix(text.chars().count()));
        let _ = self
            .events
            .send(SpeechEvent::Finished { interrupted: false });
        Ok(())
    }

    async fn stop(&self) {}
}

/// Runs an external TTS program (`say`, `espeak`, ...) with the text as its last argument.
pub struct CommandSpeech {
    program: String,
    args: Vec<String>,
    events: mpsc::UnboundedSender<SpeechEvent>,
    current: Mutex<Option<oneshot::Sender<()>>>,
    log: Logger,
}

impl CommandSpeech {
    /// Parse a shell-style command line such as `say -v Samantha`.
    pub fn from_command_line(
        command_line: &str,
        events: mpsc::UnboundedSender<SpeechEvent>,
        log: Logger,
    ) -> Result<Self, SpeechError> {
        let mut parts = shell_words::split(command_line)
            .map_err(|err| SpeechError(format!("invalid TTS command: {err}")))?;
        if parts.is_empty() {
            return Err(SpeechError("TTS command is empty".to_string()));
        }
        let program = parts.remove(0);
        Ok(Self {
            program,
            args: parts,
            events,
            current: Mutex::new(None),
            log,
        })
    }
}

#[async_trait]
impl SpeechEngine for CommandSpeech {
    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        self.stop().await;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| SpeechError(format!("{}: {err}", self.program)))?;

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        *lock_or_recover(&self.current, "speech current") = Some(stop_tx);
        let _ = self.events.send(SpeechEvent::Started);
        self.log.content(&format!("speaking {} chars", text.chars().count()));

        let events = self.events.clone();
        let chars = text.chars().count();
        let log = self.log.clone();
        tokio::spawn(async move {
            let interrupted = tokio::select! {
                status = child.wait() => {
                    if let Ok(status) = status {
                        if !status.success() {
                            log.warn(&format!("TTS command exited with {status}"));
                        }
                    }
                    false
                }
                _ = stop_rx => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    true
                }
            };
            if !interrupted {
                let _ = events.send(SpeechEvent::SpokenPrefix(chars));
            }
            let _ = events.send(SpeechEvent::Finished { interrupted });
        });
        Ok(())
    }

    async fn stop(&self) {
        if let Some(stop) = lock_or_recover(&self.current, "speech current").take() {
            let _ = stop.send(());
        }
    }
}
