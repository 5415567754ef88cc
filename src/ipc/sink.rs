use super::protocol::UiEvent;
use crate::lock_or_recover;
use std::io::{self, Write};
use std::sync::Mutex;

/// Where UI events go. Implementations must not block for long; the turn
/// controller emits from its event loop.
pub trait UiSink: Send + Sync {
    fn emit(&self, event: UiEvent);
}

/// Hands events to a synchronous UI thread.
impl UiSink for crossbeam_channel::Sender<UiEvent> {
    fn emit(&self, event: UiEvent) {
        let _ = self.send(event);
    }
}

/// Writes each event as one JSON line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl JsonLinesSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> UiSink for JsonLinesSink<W> {
    fn emit(&self, event: UiEvent) {
        if let Ok(json) = serde_json::to_string(&event) {
            let mut writer = lock_or_recover(&self.writer, "ui sink");
            let _ = writeln!(writer, "{json}");
            let _ = writer.flush();
        }
    }
}

/// Discards everything.
pub struct NullSink;

impl UiSink for NullSink {
    fn emit(&self, _event: UiEvent) {}
}
