//! Scriptable capture engine.

use super::engine::{CaptureEngine, CaptureEngineEvent, EnginePhase, InputFormat};
use crate::error::CaptureError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) struct FakeEngine {
    pub(crate) format: Mutex<InputFormat>,
    pub(crate) phase: Mutex<EnginePhase>,
    /// Popped per start call; empty means success.
    pub(crate) start_results: Mutex<VecDeque<Result<(), CaptureError>>>,
    /// Phase after a successful start.
    pub(crate) phase_after_start: Mutex<EnginePhase>,
    pub(crate) confirm_on_start: bool,
    pub(crate) start_delay: Duration,
    pub(crate) starts: AtomicU32,
    pub(crate) stops: Mutex<Vec<bool>>,
    pub(crate) events: mpsc::UnboundedSender<CaptureEngineEvent>,
}

impl FakeEngine {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<CaptureEngineEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                format: Mutex::new(InputFormat::new(1, 16_000)),
                phase: Mutex::new(EnginePhase::Idle),
                start_results: Mutex::new(VecDeque::new()),
                phase_after_start: Mutex::new(EnginePhase::Running),
                confirm_on_start: true,
                start_delay: Duration::ZERO,
                starts: AtomicU32::new(0),
                stops: Mutex::new(Vec::new()),
                events,
            },
            rx,
        )
    }

    pub(crate) fn fail_next_starts(&self, errors: impl IntoIterator<Item = CaptureError>) {
        self.start_results
            .lock()
            .unwrap()
            .extend(errors.into_iter().map(Err));
    }

    pub(crate) fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub(crate) fn stops(&self) -> Vec<bool> {
        self.stops.lock().unwrap().clone()
    }

    pub(crate) fn set_phase(&self, phase: EnginePhase) {
        *self.phase.lock().unwrap() = phase;
    }

    pub(crate) fn set_format(&self, format: InputFormat) {
        *self.format.lock().unwrap() = format;
    }

    pub(crate) fn emit(&self, event: CaptureEngineEvent) {
        self.events.send(event).unwrap();
    }
}

#[async_trait]
impl CaptureEngine for FakeEngine {
    fn input_format(&self) -> InputFormat {
        *self.format.lock().unwrap()
    }

    fn phase(&self) -> EnginePhase {
        *self.phase.lock().unwrap()
    }

    async fn start(&self) -> Result<(), CaptureError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let result = self
            .start_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));
        if let Err(err) = result {
            return Err(err);
        }
        self.set_phase(EnginePhase::Starting);
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        let phase = *self.phase_after_start.lock().unwrap();
        self.set_phase(phase);
        if self.confirm_on_start {
            let _ = self.events.send(CaptureEngineEvent::Listening);
        }
        Ok(())
    }

    async fn stop(&self, clear_buffer: bool) {
        self.stops.lock().unwrap().push(clear_buffer);
        self.set_phase(EnginePhase::Idle);
    }
}
