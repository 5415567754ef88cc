use crate::error::CaptureError;
use async_trait::async_trait;

/// Hardware input format as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputFormat {
    pub channels: u16,
    pub sample_rate: u32,
}

impl InputFormat {
    pub fn new(channels: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    /// Zero channels or a zero sample rate means the device is not ready yet.
    pub fn is_ready(&self) -> bool {
        self.channels > 0 && self.sample_rate > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    Starting,
    Running,
}

/// Events an engine pushes on the channel it was constructed with.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEngineEvent {
    /// Recognizer confirmed it is receiving audio.
    Listening,
    Transcript { text: String, is_final: bool },
    /// Input level, 0.0..=1.0.
    Level(f32),
    StateChanged(EnginePhase),
    /// Audio route changed (device plugged/unplugged).
    ConfigurationChanged,
    Error(CaptureError),
}

/// Speech capture + recognition engine.
#[async_trait]
pub trait CaptureEngine: Send + Sync {
    fn input_format(&self) -> InputFormat;

    fn phase(&self) -> EnginePhase;

    fn is_running(&self) -> bool {
        self.phase() == EnginePhase::Running
    }

    async fn start(&self) -> Result<(), CaptureError>;

    /// Stop capturing. `clear_buffer` discards audio not yet recognized.
    async fn stop(&self, clear_buffer: bool);
}
