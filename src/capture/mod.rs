//! Speech capture supervision.
//!
//! The engine itself is a collaborator behind [`CaptureEngine`]; this module
//! decides when to start, restart, or give up on it, and turns its raw events
//! into [`CaptureEvent`]s for the turn controller.

pub mod engine;
pub mod silence;
pub mod supervisor;

pub use engine::{CaptureEngine, CaptureEngineEvent, EnginePhase, InputFormat};
pub use silence::{SilenceConfig, SilenceDetector};
pub use supervisor::{CaptureEvent, CaptureSupervisor, StartOutcome, StartTicket};

use crate::backoff::BackoffPolicy;
use std::time::Duration;

/// Timing and retry knobs for the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Engine start attempts and the spacing between them.
    pub start_backoff: BackoffPolicy,
    /// How many times to read the input format before an attempt gives up on it.
    pub format_polls: u32,
    pub format_poll_interval: Duration,
    /// Time allowed for a listening confirmation after start.
    pub watchdog_timeout: Duration,
    /// Hard limit for a single extension while the engine reports `Starting`.
    pub watchdog_ceiling: Duration,
    pub health_check_delay: Duration,
    pub max_silent_restarts: u32,
    /// Route changes inside this window after a restart are ignored.
    pub restart_grace: Duration,
    pub silence: SilenceConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            start_backoff: BackoffPolicy::exponential(
                3,
                Duration::from_millis(150),
                Duration::from_millis(600),
            ),
            format_polls: 5,
            format_poll_interval: Duration::from_millis(50),
            watchdog_timeout: Duration::from_millis(2500),
            watchdog_ceiling: Duration::from_secs(6),
            health_check_delay: Duration::from_millis(900),
            max_silent_restarts: 3,
            restart_grace: Duration::from_secs(1),
            silence: SilenceConfig::default(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing;
