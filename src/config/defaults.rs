//! Default values shared by the CLI definition and validation.

pub const DEFAULT_AGENT_CMD: &str = "codex";
pub const DEFAULT_AGENT_ARG: &str = "app-server";

pub const DEFAULT_SILENCE_WINDOW_MS: u64 = 1500;
pub const DEFAULT_SILENCE_DEBOUNCE_MS: u64 = 250;
pub const DEFAULT_SILENCE_THRESHOLD: f32 = 0.05;
pub const DEFAULT_SILENCE_SMOOTHING_FRAMES: usize = 3;

pub const DEFAULT_WATCHDOG_MS: u64 = 2500;
pub const DEFAULT_WATCHDOG_CEILING_MS: u64 = 6000;
pub const DEFAULT_HEALTH_CHECK_MS: u64 = 900;
pub const DEFAULT_ERROR_COOLDOWN_MS: u64 = 3000;

pub const DEFAULT_INTERRUPT_ATTEMPTS: u32 = 3;
pub const DEFAULT_INTERRUPT_SPACING_MS: u64 = 250;
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

/// Upper bound for any millisecond knob.
pub(super) const MAX_TIMING_MS: u64 = 60_000;
pub(super) const MAX_AGENT_ARGS: usize = 32;
pub(super) const MAX_AGENT_ARG_BYTES: usize = 8 * 1024;

pub(super) const KNOWN_EFFORTS: &[&str] = &["none", "minimal", "low", "medium", "high", "xhigh"];
