//! Command-line parsing and validation helpers.

mod defaults;
mod validation;

use clap::{ArgAction, Parser};
use std::path::PathBuf;

pub use defaults::*;

/// CLI options for the voice core. Validated values keep the agent subprocess safe.
#[derive(Debug, Parser, Clone)]
#[command(
    name = "voxterm-core",
    about = "Voice turn control for codex app-server",
    author,
    version
)]
pub struct AppConfig {
    /// Agent binary (`codex` or an absolute path)
    #[arg(long = "agent-cmd", env = "VOXTERM_AGENT_CMD", default_value = DEFAULT_AGENT_CMD)]
    pub agent_cmd: String,

    /// Arguments passed to the agent (repeatable)
    #[arg(
        long = "agent-arg",
        action = ArgAction::Append,
        value_name = "ARG",
        default_value = DEFAULT_AGENT_ARG
    )]
    pub agent_args: Vec<String>,

    /// Working directory for the agent and new threads
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Model for new turns (defaults to the agent's default model)
    #[arg(long)]
    pub model: Option<String>,

    /// Reasoning effort for new turns
    #[arg(long)]
    pub effort: Option<String>,

    /// Resume this thread instead of starting a new one
    #[arg(long = "thread", value_name = "THREAD_ID")]
    pub thread_id: Option<String>,

    /// Print stored threads and exit
    #[arg(long = "list-threads", default_value_t = false)]
    pub list_threads: bool,

    /// Print available models and exit
    #[arg(long = "list-models", default_value_t = false)]
    pub list_models: bool,

    /// Read completed replies aloud
    #[arg(long = "speak-replies", default_value_t = false)]
    pub speak_replies: bool,

    /// TTS command; the reply text is appended as the last argument
    #[arg(long = "tts-cmd", value_name = "COMMAND")]
    pub tts_cmd: Option<String>,

    /// Do not start listening automatically when idle
    #[arg(long = "no-auto-listen", default_value_t = false)]
    pub no_auto_listen: bool,

    /// Emit UI events as JSON lines on stdout instead of console text
    #[arg(long = "json-ipc", default_value_t = false)]
    pub json_ipc: bool,

    /// Quiet time that ends an utterance (milliseconds)
    #[arg(long = "silence-window-ms", default_value_t = DEFAULT_SILENCE_WINDOW_MS)]
    pub silence_window_ms: u64,

    /// Quiet time before the silence timer arms (milliseconds)
    #[arg(long = "silence-debounce-ms", default_value_t = DEFAULT_SILENCE_DEBOUNCE_MS)]
    pub silence_debounce_ms: u64,

    /// Input level (0..1) that counts as speech
    #[arg(long = "silence-threshold", default_value_t = DEFAULT_SILENCE_THRESHOLD)]
    pub silence_threshold: f32,

    /// Level smoothing window (frames)
    #[arg(
        long = "silence-smoothing-frames",
        default_value_t = DEFAULT_SILENCE_SMOOTHING_FRAMES
    )]
    pub silence_smoothing_frames: usize,

    /// Time allowed for capture to confirm it is listening (milliseconds)
    #[arg(long = "watchdog-ms", default_value_t = DEFAULT_WATCHDOG_MS)]
    pub watchdog_ms: u64,

    /// Hard limit for a slow capture start (milliseconds)
    #[arg(long = "watchdog-ceiling-ms", default_value_t = DEFAULT_WATCHDOG_CEILING_MS)]
    pub watchdog_ceiling_ms: u64,

    /// Delay before the post-start health check (milliseconds)
    #[arg(long = "health-check-ms", default_value_t = DEFAULT_HEALTH_CHECK_MS)]
    pub health_check_ms: u64,

    /// Auto-listen pause after a transient failure (milliseconds)
    #[arg(long = "error-cooldown-ms", default_value_t = DEFAULT_ERROR_COOLDOWN_MS)]
    pub error_cooldown_ms: u64,

    /// turn/interrupt attempts before giving up
    #[arg(long = "interrupt-attempts", default_value_t = DEFAULT_INTERRUPT_ATTEMPTS)]
    pub interrupt_attempts: u32,

    /// Spacing between turn/interrupt attempts (milliseconds)
    #[arg(long = "interrupt-spacing-ms", default_value_t = DEFAULT_INTERRUPT_SPACING_MS)]
    pub interrupt_spacing_ms: u64,

    /// Agent restarts after a disconnect (0 disables reconnecting)
    #[arg(long = "reconnect-attempts", default_value_t = DEFAULT_RECONNECT_ATTEMPTS)]
    pub reconnect_attempts: u32,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "VOXTERM_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "VOXTERM_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow logging transcripts, prompts and replies (debug log only)
    #[arg(
        long = "log-content",
        env = "VOXTERM_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,
}
