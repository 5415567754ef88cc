use super::defaults::{KNOWN_EFFORTS, MAX_AGENT_ARGS, MAX_AGENT_ARG_BYTES, MAX_TIMING_MS};
use super::AppConfig;
use crate::backoff::BackoffPolicy;
use crate::capture::{CaptureConfig, SilenceConfig};
use crate::rpc::AgentCommand;
use crate::turn::TurnConfig;
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::{fs, path::Path, time::Duration};

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize paths.
    pub fn validate(&mut self) -> Result<()> {
        check_ms("--silence-window-ms", self.silence_window_ms, 200)?;
        check_ms("--silence-debounce-ms", self.silence_debounce_ms, 0)?;
        if self.silence_debounce_ms >= self.silence_window_ms {
            bail!(
                "--silence-debounce-ms ({}) must be shorter than --silence-window-ms ({})",
                self.silence_debounce_ms,
                self.silence_window_ms
            );
        }
        if !(0.0..=1.0).contains(&self.silence_threshold) {
            bail!(
                "--silence-threshold must be between 0.0 and 1.0, got {}",
                self.silence_threshold
            );
        }
        if !(1..=10).contains(&self.silence_smoothing_frames) {
            bail!(
                "--silence-smoothing-frames must be between 1 and 10, got {}",
                self.silence_smoothing_frames
            );
        }

        check_ms("--watchdog-ms", self.watchdog_ms, 100)?;
        check_ms("--watchdog-ceiling-ms", self.watchdog_ceiling_ms, 100)?;
        if self.watchdog_ceiling_ms < self.watchdog_ms {
            bail!(
                "--watchdog-ceiling-ms ({}) cannot be shorter than --watchdog-ms ({})",
                self.watchdog_ceiling_ms,
                self.watchdog_ms
            );
        }
        check_ms("--health-check-ms", self.health_check_ms, 50)?;
        check_ms("--error-cooldown-ms", self.error_cooldown_ms, 0)?;
        check_ms("--interrupt-spacing-ms", self.interrupt_spacing_ms, 0)?;
        if !(1..=10).contains(&self.interrupt_attempts) {
            bail!(
                "--interrupt-attempts must be between 1 and 10, got {}",
                self.interrupt_attempts
            );
        }
        if self.reconnect_attempts > 20 {
            bail!(
                "--reconnect-attempts must be between 0 and 20, got {}",
                self.reconnect_attempts
            );
        }

        self.agent_cmd = sanitize_binary(&self.agent_cmd, "--agent-cmd", &["codex"])?;

        // Avoid huge argument lists when spawning the agent.
        if self.agent_args.len() > MAX_AGENT_ARGS {
            bail!(
                "--agent-arg repeated too many times (max {MAX_AGENT_ARGS}, got {})",
                self.agent_args.len()
            );
        }
        let total_arg_bytes: usize = self.agent_args.iter().map(|arg| arg.len()).sum();
        if total_arg_bytes > MAX_AGENT_ARG_BYTES {
            bail!("combined --agent-arg length exceeds {MAX_AGENT_ARG_BYTES} bytes");
        }
        if self
            .agent_args
            .iter()
            .any(|arg| arg.contains(['\0', '\n', '\r']))
        {
            bail!("--agent-arg values must not contain control characters");
        }

        if let Some(cwd) = &self.cwd {
            let canonical = cwd
                .canonicalize()
                .with_context(|| format!("failed to canonicalize --cwd '{}'", cwd.display()))?;
            if !canonical.is_dir() {
                bail!("--cwd '{}' is not a directory", canonical.display());
            }
            self.cwd = Some(canonical);
        }

        if let Some(effort) = &self.effort {
            let normalized = effort.trim().to_ascii_lowercase();
            if !KNOWN_EFFORTS.contains(&normalized.as_str()) {
                bail!("--effort must be one of {KNOWN_EFFORTS:?}, got '{effort}'");
            }
            self.effort = Some(normalized);
        }
        self.model = non_empty(self.model.take());
        self.thread_id = non_empty(self.thread_id.take());

        if let Some(tts) = &self.tts_cmd {
            let parts = shell_words::split(tts).map_err(|err| anyhow!("--tts-cmd: {err}"))?;
            if parts.is_empty() {
                bail!("--tts-cmd cannot be empty");
            }
        }
        if self.list_threads && self.list_models {
            bail!("--list-threads and --list-models are mutually exclusive");
        }

        Ok(())
    }

    pub fn auto_listen(&self) -> bool {
        !self.no_auto_listen
    }

    /// Snapshot the capture timing settings for the supervisor.
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            watchdog_timeout: Duration::from_millis(self.watchdog_ms),
            watchdog_ceiling: Duration::from_millis(self.watchdog_ceiling_ms),
            health_check_delay: Duration::from_millis(self.health_check_ms),
            silence: SilenceConfig {
                threshold: self.silence_threshold,
                window: Duration::from_millis(self.silence_window_ms),
                debounce: Duration::from_millis(self.silence_debounce_ms),
                smoothing_frames: self.silence_smoothing_frames,
            },
            ..CaptureConfig::default()
        }
    }

    pub fn turn_config(&self) -> TurnConfig {
        TurnConfig {
            model: self.model.clone(),
            effort: self.effort.clone(),
            speak_replies: self.speak_replies,
            auto_listen: self.auto_listen(),
            interrupt_backoff: BackoffPolicy::fixed(
                self.interrupt_attempts,
                Duration::from_millis(self.interrupt_spacing_ms),
            ),
            error_cooldown: Duration::from_millis(self.error_cooldown_ms),
        }
    }

    /// Delays between agent restarts after a disconnect.
    pub fn reconnect_policy(&self) -> BackoffPolicy {
        BackoffPolicy::exponential(
            self.reconnect_attempts,
            Duration::from_millis(500),
            Duration::from_secs(8),
        )
        .with_jitter(0.2)
    }

    pub fn agent_command(&self) -> AgentCommand {
        let mut command = AgentCommand::new(self.agent_cmd.clone());
        for arg in &self.agent_args {
            command = command.arg(arg.clone());
        }
        command.cwd = self.cwd.clone();
        command
    }
}

fn check_ms(flag: &str, value: u64, min: u64) -> Result<()> {
    if !(min..=MAX_TIMING_MS).contains(&value) {
        bail!("{flag} must be between {min} and {MAX_TIMING_MS} ms, got {value}");
    }
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Allow either a known binary name or an absolute path.
pub(super) fn sanitize_binary(value: &str, flag: &str, allowlist: &[&str]) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("{flag} cannot be empty");
    }
    if let Some(allowed) = allowlist
        .iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(trimmed))
    {
        return Ok((*allowed).to_string());
    }

    let path = Path::new(trimmed);
    if path.is_absolute() || trimmed.contains(std::path::MAIN_SEPARATOR) {
        let canonical = path
            .canonicalize()
            .with_context(|| format!("failed to canonicalize {flag} '{trimmed}'"))?;
        let metadata = fs::metadata(&canonical)
            .with_context(|| format!("failed to inspect {flag} '{}'", canonical.display()))?;
        if !metadata.is_file() {
            bail!("{flag} '{}' is not a file", canonical.display());
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = metadata.permissions().mode();
            if mode & 0o111 == 0 {
                bail!(
                    "{flag} '{}' exists but is not executable (mode {:o})",
                    canonical.display(),
                    mode
                );
            }
        }
        return canonical
            .to_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("{flag} must be valid UTF-8"));
    }

    bail!("{flag} must be one of {allowlist:?} or an existing binary path");
}
