use crate::config::AppConfig;
use std::{
    env, fs,
    io::{self, Write},
    panic,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

pub(crate) const LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;
const CRASH_LOG_MAX_BYTES: u64 = 256 * 1024;
static CRASH_LOG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Path to the rotating JSON log. `VOXTERM_CORE_LOG` overrides the temp-dir default.
pub fn log_file_path() -> PathBuf {
    env::var("VOXTERM_CORE_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("voxterm_core.log"))
}

/// Path to the crash log file (metadata only).
pub fn crash_log_path() -> PathBuf {
    env::temp_dir().join("voxterm_core_crash.log")
}

/// Component-scoped logging handle.
///
/// Every long-lived piece of the core (session, supervisor, controller) is
/// handed one of these at construction instead of reaching for a global.
/// Events go through `tracing` with the component name attached, so the
/// subscriber installed by [`init_logging`] decides where they end up.
#[derive(Debug, Clone)]
pub struct Logger {
    component: &'static str,
    content: bool,
}

impl Logger {
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            content: false,
        }
    }

    /// Allow logging of user content (transcripts, prompts, reply text).
    pub fn with_content(mut self, enabled: bool) -> Self {
        self.content = enabled;
        self
    }

    /// Same content policy, different component label.
    pub fn scoped(&self, component: &'static str) -> Self {
        Self {
            component,
            content: self.content,
        }
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    pub fn debug(&self, msg: &str) {
        tracing::debug!(component = self.component, "{msg}");
    }

    pub fn info(&self, msg: &str) {
        tracing::info!(component = self.component, "{msg}");
    }

    pub fn warn(&self, msg: &str) {
        tracing::warn!(component = self.component, "{msg}");
    }

    pub fn error(&self, msg: &str) {
        tracing::error!(component = self.component, "{msg}");
    }

    /// Debug line that may contain user content; dropped unless enabled.
    pub fn content(&self, msg: &str) {
        if self.content {
            self.debug(msg);
        }
    }
}

/// Size-capped append-only file that truncates itself once it would grow past `max_bytes`.
pub(crate) struct LogWriter {
    path: PathBuf,
    file: fs::File,
    max_bytes: u64,
    bytes_written: u64,
}

impl LogWriter {
    pub(crate) fn new(path: PathBuf, max_bytes: u64) -> Option<Self> {
        let mut bytes_written = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if bytes_written > max_bytes {
            let _ = fs::remove_file(&path);
            bytes_written = 0;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()?;
        Some(Self {
            path,
            file,
            max_bytes,
            bytes_written,
        })
    }

    fn rotate_if_needed(&mut self, next_len: usize) {
        if self.bytes_written.saturating_add(next_len as u64) <= self.max_bytes {
            return;
        }
        if let Ok(file) = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
        {
            self.file = file;
            self.bytes_written = 0;
        }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.rotate_if_needed(buf.len());
        let written = self.file.write(buf)?;
        self.bytes_written = self.bytes_written.saturating_add(written as u64);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Configure logging from CLI flags and return the root logger for the runtime.
pub fn init_logging(config: &AppConfig) -> Logger {
    let enabled = config.logs && !config.no_logs;
    CRASH_LOG_ENABLED.store(enabled, Ordering::Relaxed);
    if enabled {
        super::telemetry::init_tracing(log_file_path());
    }
    Logger::new("voxterm").with_content(enabled && config.log_content)
}

/// Chain a hook that records panics in the crash log before the default output.
pub fn install_panic_hook() {
    static PANIC_HOOK_INSTALLED: std::sync::OnceLock<()> = std::sync::OnceLock::new();
    PANIC_HOOK_INSTALLED.get_or_init(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            log_panic(info);
            previous(info);
        }));
    });
}

/// Write a minimal crash log entry. Panic payloads can carry transcript text, so only
/// the location is recorded.
pub fn log_panic(info: &panic::PanicHookInfo<'_>) {
    if !CRASH_LOG_ENABLED.load(Ordering::Relaxed) {
        return;
    }

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let location = info
        .location()
        .map(|loc| format!("{}:{}", loc.file(), loc.line()))
        .unwrap_or_else(|| "unknown".to_string());
    let line = format!(
        "[{timestamp}] panic at {location} (v{})\n",
        env!("CARGO_PKG_VERSION")
    );
    if let Some(mut writer) = LogWriter::new(crash_log_path(), CRASH_LOG_MAX_BYTES) {
        let _ = writer.write_all(line.as_bytes());
    }
}
