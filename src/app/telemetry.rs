use super::logging::{LogWriter, LOG_MAX_BYTES};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install the JSON subscriber once per process. `RUST_LOG` narrows the level;
/// the default keeps debug output from this crate only.
pub(crate) fn init_tracing(path: PathBuf) {
    let _ = TRACING_INIT.get_or_init(|| {
        let Some(writer) = LogWriter::new(path, LOG_MAX_BYTES) else {
            return;
        };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("voxterm_core=debug"));
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_timer(UtcTime::rfc_3339())
            .with_env_filter(filter)
            .with_writer(Mutex::new(writer))
            .with_current_span(false)
            .with_span_list(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
