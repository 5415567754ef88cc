//! Voice turn control for `codex app-server`.
//!
//! Lines typed on stdin stand in for the microphone; `/help` lists commands.

use anyhow::Result;
use voxterm_core::app::{self, init_logging, install_panic_hook, log_file_path};
use voxterm_core::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    let log = init_logging(&config);
    install_panic_hook();
    log.info(&format!(
        "=== voxterm-core {} started ===",
        env!("CARGO_PKG_VERSION")
    ));
    log.debug(&format!("log file: {:?}", log_file_path()));

    let result = app::run(config, log.clone()).await;
    if let Err(err) = &result {
        log.error(&format!("exiting: {err:#}"));
    }
    result
}
