//! Application edge: logging setup, the console front end and the runner.

pub mod console;
pub mod logging;
mod runner;
mod telemetry;

pub use logging::{init_logging, install_panic_hook, log_file_path, Logger};
pub use runner::run;
