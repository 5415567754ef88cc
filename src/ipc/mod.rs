//! UI event protocol.
//!
//! The core never renders anything itself. It emits [`UiEvent`]s through a
//! [`UiSink`] and accepts [`UiCommand`]s parsed from JSON lines or console
//! slash commands.
//!
//! Protocol:
//! - Each line is a JSON object
//! - Events (core → UI): {"event": "...", ...}
//! - Commands (UI → core): {"cmd": "...", ...}

mod protocol;
mod router;
mod sink;

#[cfg(test)]
mod tests;

pub use protocol::{ModelEntry, ThreadEntry, UiCommand, UiEvent};
pub use router::{parse_input, ParsedInput, HELP_TEXT};
pub use sink::{JsonLinesSink, NullSink, UiSink};
