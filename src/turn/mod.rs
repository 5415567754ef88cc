//! Voice turn orchestration.
//!
//! [`TurnController`] decides when to listen, when to send, when to
//! interrupt, and when to speak. Everything else reports to it through
//! [`TurnInput`] messages.

mod controller;
mod events;
mod state;

pub use controller::{TurnConfig, TurnController, TurnHandle, TurnParts};
pub use events::{register_turn_handlers, TurnInput};
pub use state::{AutoListen, ListenSession, ReasoningBuffer, TurnSnapshot, TurnState};

#[cfg(test)]
mod tests;
