//! Control core for a voice overlay on `codex app-server`.
//!
//! Three pieces do the work: [`rpc`] talks JSON-RPC to the agent subprocess,
//! [`capture`] supervises the speech capture engine, and [`turn`] decides
//! what happens next. [`app`] wires them together for the binary.

pub mod app;
pub mod backoff;
pub mod capture;
pub mod client;
pub mod config;
pub mod error;
pub mod ipc;
mod lock;
pub mod rpc;
pub mod speech;
pub mod thread;
pub mod transcript;
pub mod turn;

pub(crate) use lock::lock_or_recover;
