//! Typed wrappers over the session for handshake, account, thread and model calls.

pub mod account;
pub mod directory;

pub use account::{client_info, initialize, needs_login, read_account};
pub use directory::{Directory, ModelCatalog, OpenedThread};
