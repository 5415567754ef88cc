//! Line-delimited JSON-RPC plumbing to the agent subprocess.

pub mod approval;
pub mod codec;
pub mod protocol;
pub mod session;

pub use approval::register_auto_approval;
pub use codec::{ErrorObject, LineDecoder, RequestId, RpcMessage};
pub use session::{AgentCommand, RpcSession};

#[cfg(test)]
pub(crate) mod testing;
