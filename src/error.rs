//! Error taxonomy shared by the session, capture, and turn layers.
//!
//! Transport failures are fatal to a session, RPC errors are scoped to one
//! call, capture errors split into permission vs transient, and turn errors
//! reset the controller without retrying.

use thiserror::Error;

/// Session-fatal failures of the agent pipe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to spawn `{command}`: {message}")]
    ProcessSpawn { command: String, message: String },

    #[error("agent process exited{}", exit_suffix(.code))]
    ProcessExited { code: Option<i32> },

    #[error("agent pipe i/o failed: {0}")]
    Io(String),

    #[error("malformed handshake: {0}")]
    MalformedHandshake(String),

    #[error("session stopped")]
    Stopped,
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" with status {code}"),
        None => String::new(),
    }
}

/// Failure of a single `call()`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    #[error("agent error{}: {message}", code_suffix(.code))]
    Remote { code: Option<i64>, message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unexpected `{method}` result: {message}")]
    InvalidResult { method: String, message: String },

    #[error("failed to encode `{method}` params: {message}")]
    Encode { method: String, message: String },
}

fn code_suffix(code: &Option<i64>) -> String {
    match code {
        Some(code) => format!(" {code}"),
        None => String::new(),
    }
}

impl RpcError {
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            code: None,
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Remote { code, .. } => *code,
            _ => None,
        }
    }

    /// True when the call failed because the session itself is gone.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// One undecodable inbound line. The stream stays in sync after it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("undecodable frame ({reason}): {line}")]
pub struct MessageDecodeError {
    pub reason: String,
    pub line: String,
}

/// Capture engine failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("capture engine unavailable: {0}")]
    EngineUnavailable(String),
}

impl CaptureError {
    /// Permission failures are never retried.
    pub fn is_permission(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

/// Turn-level failures surfaced by the controller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TurnError {
    #[error("turn/start failed: {0}")]
    Start(RpcError),

    #[error("turn failed: {0}")]
    Remote(String),

    #[error("no active thread")]
    NoThread,
}

/// Speech output engine failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("speech output failed: {0}")]
pub struct SpeechError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_exit_message_includes_status_when_known() {
        let err = TransportError::ProcessExited { code: Some(3) };
        assert_eq!(err.to_string(), "agent process exited with status 3");
        let err = TransportError::ProcessExited { code: None };
        assert_eq!(err.to_string(), "agent process exited");
    }

    #[test]
    fn rpc_error_code_only_for_remote_errors() {
        let err = RpcError::Remote {
            code: Some(-32600),
            message: "bad".to_string(),
        };
        assert_eq!(err.code(), Some(-32600));
        assert_eq!(err.to_string(), "agent error -32600: bad");
        let err: RpcError = TransportError::Stopped.into();
        assert_eq!(err.code(), None);
        assert!(err.is_transport());
    }

    #[test]
    fn permission_errors_are_flagged() {
        assert!(CaptureError::PermissionDenied("denied".into()).is_permission());
        assert!(!CaptureError::EngineUnavailable("busy".into()).is_permission());
    }
}
