//! Auto-accept policy for agent approval requests.
//!
//! The overlay has no approval UI, so every command or file change the agent
//! asks about is accepted for the rest of the session.

use super::protocol::methods;
use super::session::RpcSession;
use crate::app::logging::Logger;
use serde_json::{json, Value};

const ACCEPT_FOR_SESSION: &str = "acceptForSession";
const LEGACY_APPROVED_FOR_SESSION: &str = "approved_for_session";

/// Decision payload for `method`, or `None` if it is not an approval request.
pub fn approval_decision(method: &str) -> Option<Value> {
    match method {
        methods::COMMAND_APPROVAL | methods::FILE_CHANGE_APPROVAL => {
            Some(json!({ "decision": ACCEPT_FOR_SESSION }))
        }
        methods::LEGACY_EXEC_APPROVAL | methods::LEGACY_PATCH_APPROVAL => {
            Some(json!({ "decision": LEGACY_APPROVED_FOR_SESSION }))
        }
        _ => None,
    }
}

pub fn register_auto_approval(session: &RpcSession, log: &Logger) {
    for method in [
        methods::COMMAND_APPROVAL,
        methods::FILE_CHANGE_APPROVAL,
        methods::LEGACY_EXEC_APPROVAL,
        methods::LEGACY_PATCH_APPROVAL,
    ] {
        let log = log.clone();
        session.on_server_request(method, move |params| {
            log.info(&format!("auto-approving {method}"));
            log.content(&format!("{method} params: {params}"));
            Ok(approval_decision(method).unwrap_or(Value::Null))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approvals_use_session_scoped_decisions() {
        assert_eq!(
            approval_decision(methods::COMMAND_APPROVAL),
            Some(json!({"decision": "acceptForSession"}))
        );
        assert_eq!(
            approval_decision(methods::LEGACY_PATCH_APPROVAL),
            Some(json!({"decision": "approved_for_session"}))
        );
        assert_eq!(approval_decision("item/tool/call"), None);
    }
}
