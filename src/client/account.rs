//! Handshake and account calls.

use crate::error::{RpcError, TransportError};
use crate::lock_or_recover;
use crate::rpc::protocol::{
    methods, AccountReadParams, AccountReadResponse, ClientInfo, InitializeParams,
    InitializeResponse, LoginCompletedNotification, LoginStartParams, LoginStartResponse,
};
use crate::rpc::RpcSession;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

pub fn client_info() -> ClientInfo {
    ClientInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        title: Some("VoxTerm".to_string()),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// `initialize` followed by the `initialized` notification.
///
/// Anything other than a JSON object back means the process on the other end
/// is not an app-server.
pub async fn initialize(
    session: &RpcSession,
    info: ClientInfo,
) -> Result<InitializeResponse, RpcError> {
    let value = session
        .call(methods::INITIALIZE, InitializeParams { client_info: info })
        .await?;
    if !value.is_object() {
        return Err(TransportError::MalformedHandshake(format!(
            "initialize returned {value}"
        ))
        .into());
    }
    let response = serde_json::from_value(value).map_err(|err| {
        RpcError::from(TransportError::MalformedHandshake(err.to_string()))
    })?;
    session.notify(methods::INITIALIZED, Value::Null)?;
    Ok(response)
}

pub async fn read_account(
    session: &RpcSession,
    refresh_token: bool,
) -> Result<AccountReadResponse, RpcError> {
    session
        .call_typed(methods::ACCOUNT_READ, AccountReadParams { refresh_token })
        .await
}

/// True when the agent has no account and requires one.
pub fn needs_login(account: &AccountReadResponse) -> bool {
    account.account.is_none() && account.requires_openai_auth
}

/// Start the ChatGPT browser login. Subscribe to completion first with
/// [`login_completed`] so a fast completion is not missed.
pub async fn start_login(session: &RpcSession) -> Result<LoginStartResponse, RpcError> {
    session
        .call_typed(methods::ACCOUNT_LOGIN_START, LoginStartParams::Chatgpt)
        .await
}

/// Resolves on the next `account/login/completed` notification.
pub fn login_completed(session: &RpcSession) -> oneshot::Receiver<LoginCompletedNotification> {
    let (tx, rx) = oneshot::channel();
    let slot = Mutex::new(Some(tx));
    session.on_notification(methods::ACCOUNT_LOGIN_COMPLETED, move |params| {
        let note = serde_json::from_value::<LoginCompletedNotification>(params).unwrap_or_default();
        if let Some(tx) = lock_or_recover(&slot, "login slot").take() {
            let _ = tx.send(note);
        }
    });
    rx
}

/// Wait for a login started with [`start_login`].
pub async fn wait_for_login(
    completed: oneshot::Receiver<LoginCompletedNotification>,
    timeout: Duration,
) -> Result<LoginCompletedNotification, RpcError> {
    match tokio::time::timeout(timeout, completed).await {
        Ok(Ok(note)) => Ok(note),
        Ok(Err(_)) => Err(TransportError::Stopped.into()),
        Err(_) => Err(RpcError::remote("timed out waiting for login")),
    }
}
