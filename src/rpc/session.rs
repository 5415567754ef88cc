//! Subprocess-backed JSON-RPC session.
//!
//! One reader task owns the inbound half and is the single dispatch point for
//! responses, notifications, and server requests, so same-method notifications
//! reach handlers in arrival order. One writer task drains an unbounded frame
//! queue into the outbound half. EOF, read/write failures, child exit, and
//! `stop()` all converge on [`Shared::close`], which runs its body once.

use super::codec::{encode, ErrorObject, FrameReader, RequestId, RpcMessage};
use super::protocol::METHOD_NOT_FOUND;
use crate::app::logging::Logger;
use crate::error::{RpcError, TransportError};
use crate::lock_or_recover;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

pub type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync>;
pub type ServerRequestHandler = Arc<dyn Fn(Value) -> Result<Value, RpcError> + Send + Sync>;
pub type DisconnectHandler = Arc<dyn Fn(TransportError) + Send + Sync>;

/// How to launch the agent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl AgentCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        shell_words::join(parts)
    }
}

type ResultSlot = oneshot::Sender<Result<Value, RpcError>>;

#[derive(Default)]
struct PendingTable {
    closed: Option<TransportError>,
    slots: HashMap<i64, ResultSlot>,
}

#[derive(Default)]
struct Handlers {
    notifications: HashMap<String, NotificationHandler>,
    requests: HashMap<String, ServerRequestHandler>,
    disconnect: Vec<DisconnectHandler>,
}

struct Shared {
    next_id: AtomicI64,
    pending: Mutex<PendingTable>,
    handlers: Mutex<Handlers>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    closed_tx: watch::Sender<bool>,
    log: Logger,
}

impl Shared {
    /// Fail every pending call, drop handlers, and notify disconnect listeners.
    /// Returns false if the session was already closed.
    fn close(&self, reason: TransportError) -> bool {
        let slots = {
            let mut pending = lock_or_recover(&self.pending, "rpc pending");
            if pending.closed.is_some() {
                return false;
            }
            pending.closed = Some(reason.clone());
            std::mem::take(&mut pending.slots)
        };
        if !slots.is_empty() {
            self.log
                .debug(&format!("failing {} pending call(s): {reason}", slots.len()));
        }
        for (_, slot) in slots {
            let _ = slot.send(Err(RpcError::Transport(reason.clone())));
        }
        let _ = self.closed_tx.send(true);

        let disconnect = {
            let mut handlers = lock_or_recover(&self.handlers, "rpc handlers");
            handlers.notifications.clear();
            handlers.requests.clear();
            std::mem::take(&mut handlers.disconnect)
        };
        if reason == TransportError::Stopped {
            self.log.info("session stopped");
        } else {
            self.log.warn(&format!("session closed: {reason}"));
            for handler in disconnect {
                handler(reason.clone());
            }
        }
        true
    }

    fn closed_reason(&self) -> Option<TransportError> {
        lock_or_recover(&self.pending, "rpc pending").closed.clone()
    }

    fn send_frame(&self, message: &RpcMessage) -> Result<(), RpcError> {
        let frame = encode(message).map_err(|err| RpcError::Encode {
            method: message.method().unwrap_or("response").to_string(),
            message: err.to_string(),
        })?;
        if self.outbound.send(frame).is_err() {
            return Err(self.closed_reason().unwrap_or(TransportError::Stopped).into());
        }
        Ok(())
    }

    fn dispatch(&self, message: RpcMessage) {
        match message {
            RpcMessage::Response { id, result } => self.resolve(&id, Ok(result)),
            RpcMessage::Error { id, error } => self.resolve(
                &id,
                Err(RpcError::Remote {
                    code: error.code,
                    message: error.message,
                }),
            ),
            RpcMessage::Notification { method, params } => {
                let handler = lock_or_recover(&self.handlers, "rpc handlers")
                    .notifications
                    .get(&method)
                    .cloned();
                match handler {
                    Some(handler) => handler(params),
                    None => self.log.debug(&format!("unhandled notification {method}")),
                }
            }
            RpcMessage::Request { id, method, params } => {
                let handler = lock_or_recover(&self.handlers, "rpc handlers")
                    .requests
                    .get(&method)
                    .cloned();
                let reply = match handler {
                    Some(handler) => match handler(params) {
                        Ok(result) => RpcMessage::Response { id, result },
                        Err(err) => RpcMessage::Error {
                            id,
                            error: ErrorObject::new(err.code(), err.to_string()),
                        },
                    },
                    None => {
                        self.log
                            .warn(&format!("rejecting unknown server request {method}"));
                        RpcMessage::Error {
                            id,
                            error: ErrorObject::new(
                                Some(METHOD_NOT_FOUND),
                                format!("method not found: {method}"),
                            ),
                        }
                    }
                };
                if let Err(err) = self.send_frame(&reply) {
                    self.log.warn(&format!("failed to answer server request: {err}"));
                }
            }
        }
    }

    fn resolve(&self, id: &RequestId, result: Result<Value, RpcError>) {
        let slot = id.as_integer().and_then(|id| {
            lock_or_recover(&self.pending, "rpc pending")
                .slots
                .remove(&id)
        });
        match slot {
            Some(slot) => {
                let _ = slot.send(result);
            }
            None => self.log.warn(&format!("response for unknown request id {id}")),
        }
    }
}

/// Live connection to one agent process.
pub struct RpcSession {
    shared: Arc<Shared>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RpcSession {
    /// Spawn the agent and wire its stdio. Must run inside a tokio runtime.
    pub fn start(command: &AgentCommand, log: Logger) -> Result<Self, TransportError> {
        let spawn_error = |message: String| TransportError::ProcessSpawn {
            command: command.display(),
            message,
        };
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }
        let mut child = cmd.spawn().map_err(|err| spawn_error(err.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("stdout unavailable".to_string()))?;
        let stderr = child.stderr.take();
        log.info(&format!(
            "spawned agent `{}` (pid {:?})",
            command.display(),
            child.id()
        ));

        let session = Self::from_io(stdout, stdin, log);

        if let Some(stderr) = stderr {
            let log = session.shared.log.clone();
            let task = tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log.debug(&format!("[agent stderr] {line}"));
                }
            });
            session.push_task(task);
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let shared = Arc::clone(&session.shared);
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            let code = status.ok().and_then(|status| status.code());
            shared.close(TransportError::ProcessExited { code });
        });
        *lock_or_recover(&session.kill_tx, "rpc kill") = Some(kill_tx);
        Ok(session)
    }

    /// Session over arbitrary byte streams. EOF on `reader` counts as process exit.
    pub fn from_io<R, W>(reader: R, writer: W, log: Logger) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            next_id: AtomicI64::new(1),
            pending: Mutex::new(PendingTable::default()),
            handlers: Mutex::new(Handlers::default()),
            outbound,
            closed_tx,
            log,
        });

        let writer_task = tokio::spawn(write_loop(
            writer,
            outbound_rx,
            closed_rx,
            Arc::clone(&shared),
        ));
        let reader_task = tokio::spawn(read_loop(reader, Arc::clone(&shared)));

        Self {
            shared,
            kill_tx: Mutex::new(None),
            tasks: Mutex::new(vec![writer_task, reader_task]),
        }
    }

    fn push_task(&self, task: JoinHandle<()>) {
        lock_or_recover(&self.tasks, "rpc tasks").push(task);
    }

    /// Send a request and wait for its response or for the session to die.
    pub async fn call(&self, method: &str, params: impl Serialize) -> Result<Value, RpcError> {
        let params = serde_json::to_value(params).map_err(|err| RpcError::Encode {
            method: method.to_string(),
            message: err.to_string(),
        })?;
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock_or_recover(&self.shared.pending, "rpc pending");
            if let Some(reason) = pending.closed.clone() {
                return Err(reason.into());
            }
            pending.slots.insert(id, tx);
        }
        self.shared.log.debug(&format!("-> {method} #{id}"));
        let sent = self.shared.send_frame(&RpcMessage::Request {
            id: RequestId::Integer(id),
            method: method.to_string(),
            params,
        });
        if let Err(err) = sent {
            lock_or_recover(&self.shared.pending, "rpc pending")
                .slots
                .remove(&id);
            return Err(err);
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(self
                .shared
                .closed_reason()
                .unwrap_or(TransportError::Stopped)
                .into()),
        }
    }

    /// `call` plus decoding of the result.
    pub async fn call_typed<R: DeserializeOwned>(
        &self,
        method: &str,
        params: impl Serialize,
    ) -> Result<R, RpcError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|err| RpcError::InvalidResult {
            method: method.to_string(),
            message: err.to_string(),
        })
    }

    /// Fire-and-forget notification.
    pub fn notify(&self, method: &str, params: impl Serialize) -> Result<(), RpcError> {
        if let Some(reason) = self.shared.closed_reason() {
            return Err(reason.into());
        }
        let params = serde_json::to_value(params).map_err(|err| RpcError::Encode {
            method: method.to_string(),
            message: err.to_string(),
        })?;
        self.shared.send_frame(&RpcMessage::Notification {
            method: method.to_string(),
            params,
        })
    }

    /// Replace the handler for `method`. Handlers run on the dispatch task and must not block.
    pub fn on_notification(&self, method: &str, handler: impl Fn(Value) + Send + Sync + 'static) {
        lock_or_recover(&self.shared.handlers, "rpc handlers")
            .notifications
            .insert(method.to_string(), Arc::new(handler));
    }

    pub fn on_server_request(
        &self,
        method: &str,
        handler: impl Fn(Value) -> Result<Value, RpcError> + Send + Sync + 'static,
    ) {
        lock_or_recover(&self.shared.handlers, "rpc handlers")
            .requests
            .insert(method.to_string(), Arc::new(handler));
    }

    /// Called once with the reason when the transport dies. Not called for `stop()`.
    pub fn on_disconnect(&self, handler: impl Fn(TransportError) + Send + Sync + 'static) {
        lock_or_recover(&self.shared.handlers, "rpc handlers")
            .disconnect
            .push(Arc::new(handler));
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed_reason().is_some()
    }

    pub fn closed_reason(&self) -> Option<TransportError> {
        self.shared.closed_reason()
    }

    /// Kill the agent, fail pending calls, drop handlers. Safe to call repeatedly.
    pub fn stop(&self) {
        self.shared.close(TransportError::Stopped);
        if let Some(kill) = lock_or_recover(&self.kill_tx, "rpc kill").take() {
            let _ = kill.send(());
        }
        for task in lock_or_recover(&self.tasks, "rpc tasks").drain(..) {
            task.abort();
        }
    }
}

impl Drop for RpcSession {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn read_loop<R: AsyncRead + Unpin>(reader: R, shared: Arc<Shared>) {
    let mut frames = FrameReader::new(reader);
    loop {
        match frames.next_message().await {
            Ok(Some(Ok(message))) => shared.dispatch(message),
            Ok(Some(Err(err))) => shared.log.warn(&err.to_string()),
            Ok(None) => {
                shared.close(TransportError::ProcessExited { code: None });
                return;
            }
            Err(err) => {
                shared.close(TransportError::Io(err.to_string()));
                return;
            }
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    mut closed: watch::Receiver<bool>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { return };
                let written = async {
                    writer.write_all(&frame).await?;
                    writer.flush().await
                }
                .await;
                if let Err(err) = written {
                    shared.close(TransportError::Io(err.to_string()));
                    return;
                }
            }
            changed = closed.changed() => {
                if changed.is_err() || *closed.borrow() {
                    let _ = writer.shutdown().await;
                    return;
                }
            }
        }
    }
}
