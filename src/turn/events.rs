//! Controller mailbox inputs and the RPC handlers that produce them.

use super::state::TurnSnapshot;
use crate::app::logging::Logger;
use crate::capture::{CaptureEvent, StartOutcome};
use crate::error::{CaptureError, RpcError, SpeechError, TransportError};
use crate::rpc::protocol::{
    methods, DeltaNotification, ErrorNotification, SummaryPartAddedNotification,
    TurnCompletedNotification, TurnStartedNotification, TurnStatus,
};
use crate::rpc::RpcSession;
use crate::speech::SpeechEvent;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// Everything the controller reacts to, in arrival order.
#[derive(Debug)]
pub enum TurnInput {
    // user
    StartListen,
    /// Barge-in. `None` means "interrupt and listen now".
    UserRequestsNewTurn { text: Option<String> },
    /// Interrupt without a follow-up.
    Interrupt,
    SetAutoListen(bool),
    EnableMic,

    // collaborators
    Capture(CaptureEvent),
    Speech(SpeechEvent),

    // agent
    RemoteTurnStarted { turn_id: String },
    RemoteReplyDelta { turn_id: Option<String>, delta: String },
    RemoteReasoningDelta { turn_id: Option<String>, delta: String },
    RemoteReasoningPartAdded { turn_id: Option<String> },
    RemoteTurnCompleted {
        turn_id: Option<String>,
        status: TurnStatus,
        error: Option<String>,
    },
    RemoteError { message: String, will_retry: bool },
    Disconnected(TransportError),

    // results of work the controller spawned
    CaptureStartFinished {
        listen_id: u64,
        result: Result<StartOutcome, CaptureError>,
    },
    TurnStartFinished { result: Result<String, RpcError> },
    InterruptFinished {
        turn_id: String,
        result: Result<u32, RpcError>,
    },
    SpeakFailed(SpeechError),
    ReArm,

    Snapshot(oneshot::Sender<TurnSnapshot>),
    Shutdown,
}

/// Route the agent's turn notifications for `thread_id` into the mailbox.
///
/// Handlers only decode and forward; all decisions happen in the controller.
pub fn register_turn_handlers(
    session: &RpcSession,
    thread_id: &str,
    inbox: mpsc::UnboundedSender<TurnInput>,
    log: &Logger,
) {
    let route = |method: &'static str, map: fn(Value, &str) -> Option<TurnInput>| {
        let inbox = inbox.clone();
        let log = log.clone();
        let thread_id = thread_id.to_string();
        session.on_notification(method, move |params| match map(params, &thread_id) {
            Some(input) => {
                let _ = inbox.send(input);
            }
            None => log.debug(&format!("dropped {method} notification")),
        });
    };

    route(methods::TURN_STARTED, |params, thread_id| {
        let note: TurnStartedNotification = decode(params)?;
        same_thread(note.thread_id.as_deref(), thread_id)?;
        Some(TurnInput::RemoteTurnStarted {
            turn_id: note.turn.id,
        })
    });
    route(methods::TURN_COMPLETED, |params, thread_id| {
        let note: TurnCompletedNotification = decode(params)?;
        same_thread(note.thread_id.as_deref(), thread_id)?;
        Some(TurnInput::RemoteTurnCompleted {
            turn_id: note.turn.id,
            status: note.turn.status,
            error: note.turn.error.map(|error| error.message),
        })
    });
    route(methods::AGENT_MESSAGE_DELTA, |params, thread_id| {
        let note: DeltaNotification = decode(params)?;
        same_thread(note.thread_id.as_deref(), thread_id)?;
        Some(TurnInput::RemoteReplyDelta {
            turn_id: note.turn_id,
            delta: note.delta,
        })
    });
    route(methods::REASONING_SUMMARY_DELTA, |params, thread_id| {
        let note: DeltaNotification = decode(params)?;
        same_thread(note.thread_id.as_deref(), thread_id)?;
        Some(TurnInput::RemoteReasoningDelta {
            turn_id: note.turn_id,
            delta: note.delta,
        })
    });
    route(methods::REASONING_SUMMARY_PART_ADDED, |params, _| {
        let note: SummaryPartAddedNotification = decode(params)?;
        Some(TurnInput::RemoteReasoningPartAdded {
            turn_id: note.turn_id,
        })
    });
    route(methods::ERROR, |params, _| {
        let note: ErrorNotification = decode(params)?;
        Some(TurnInput::RemoteError {
            message: note.error.message,
            will_retry: note.will_retry,
        })
    });

    let disconnect_inbox = inbox.clone();
    session.on_disconnect(move |reason| {
        let _ = disconnect_inbox.send(TurnInput::Disconnected(reason));
    });
}

fn decode<T: DeserializeOwned>(params: Value) -> Option<T> {
    serde_json::from_value(params).ok()
}

/// Notifications without a thread id are assumed to be ours.
fn same_thread(note_thread: Option<&str>, thread_id: &str) -> Option<()> {
    match note_thread {
        Some(other) if other != thread_id => None,
        _ => Some(()),
    }
}
