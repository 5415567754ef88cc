//! Process-level wiring: agent session, capture, speech and the turn
//! controller, driven by console or JSON-lines input.

use super::console::{ConsoleEngine, ConsoleSink};
use super::logging::Logger;
use crate::capture::CaptureSupervisor;
use crate::client::{self, account, Directory, OpenedThread};
use crate::config::AppConfig;
use crate::ipc::{
    parse_input, JsonLinesSink, ModelEntry, ParsedInput, ThreadEntry, UiCommand, UiEvent, UiSink,
    HELP_TEXT,
};
use crate::rpc::protocol::ThreadStartParams;
use crate::rpc::{register_auto_approval, RpcSession};
use crate::speech::{CommandSpeech, SilentSpeech, SpeechEngine};
use crate::thread::Role;
use crate::turn::{TurnController, TurnHandle, TurnParts, TurnSnapshot};
use anyhow::{anyhow, bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const LOGIN_TIMEOUT: Duration = Duration::from_secs(600);

struct Connection {
    session: Arc<RpcSession>,
    opened: OpenedThread,
}

enum Exit {
    Quit,
    Disconnected(String),
}

enum Flow {
    Continue,
    Quit,
}

/// Run until the user quits, stdin closes, or the agent cannot be reached.
pub async fn run(config: AppConfig, log: Logger) -> Result<()> {
    let ui: Arc<dyn UiSink> = if config.json_ipc {
        Arc::new(JsonLinesSink::stdout())
    } else {
        Arc::new(ConsoleSink::new())
    };

    if config.list_threads || config.list_models {
        let session = open_session(&config, &log, &ui).await?;
        let result = if config.list_threads {
            list_threads(&session, &ui, &log).await
        } else {
            list_models(&session, &ui, &log).await
        };
        session.stop();
        return result;
    }

    let mut connection = connect(&config, &log, &ui, config.thread_id.as_deref()).await?;

    let mut input = spawn_input_reader();
    loop {
        let thread_id = connection.opened.thread.id.clone();
        match drive(&config, &log, &ui, connection, &mut input).await? {
            Exit::Quit => return Ok(()),
            Exit::Disconnected(reason) => {
                if config.reconnect_attempts == 0 {
                    bail!("agent disconnected: {reason}");
                }
                ui.emit(UiEvent::Status {
                    message: "reconnecting to the agent".to_string(),
                });
                connection = reconnect(&config, &log, &ui, &thread_id).await?;
            }
        }
    }
}

async fn reconnect(
    config: &AppConfig,
    log: &Logger,
    ui: &Arc<dyn UiSink>,
    thread_id: &str,
) -> Result<Connection> {
    let policy = config.reconnect_policy();
    let (connection, attempts) = policy
        .retry(
            |attempt| {
                log.info(&format!("reconnect attempt {attempt}"));
                connect(config, log, ui, Some(thread_id))
            },
            |err: &anyhow::Error| {
                log.warn(&format!("reconnect failed: {err:#}"));
                true
            },
        )
        .await
        .context("giving up on reconnecting to the agent")?;
    log.info(&format!("reconnected after {attempts} attempt(s)"));
    Ok(connection)
}

/// Spawn the agent, handshake and log in if needed.
async fn open_session(config: &AppConfig, log: &Logger, ui: &Arc<dyn UiSink>) -> Result<RpcSession> {
    let command = config.agent_command();
    log.info(&format!("starting agent: {}", command.display()));
    let session = RpcSession::start(&command, log.scoped("rpc"))
        .with_context(|| format!("failed to start '{}'", command.display()))?;
    register_auto_approval(&session, log);

    let init = client::initialize(&session, client::client_info())
        .await
        .context("initialize failed")?;
    if let Some(agent) = &init.user_agent {
        log.info(&format!("connected to {agent}"));
    }
    ensure_login(&session, ui, log).await?;
    Ok(session)
}

/// [`open_session`], then resume `thread_id` or start a new thread.
async fn connect(
    config: &AppConfig,
    log: &Logger,
    ui: &Arc<dyn UiSink>,
    thread_id: Option<&str>,
) -> Result<Connection> {
    let session = open_session(config, log, ui).await?;
    let directory = Directory::new(&session, log.scoped("directory"));
    let opened = match thread_id {
        Some(id) => directory
            .resume_thread(id)
            .await
            .with_context(|| format!("failed to resume thread {id}"))?,
        None => directory
            .start_thread(ThreadStartParams {
                model: config.model.clone(),
                cwd: config.cwd.as_ref().map(|cwd| cwd.display().to_string()),
                approval_policy: None,
            })
            .await
            .context("failed to start a thread")?,
    };
    Ok(Connection {
        session: Arc::new(session),
        opened,
    })
}

async fn ensure_login(session: &RpcSession, ui: &Arc<dyn UiSink>, log: &Logger) -> Result<()> {
    let state = client::read_account(session, false)
        .await
        .context("account/read failed")?;
    if !client::needs_login(&state) {
        return Ok(());
    }

    log.info("agent requires login");
    let completed = account::login_completed(session);
    let started = account::start_login(session)
        .await
        .context("account/login/start failed")?;
    ui.emit(UiEvent::AuthRequired {
        auth_url: started.auth_url,
    });
    let note = account::wait_for_login(completed, LOGIN_TIMEOUT).await?;
    ui.emit(UiEvent::AuthEnd {
        success: note.success,
        error: note.error.clone(),
    });
    if !note.success {
        return Err(anyhow!(
            "login failed: {}",
            note.error.unwrap_or_else(|| "unknown error".to_string())
        ));
    }
    Ok(())
}

/// Run one connected session until quit or disconnect.
async fn drive(
    config: &AppConfig,
    log: &Logger,
    ui: &Arc<dyn UiSink>,
    connection: Connection,
    input: &mut mpsc::UnboundedReceiver<String>,
) -> Result<Exit> {
    let Connection { session, opened } = connection;

    let (engine, engine_events) = ConsoleEngine::new();
    let engine = Arc::new(engine);
    let (capture_tx, capture_events) = mpsc::unbounded_channel();
    let capture = Arc::new(CaptureSupervisor::new(
        engine.clone(),
        engine_events,
        config.capture_config(),
        capture_tx,
        log.scoped("capture"),
    ));

    let (speech_tx, speech_events) = mpsc::unbounded_channel();
    let speech: Arc<dyn SpeechEngine> = match &config.tts_cmd {
        Some(command) => Arc::new(
            CommandSpeech::from_command_line(command, speech_tx, log.scoped("speech"))
                .context("invalid --tts-cmd")?,
        ),
        None => Arc::new(SilentSpeech::new(speech_tx)),
    };

    let (gone_tx, mut gone) = mpsc::unbounded_channel();
    session.on_disconnect(move |reason| {
        let _ = gone_tx.send(reason.to_string());
    });

    ui.emit(UiEvent::Ready {
        version: env!("CARGO_PKG_VERSION").to_string(),
        thread_id: opened.thread.id.clone(),
        model: config.model.clone().or(opened.model.clone()),
    });
    for message in &opened.thread.messages {
        let speaker = match message.role {
            Role::User => "you",
            Role::Assistant => "agent",
        };
        ui.emit(UiEvent::Status {
            message: format!("{speaker}: {}", message.text),
        });
    }

    let (handle, task) = TurnController::spawn(TurnParts {
        session: Arc::clone(&session),
        capture,
        capture_events,
        speech,
        speech_events,
        ui: Arc::clone(ui),
        thread: opened.thread,
        config: config.turn_config(),
        log: log.scoped("turn"),
    });

    let exit = loop {
        tokio::select! {
            line = input.recv() => {
                let Some(line) = line else {
                    log.info("input closed");
                    break Exit::Quit;
                };
                let flow = dispatch(&line, &engine, &handle, &session, ui, log).await;
                if matches!(flow, Flow::Quit) {
                    break Exit::Quit;
                }
            }
            reason = gone.recv() => {
                break Exit::Disconnected(
                    reason.unwrap_or_else(|| "agent session closed".to_string()),
                );
            }
        }
    };

    handle.shutdown();
    if let Err(err) = task.await {
        log.error(&format!("turn controller task failed: {err}"));
    }
    session.stop();
    Ok(exit)
}

async fn dispatch(
    line: &str,
    engine: &ConsoleEngine,
    handle: &TurnHandle,
    session: &RpcSession,
    ui: &Arc<dyn UiSink>,
    log: &Logger,
) -> Flow {
    let command = match parse_input(line) {
        ParsedInput::Empty => return Flow::Continue,
        ParsedInput::Unknown(cmd) => {
            ui.emit(UiEvent::Error {
                message: format!("unknown command: /{cmd} (try /help)"),
                recoverable: true,
            });
            return Flow::Continue;
        }
        ParsedInput::Invalid(err) => {
            ui.emit(UiEvent::Error {
                message: format!("invalid command: {err}"),
                recoverable: true,
            });
            return Flow::Continue;
        }
        ParsedInput::Command(command) => command,
    };

    match command {
        UiCommand::Say { text } => {
            // While capture runs the line is the utterance; otherwise it is typed input.
            if !engine.offer(&text) {
                handle.new_turn(Some(text));
            }
        }
        UiCommand::Listen => {
            handle.start_listen();
        }
        UiCommand::NewTurn { text } => {
            handle.new_turn(text);
        }
        UiCommand::Interrupt => {
            handle.interrupt();
        }
        UiCommand::AutoListen { enabled } => {
            handle.set_auto_listen(enabled);
        }
        UiCommand::EnableMic => {
            handle.enable_mic();
        }
        UiCommand::Threads => {
            if let Err(err) = list_threads(session, ui, log).await {
                report(ui, &err);
            }
        }
        UiCommand::Models => {
            if let Err(err) = list_models(session, ui, log).await {
                report(ui, &err);
            }
        }
        UiCommand::Status => {
            if let Some(snapshot) = handle.snapshot().await {
                ui.emit(UiEvent::Status {
                    message: describe(&snapshot),
                });
            }
        }
        UiCommand::Help => ui.emit(UiEvent::Status {
            message: HELP_TEXT.to_string(),
        }),
        UiCommand::Quit => return Flow::Quit,
    }
    Flow::Continue
}

async fn list_threads(session: &RpcSession, ui: &Arc<dyn UiSink>, log: &Logger) -> Result<()> {
    let threads = Directory::new(session, log.scoped("directory"))
        .list_all_threads()
        .await
        .context("thread/list failed")?;
    ui.emit(UiEvent::Threads {
        threads: threads
            .into_iter()
            .map(|thread| ThreadEntry {
                id: thread.id,
                preview: thread.preview,
            })
            .collect(),
    });
    Ok(())
}

async fn list_models(session: &RpcSession, ui: &Arc<dyn UiSink>, log: &Logger) -> Result<()> {
    let catalog = Directory::new(session, log.scoped("directory"))
        .list_all_models()
        .await
        .context("model/list failed")?;
    let default = catalog.default_model.clone();
    ui.emit(UiEvent::Models {
        models: catalog
            .models
            .into_iter()
            .map(|model| ModelEntry {
                is_default: default.as_deref() == Some(model.id.as_str()),
                display_name: if model.display_name.is_empty() {
                    model.id.clone()
                } else {
                    model.display_name
                },
                id: model.id,
            })
            .collect(),
    });
    Ok(())
}

fn report(ui: &Arc<dyn UiSink>, err: &anyhow::Error) {
    ui.emit(UiEvent::Error {
        message: format!("{err:#}"),
        recoverable: true,
    });
}

fn describe(snapshot: &TurnSnapshot) -> String {
    let turn = snapshot
        .active_turn
        .as_ref()
        .map(|turn| turn.id.as_str())
        .unwrap_or("none");
    let mut status = format!(
        "state: {}, turn: {turn}, auto-listen: {}",
        snapshot.state.label(),
        if snapshot.auto_listen { "on" } else { "off" }
    );
    if snapshot.permission_blocked {
        status.push_str(", microphone blocked");
    }
    if !snapshot.connected {
        status.push_str(", disconnected");
    }
    if let Some(queued) = &snapshot.queued_utterance {
        status.push_str(&format!(", queued: {queued:?}"));
    }
    status
}

fn spawn_input_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
