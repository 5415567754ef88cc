use super::*;
use crate::app::logging::Logger;
use crate::backoff::BackoffPolicy;
use crate::capture::testing::FakeEngine;
use crate::capture::{CaptureConfig, CaptureEngineEvent, CaptureSupervisor};
use crate::error::{CaptureError, SpeechError};
use crate::ipc::UiEvent;
use crate::rpc::protocol::methods;
use crate::rpc::testing::{connected_pair, FakeAgent};
use crate::speech::{SpeechEngine, SpeechEvent};
use crate::thread::{Role, Thread};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const THREAD: &str = "th-1";

struct FakeSpeech {
    events: mpsc::UnboundedSender<SpeechEvent>,
    spoken: Mutex<Vec<String>>,
    stops: AtomicU32,
}

impl FakeSpeech {
    fn finish(&self) {
        self.events
            .send(SpeechEvent::Finished { interrupted: false })
            .unwrap();
    }

    fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechEngine for FakeSpeech {
    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        self.spoken.lock().unwrap().push(text.to_string());
        let _ = self.events.send(SpeechEvent::Started);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(SpeechEvent::Finished { interrupted: true });
    }
}

struct Harness {
    handle: TurnHandle,
    task: JoinHandle<Thread>,
    agent: Option<FakeAgent>,
    engine: Arc<FakeEngine>,
    capture: Arc<CaptureSupervisor>,
    speech: Arc<FakeSpeech>,
    ui: crossbeam_channel::Receiver<UiEvent>,
}

fn test_config() -> TurnConfig {
    TurnConfig {
        auto_listen: false,
        interrupt_backoff: BackoffPolicy::fixed(3, Duration::from_millis(10)),
        error_cooldown: Duration::from_millis(200),
        ..TurnConfig::default()
    }
}

fn spawn(config: TurnConfig, setup: impl FnOnce(&FakeEngine)) -> Harness {
    let (session, agent) = connected_pair();
    let (engine, engine_rx) = FakeEngine::new();
    setup(&engine);
    let engine = Arc::new(engine);

    let (capture_tx, capture_events) = mpsc::unbounded_channel();
    let capture_config = CaptureConfig {
        start_backoff: BackoffPolicy::fixed(3, Duration::from_millis(5)),
        ..CaptureConfig::default()
    };
    let capture = Arc::new(CaptureSupervisor::new(
        engine.clone(),
        engine_rx,
        capture_config,
        capture_tx,
        Logger::new("test-capture"),
    ));

    let (speech_tx, speech_events) = mpsc::unbounded_channel();
    let speech = Arc::new(FakeSpeech {
        events: speech_tx,
        spoken: Mutex::new(Vec::new()),
        stops: AtomicU32::new(0),
    });

    let (ui_tx, ui) = crossbeam_channel::unbounded();
    let (handle, task) = TurnController::spawn(TurnParts {
        session: Arc::new(session),
        capture: capture.clone(),
        capture_events,
        speech: speech.clone(),
        speech_events,
        ui: Arc::new(ui_tx),
        thread: Thread::new(THREAD),
        config,
        log: Logger::new("test-turn"),
    });

    Harness {
        handle,
        task,
        agent: Some(agent),
        engine,
        capture,
        speech,
        ui,
    }
}

async fn until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

impl Harness {
    fn agent(&mut self) -> &mut FakeAgent {
        self.agent.as_mut().unwrap()
    }

    async fn wait_for(&self, what: &str, pred: impl Fn(&TurnSnapshot) -> bool) -> TurnSnapshot {
        for _ in 0..400 {
            let snapshot = self.handle.snapshot().await.unwrap();
            if pred(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    fn ui_events(&self) -> Vec<UiEvent> {
        self.ui.try_iter().collect()
    }

    /// Send `text` and answer turn/start with `turn_id`.
    async fn start_turn(&mut self, text: &str, turn_id: &str) {
        self.handle.new_turn(Some(text.to_string()));
        let (id, params) = self.agent().expect_request(methods::TURN_START).await;
        assert_eq!(params["threadId"], THREAD);
        assert_eq!(params["input"][0]["text"], text);
        self.agent().respond(id, json!({"turn": {"id": turn_id}})).await;
        self.wait_for("active turn", |s| {
            s.active_turn.as_ref().is_some_and(|turn| turn.id == turn_id)
        })
        .await;
    }

    async fn reply_delta(&mut self, turn_id: &str, delta: &str) {
        self.agent()
            .notify(
                methods::AGENT_MESSAGE_DELTA,
                json!({"threadId": THREAD, "turnId": turn_id, "itemId": "msg-1", "delta": delta}),
            )
            .await;
    }

    async fn reasoning_delta(&mut self, turn_id: &str, delta: &str) {
        self.agent()
            .notify(
                methods::REASONING_SUMMARY_DELTA,
                json!({"threadId": THREAD, "turnId": turn_id, "itemId": "r-1", "delta": delta}),
            )
            .await;
    }

    async fn complete(&mut self, turn_id: &str, status: &str) {
        self.agent()
            .notify(
                methods::TURN_COMPLETED,
                json!({"threadId": THREAD, "turn": {"id": turn_id, "status": status}}),
            )
            .await;
    }

    async fn wait_listening(&self) {
        self.wait_for("listening", |s| s.state.is_listening()).await;
        let capture = self.capture.clone();
        until("capture active", move || capture.is_active()).await;
    }

    fn say(&self, text: &str) {
        self.engine.emit(CaptureEngineEvent::Transcript {
            text: text.to_string(),
            is_final: true,
        });
    }
}

#[tokio::test]
async fn reply_streams_and_replaces_reasoning() {
    let mut h = spawn(test_config(), |_| {});
    h.start_turn("What's up?", "turn-1").await;

    h.agent()
        .notify(
            methods::TURN_STARTED,
            json!({"threadId": THREAD, "turn": {"id": "turn-1", "status": "inProgress"}}),
        )
        .await;
    h.reasoning_delta("turn-1", "Thinking").await;
    h.wait_for("reasoning", |s| s.reasoning == "Thinking").await;

    h.reply_delta("turn-1", "Hel").await;
    h.reasoning_delta("turn-1", "late summary").await;
    h.reply_delta("turn-1", "lo").await;
    let snapshot = h
        .wait_for("streamed reply", |s| s.streaming_text() == Some("Hello"))
        .await;
    assert!(snapshot.response_started);
    assert_eq!(snapshot.reasoning, "");

    h.complete("turn-1", "completed").await;
    let snapshot = h
        .wait_for("idle", |s| s.state == TurnState::Idle && s.active_turn.is_none())
        .await;
    assert_eq!(snapshot.streaming_text(), None);

    let events = h.ui_events();
    assert!(events.contains(&UiEvent::Reasoning {
        text: "Thinking".to_string()
    }));
    assert!(events.contains(&UiEvent::ReasoningCleared));
    assert!(!events
        .iter()
        .any(|e| matches!(e, UiEvent::Reasoning { text } if text.contains("late"))));
    assert!(events
        .iter()
        .any(|e| matches!(e, UiEvent::ReplyDone { text, .. } if text == "Hello")));

    h.handle.shutdown();
    let thread = h.task.await.unwrap();
    let texts: Vec<(Role, &str)> = thread
        .messages
        .iter()
        .map(|m| (m.role, m.text.as_str()))
        .collect();
    assert_eq!(
        texts,
        [(Role::User, "What's up?"), (Role::Assistant, "Hello")]
    );
    assert!(thread.messages.iter().all(|m| !m.is_streaming));
}

#[tokio::test]
async fn final_transcript_becomes_a_turn() {
    let mut h = spawn(test_config(), |_| {});
    h.handle.start_listen();
    h.wait_listening().await;

    h.engine.emit(CaptureEngineEvent::Transcript {
        text: "hel".to_string(),
        is_final: false,
    });
    h.wait_for("partial", |s| {
        matches!(&s.state, TurnState::Listening(session) if session.partial == "hel")
    })
    .await;

    h.say("  hello [noise] there ");
    let (_, params) = h.agent().expect_request(methods::TURN_START).await;
    assert_eq!(params["input"][0]["text"], "hello there");

    let snapshot = h.wait_for("busy", |s| s.state == TurnState::Busy).await;
    assert!(snapshot.send_in_flight);
    assert_eq!(h.engine.stops(), [false]);

    let events = h.ui_events();
    assert!(events.contains(&UiEvent::ListenStart));
    assert!(events.contains(&UiEvent::ListenEnd));
    assert!(events.contains(&UiEvent::Partial {
        text: "hel".to_string()
    }));
}

#[tokio::test]
async fn empty_utterance_is_discarded() {
    let h = spawn(test_config(), |_| {});
    h.handle.start_listen();
    h.wait_listening().await;

    h.say("[BLANK_AUDIO]");
    let snapshot = h.wait_for("idle", |s| s.state == TurnState::Idle).await;
    assert!(snapshot.messages.is_empty());
    assert!(!snapshot.send_in_flight);
}

#[tokio::test]
async fn barge_in_listens_and_drops_late_deltas() {
    let mut h = spawn(test_config(), |_| {});
    h.start_turn("tell me a story", "turn-1").await;
    h.reply_delta("turn-1", "Once").await;
    h.wait_for("reply", |s| s.streaming_text() == Some("Once")).await;

    h.handle.new_turn(None);
    let (id, params) = h.agent().expect_request(methods::TURN_INTERRUPT).await;
    assert_eq!(params, json!({"threadId": THREAD, "turnId": "turn-1"}));
    h.wait_listening().await;

    h.reply_delta("turn-1", " upon a time").await;
    h.agent().respond(id, json!({})).await;
    h.complete("turn-1", "interrupted").await;

    let snapshot = h
        .wait_for("turn cleared", |s| s.active_turn.is_none())
        .await;
    assert!(snapshot.state.is_listening());
    let reply = snapshot
        .messages
        .iter()
        .find(|m| m.role == Role::Assistant)
        .unwrap();
    assert_eq!(reply.text, "Once");
    assert!(!reply.is_streaming);
}

#[tokio::test]
async fn queued_utterance_waits_for_completion_and_last_one_wins() {
    let mut h = spawn(test_config(), |_| {});
    h.start_turn("first question", "turn-1").await;

    h.handle.new_turn(Some("never mind".to_string()));
    h.handle.new_turn(Some("actually this".to_string()));
    let (id, _) = h.agent().expect_request(methods::TURN_INTERRUPT).await;
    h.agent().respond(id, json!({})).await;

    let snapshot = h
        .wait_for("queued", |s| {
            s.queued_utterance.as_deref() == Some("actually this")
        })
        .await;
    assert_eq!(snapshot.state, TurnState::Interrupting);
    assert!(snapshot.active_turn.is_some());

    h.complete("turn-1", "interrupted").await;
    // No second interrupt: the next frame is the queued turn.
    let (id, params) = h.agent().expect_request(methods::TURN_START).await;
    assert_eq!(params["input"][0]["text"], "actually this");
    h.agent().respond(id, json!({"turn": {"id": "turn-2"}})).await;

    let snapshot = h
        .wait_for("second turn", |s| {
            s.active_turn.as_ref().is_some_and(|t| t.id == "turn-2")
        })
        .await;
    assert_eq!(snapshot.state, TurnState::Busy);
    assert_eq!(snapshot.queued_utterance, None);
    let users: Vec<&str> = snapshot
        .messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.text.as_str())
        .collect();
    assert_eq!(users, ["first question", "actually this"]);
}

#[tokio::test]
async fn interrupt_is_retried_after_an_error() {
    let mut h = spawn(test_config(), |_| {});
    h.start_turn("long task", "turn-1").await;

    h.handle.interrupt();
    let (id, _) = h.agent().expect_request(methods::TURN_INTERRUPT).await;
    h.agent().respond_error(id, -32000, "busy").await;
    let (id, params) = h.agent().expect_request(methods::TURN_INTERRUPT).await;
    assert_eq!(params["turnId"], "turn-1");
    h.agent().respond(id, json!({})).await;

    h.wait_for("interrupting", |s| s.state == TurnState::Interrupting)
        .await;
    h.complete("turn-1", "interrupted").await;
    h.wait_for("idle", |s| s.state == TurnState::Idle && s.active_turn.is_none())
        .await;
}

#[tokio::test]
async fn interrupt_waits_for_turn_id() {
    let mut h = spawn(test_config(), |_| {});
    h.handle.new_turn(Some("hello".to_string()));
    let (id, _) = h.agent().expect_request(methods::TURN_START).await;

    h.handle.interrupt();
    h.wait_for("interrupting", |s| s.state == TurnState::Interrupting)
        .await;

    h.agent().respond(id, json!({"turn": {"id": "turn-9"}})).await;
    let (_, params) = h.agent().expect_request(methods::TURN_INTERRUPT).await;
    assert_eq!(params["turnId"], "turn-9");
}

#[tokio::test]
async fn remote_error_resets_the_turn() {
    let mut h = spawn(test_config(), |_| {});
    h.start_turn("do it", "turn-1").await;
    h.reply_delta("turn-1", "Work").await;

    h.agent()
        .notify(
            methods::ERROR,
            json!({"error": {"message": "stream hiccup"}, "willRetry": true}),
        )
        .await;
    h.agent()
        .notify(
            methods::ERROR,
            json!({"error": {"message": "quota exceeded"}, "willRetry": false}),
        )
        .await;

    let snapshot = h
        .wait_for("idle", |s| s.state == TurnState::Idle && s.active_turn.is_none())
        .await;
    assert_eq!(snapshot.streaming_text(), None);
    assert_eq!(snapshot.reasoning, "");

    let events = h.ui_events();
    assert!(events.contains(&UiEvent::Error {
        message: "quota exceeded".to_string(),
        recoverable: true,
    }));
    assert!(events
        .iter()
        .any(|e| matches!(e, UiEvent::Status { message } if message.contains("stream hiccup"))));

    // A late completion for the failed turn changes nothing.
    h.complete("turn-1", "completed").await;
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, TurnState::Idle);
}

#[tokio::test]
async fn failed_turn_start_returns_to_idle() {
    let mut h = spawn(test_config(), |_| {});
    h.handle.new_turn(Some("hi".to_string()));
    let (id, _) = h.agent().expect_request(methods::TURN_START).await;
    h.agent().respond_error(id, -32600, "no such thread").await;

    let snapshot = h
        .wait_for("idle", |s| s.state == TurnState::Idle && !s.send_in_flight)
        .await;
    assert_eq!(snapshot.active_turn, None);
    assert!(h.ui_events().iter().any(|e| matches!(
        e,
        UiEvent::Error { message, recoverable: true } if message.contains("turn/start failed")
    )));
}

#[tokio::test]
async fn disconnect_resets_everything() {
    let mut h = spawn(test_config(), |_| {});
    h.start_turn("hello", "turn-1").await;
    h.reply_delta("turn-1", "Hi").await;
    h.wait_for("reply", |s| s.streaming_text() == Some("Hi")).await;

    drop(h.agent.take());
    let snapshot = h.wait_for("disconnected", |s| !s.connected).await;
    assert_eq!(snapshot.state, TurnState::Idle);
    assert_eq!(snapshot.active_turn, None);
    assert!(!snapshot.send_in_flight);
    assert_eq!(snapshot.streaming_text(), None);
    assert!(h
        .ui_events()
        .iter()
        .any(|e| matches!(e, UiEvent::Disconnected { .. })));

    h.handle.start_listen();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, TurnState::Idle);
    assert_eq!(h.engine.starts(), 0);
}

#[tokio::test]
async fn completed_reply_is_spoken() {
    let config = TurnConfig {
        speak_replies: true,
        ..test_config()
    };
    let mut h = spawn(config, |_| {});
    h.start_turn("say hi", "turn-1").await;
    h.reply_delta("turn-1", "Hi there").await;
    h.complete("turn-1", "completed").await;

    h.wait_for("speaking", |s| s.state == TurnState::Speaking)
        .await;
    let speech = h.speech.clone();
    until("speak call", move || speech.spoken() == ["Hi there"]).await;

    h.speech.finish();
    h.wait_for("idle", |s| s.state == TurnState::Idle).await;
    let events = h.ui_events();
    assert!(events.contains(&UiEvent::SpeakStart));
    assert!(events.contains(&UiEvent::SpeakEnd { interrupted: false }));
}

#[tokio::test]
async fn new_turn_cuts_off_speech() {
    let config = TurnConfig {
        speak_replies: true,
        ..test_config()
    };
    let mut h = spawn(config, |_| {});
    h.start_turn("say hi", "turn-1").await;
    h.reply_delta("turn-1", "Hi there").await;
    h.complete("turn-1", "completed").await;
    h.wait_for("speaking", |s| s.state == TurnState::Speaking)
        .await;

    h.handle.new_turn(Some("stop talking".to_string()));
    let (_, params) = h.agent().expect_request(methods::TURN_START).await;
    assert_eq!(params["input"][0]["text"], "stop talking");
    assert_eq!(h.speech.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn permission_failure_blocks_until_enabled() {
    let config = TurnConfig {
        auto_listen: true,
        ..test_config()
    };
    let h = spawn(config, |engine| {
        engine.fail_next_starts([CaptureError::PermissionDenied("microphone".to_string())]);
    });

    let snapshot = h
        .wait_for("blocked", |s| s.permission_blocked && s.state == TurnState::Idle)
        .await;
    assert!(snapshot.auto_listen);
    assert_eq!(h.engine.starts(), 1);
    assert!(h
        .ui_events()
        .iter()
        .any(|e| matches!(e, UiEvent::Error { recoverable: false, .. })));

    h.handle.start_listen();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, TurnState::Idle);
    assert_eq!(h.engine.starts(), 1);

    h.handle.enable_mic();
    h.wait_listening().await;
    assert_eq!(h.engine.starts(), 2);
}

#[tokio::test]
async fn transient_capture_failure_cools_down_then_rearms() {
    let config = TurnConfig {
        auto_listen: true,
        ..test_config()
    };
    let h = spawn(config, |engine| {
        engine.fail_next_starts((0..3).map(|_| CaptureError::EngineUnavailable("busy".to_string())));
    });

    h.wait_for("idle after failure", |s| s.state == TurnState::Idle && h.engine.starts() == 3)
        .await;
    assert!(!h.handle.snapshot().await.unwrap().permission_blocked);

    h.wait_listening().await;
    assert_eq!(h.engine.starts(), 4);
}

#[tokio::test]
async fn auto_listen_resumes_after_reply() {
    let config = TurnConfig {
        auto_listen: true,
        ..test_config()
    };
    let mut h = spawn(config, |_| {});
    h.wait_listening().await;

    h.say("what time is it");
    let (id, _) = h.agent().expect_request(methods::TURN_START).await;
    h.agent().respond(id, json!({"turn": {"id": "turn-1"}})).await;
    h.reply_delta("turn-1", "Noon.").await;
    h.complete("turn-1", "completed").await;

    h.wait_for("completed", |s| {
        s.active_turn.is_none() && s.messages.len() == 2
    })
    .await;
    h.wait_listening().await;
    assert_eq!(h.engine.starts(), 2);

    h.handle.set_auto_listen(false);
    h.wait_for("auto off", |s| !s.auto_listen).await;
}

#[tokio::test]
async fn deltas_for_other_turns_are_ignored() {
    let mut h = spawn(test_config(), |_| {});
    h.start_turn("hello", "turn-1").await;
    h.reply_delta("turn-0", "stale").await;
    h.agent()
        .notify(
            methods::AGENT_MESSAGE_DELTA,
            json!({"threadId": "other", "turnId": "turn-1", "delta": "foreign"}),
        )
        .await;
    h.reply_delta("turn-1", "fresh").await;

    let snapshot = h
        .wait_for("reply", |s| s.streaming_text().is_some())
        .await;
    assert_eq!(snapshot.streaming_text(), Some("fresh"));
}

#[tokio::test]
async fn utterance_spoken_over_a_reply_is_sent_when_the_old_turn_ends() {
    let mut h = spawn(test_config(), |_| {});
    h.start_turn("tell me a story", "turn-1").await;

    h.handle.new_turn(None);
    let (id, _) = h.agent().expect_request(methods::TURN_INTERRUPT).await;
    h.wait_listening().await;

    h.say("next question");
    let snapshot = h
        .wait_for("queued", |s| s.queued_utterance.as_deref() == Some("next question"))
        .await;
    assert_eq!(snapshot.state, TurnState::Idle);

    h.agent().respond(id, json!({})).await;
    h.complete("turn-1", "interrupted").await;

    let (id, params) = h.agent().expect_request(methods::TURN_START).await;
    assert_eq!(params["input"][0]["text"], "next question");
    h.agent().respond(id, json!({"turn": {"id": "turn-2"}})).await;
    let snapshot = h
        .wait_for("second turn", |s| {
            s.active_turn.as_ref().is_some_and(|t| t.id == "turn-2")
        })
        .await;
    assert_eq!(snapshot.state, TurnState::Busy);
    assert_eq!(snapshot.queued_utterance, None);
}

// Notifications below carry only what the agent is required to send: no
// thread id, no turn id on deltas, no turn id on turn/completed.

impl Harness {
    async fn bare_started(&mut self, turn_id: &str) {
        self.agent()
            .notify(methods::TURN_STARTED, json!({"turn": {"id": turn_id}}))
            .await;
    }

    async fn bare_delta(&mut self, delta: &str) {
        self.agent()
            .notify(methods::AGENT_MESSAGE_DELTA, json!({"delta": delta}))
            .await;
    }

    async fn bare_completed(&mut self) {
        self.agent()
            .notify(methods::TURN_COMPLETED, json!({"turn": {"status": "completed"}}))
            .await;
    }

    async fn assert_settled_with_reply(&self, text: &str) {
        let snapshot = self
            .wait_for("settled", |s| {
                s.state == TurnState::Idle && s.active_turn.is_none() && !s.send_in_flight
            })
            .await;
        let reply = snapshot
            .messages
            .iter()
            .find(|m| m.role == Role::Assistant)
            .unwrap();
        assert_eq!(reply.text, text);
        assert!(!reply.is_streaming);

        // Nothing is left holding the controller: a listen goes through.
        self.handle.start_listen();
        self.wait_listening().await;
    }
}

#[tokio::test]
async fn minimal_notifications_with_reply_before_completion() {
    let mut h = spawn(test_config(), |_| {});
    h.start_turn("hi", "t1").await;

    h.bare_started("t1").await;
    h.bare_delta("Hel").await;
    h.bare_delta("lo").await;
    h.wait_for("streamed", |s| s.streaming_text() == Some("Hello"))
        .await;
    h.bare_completed().await;

    h.assert_settled_with_reply("Hello").await;
}

#[tokio::test]
async fn completion_before_start_reply_does_not_leave_a_phantom_turn() {
    let mut h = spawn(test_config(), |_| {});
    h.handle.new_turn(Some("hi".to_string()));
    let (id, _) = h.agent().expect_request(methods::TURN_START).await;

    h.bare_delta("Hel").await;
    h.bare_delta("lo").await;
    h.bare_completed().await;
    h.wait_for("reply finished", |s| {
        s.state == TurnState::Idle && s.messages.iter().any(|m| m.text == "Hello" && !m.is_streaming)
    })
    .await;

    h.agent().respond(id, json!({"turn": {"id": "t1"}})).await;
    h.assert_settled_with_reply("Hello").await;
}

#[tokio::test]
async fn completion_after_started_but_before_start_reply() {
    let mut h = spawn(test_config(), |_| {});
    h.handle.new_turn(Some("hi".to_string()));
    let (id, _) = h.agent().expect_request(methods::TURN_START).await;

    h.bare_started("t1").await;
    h.bare_delta("Hel").await;
    h.bare_delta("lo").await;
    h.bare_completed().await;
    h.wait_for("reply finished", |s| {
        s.messages.iter().any(|m| m.text == "Hello" && !m.is_streaming)
    })
    .await;

    h.agent().respond(id, json!({"turn": {"id": "t1"}})).await;
    h.assert_settled_with_reply("Hello").await;
}
