use super::*;
use serde_json::json;

#[test]
fn events_serialize_with_event_tag() {
    let value = serde_json::to_value(UiEvent::Token {
        message_id: "m1".to_string(),
        text: "Hel".to_string(),
    })
    .unwrap();
    assert_eq!(value, json!({"event": "token", "message_id": "m1", "text": "Hel"}));

    let value = serde_json::to_value(UiEvent::Ready {
        version: "0.1.0".to_string(),
        thread_id: "th".to_string(),
        model: None,
    })
    .unwrap();
    assert_eq!(value, json!({"event": "ready", "version": "0.1.0", "thread_id": "th"}));

    let value = serde_json::to_value(UiEvent::ListenStart).unwrap();
    assert_eq!(value, json!({"event": "listen_start"}));
}

#[test]
fn plain_text_is_speech() {
    assert_eq!(
        parse_input("  turn on the lights "),
        ParsedInput::Command(UiCommand::Say {
            text: "turn on the lights".to_string()
        })
    );
    assert_eq!(parse_input("   "), ParsedInput::Empty);
}

#[test]
fn slash_commands_parse() {
    assert_eq!(parse_input("/listen"), ParsedInput::Command(UiCommand::Listen));
    assert_eq!(
        parse_input("/new"),
        ParsedInput::Command(UiCommand::NewTurn { text: None })
    );
    assert_eq!(
        parse_input("/NEW  what about tomorrow"),
        ParsedInput::Command(UiCommand::NewTurn {
            text: Some("what about tomorrow".to_string())
        })
    );
    assert_eq!(
        parse_input("/auto off"),
        ParsedInput::Command(UiCommand::AutoListen { enabled: false })
    );
    assert!(matches!(parse_input("/auto maybe"), ParsedInput::Invalid(_)));
    assert_eq!(parse_input("/q"), ParsedInput::Command(UiCommand::Quit));
    assert_eq!(
        parse_input("/frobnicate now"),
        ParsedInput::Unknown("frobnicate".to_string())
    );
}

#[test]
fn json_commands_parse() {
    assert_eq!(
        parse_input(r#"{"cmd":"new_turn","text":"hi"}"#),
        ParsedInput::Command(UiCommand::NewTurn {
            text: Some("hi".to_string())
        })
    );
    assert_eq!(
        parse_input(r#"{"cmd":"enable_mic"}"#),
        ParsedInput::Command(UiCommand::EnableMic)
    );
    assert!(matches!(parse_input(r#"{"cmd":"nope"}"#), ParsedInput::Invalid(_)));
}

#[test]
fn json_lines_sink_writes_one_line_per_event() {
    let sink = JsonLinesSink::new(Vec::new());
    sink.emit(UiEvent::Status {
        message: "ready".to_string(),
    });
    sink.emit(UiEvent::SpeakEnd { interrupted: true });
    let output = String::from_utf8(sink.into_inner()).unwrap();
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], r#"{"event":"status","message":"ready"}"#);
    assert_eq!(lines[1], r#"{"event":"speak_end","interrupted":true}"#);
}

#[test]
fn crossbeam_sender_is_a_sink() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let sink: &dyn UiSink = &tx;
    sink.emit(UiEvent::ListenEnd);
    assert_eq!(rx.try_recv().unwrap(), UiEvent::ListenEnd);
}
