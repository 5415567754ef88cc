use super::protocol::UiCommand;

// ============================================================================
// Input Parsing
// ============================================================================

#[derive(Debug, PartialEq)]
pub enum ParsedInput {
    Command(UiCommand),
    /// Slash command we do not know.
    Unknown(String),
    /// Malformed JSON command.
    Invalid(String),
    Empty,
}

pub const HELP_TEXT: &str = "\
commands:
  <text>            speak text (transcript while listening, new turn otherwise)
  /listen           start listening
  /new [text]       interrupt the current turn, then send text or listen
  /interrupt        interrupt the current turn
  /auto on|off      toggle auto-listen
  /enable-mic       clear a microphone permission block
  /threads          list threads
  /models           list models
  /status           show controller state
  /quit             exit";

/// Parse one console or front-end line. JSON objects are commands; lines
/// starting with `/` are slash commands; anything else is speech.
pub fn parse_input(input: &str) -> ParsedInput {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return ParsedInput::Empty;
    }

    if trimmed.starts_with('{') {
        return match serde_json::from_str::<UiCommand>(trimmed) {
            Ok(cmd) => ParsedInput::Command(cmd),
            Err(err) => ParsedInput::Invalid(err.to_string()),
        };
    }

    let Some(rest) = trimmed.strip_prefix('/') else {
        return ParsedInput::Command(UiCommand::Say {
            text: trimmed.to_string(),
        });
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or_default().to_lowercase();
    let args = parts.next().map(str::trim).unwrap_or("");

    let command = match cmd.as_str() {
        "listen" | "l" => UiCommand::Listen,
        "new" | "n" => UiCommand::NewTurn {
            text: (!args.is_empty()).then(|| args.to_string()),
        },
        "interrupt" | "stop" => UiCommand::Interrupt,
        "auto" => match args.to_lowercase().as_str() {
            "on" | "true" | "1" => UiCommand::AutoListen { enabled: true },
            "off" | "false" | "0" => UiCommand::AutoListen { enabled: false },
            _ => return ParsedInput::Invalid("usage: /auto on|off".to_string()),
        },
        "enable-mic" | "mic" => UiCommand::EnableMic,
        "threads" => UiCommand::Threads,
        "models" => UiCommand::Models,
        "status" => UiCommand::Status,
        "help" | "h" => UiCommand::Help,
        "quit" | "exit" | "q" => UiCommand::Quit,
        _ => return ParsedInput::Unknown(cmd),
    };
    ParsedInput::Command(command)
}
