//! JSON-lines protocol between the core and a UI front end.
//!
//! Events go out as `{"event": "...", ...}`; commands come in as
//! `{"cmd": "...", ...}` or as console slash commands (see `router`).

use serde::{Deserialize, Serialize};

// ============================================================================
// UI Events (core → UI)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadEntry {
    pub id: String,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelEntry {
    pub id: String,
    pub display_name: String,
    pub is_default: bool,
}

/// Everything the UI needs to render; serialized with an `"event"` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum UiEvent {
    /// Session is up and a thread is selected.
    #[serde(rename = "ready")]
    Ready {
        version: String,
        thread_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },

    /// The agent needs a browser login before turns will work.
    #[serde(rename = "auth_required")]
    AuthRequired {
        #[serde(skip_serializing_if = "Option::is_none")]
        auth_url: Option<String>,
    },

    #[serde(rename = "auth_end")]
    AuthEnd {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Turn controller state label (`idle`, `listening`, ...).
    #[serde(rename = "state")]
    State { state: String },

    #[serde(rename = "listen_start")]
    ListenStart,

    #[serde(rename = "listen_end")]
    ListenEnd,

    /// Partial transcript while listening.
    #[serde(rename = "partial")]
    Partial { text: String },

    /// Input level meter, 0..1.
    #[serde(rename = "level")]
    Level { level: f32 },

    #[serde(rename = "user_message")]
    UserMessage { id: String, text: String },

    /// Full reasoning summary shown before the reply starts.
    #[serde(rename = "reasoning")]
    Reasoning { text: String },

    #[serde(rename = "reasoning_cleared")]
    ReasoningCleared,

    /// Streaming reply token.
    #[serde(rename = "token")]
    Token { message_id: String, text: String },

    /// Reply finished; `text` is the final message.
    #[serde(rename = "reply_done")]
    ReplyDone { message_id: String, text: String },

    #[serde(rename = "speak_start")]
    SpeakStart,

    #[serde(rename = "speak_end")]
    SpeakEnd { interrupted: bool },

    #[serde(rename = "threads")]
    Threads { threads: Vec<ThreadEntry> },

    #[serde(rename = "models")]
    Models { models: Vec<ModelEntry> },

    #[serde(rename = "status")]
    Status { message: String },

    #[serde(rename = "disconnected")]
    Disconnected { reason: String },

    /// Error (recoverable or fatal)
    #[serde(rename = "error")]
    Error { message: String, recoverable: bool },
}

// ============================================================================
// UI Commands (UI → core)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd")]
pub enum UiCommand {
    /// Spoken (or typed) text. Becomes the transcript if listening, else a new turn.
    #[serde(rename = "say")]
    Say { text: String },

    #[serde(rename = "listen")]
    Listen,

    /// Interrupt the current turn; with text, send it once the turn ends.
    #[serde(rename = "new_turn")]
    NewTurn {
        #[serde(default)]
        text: Option<String>,
    },

    #[serde(rename = "interrupt")]
    Interrupt,

    #[serde(rename = "auto_listen")]
    AutoListen { enabled: bool },

    /// Clear a microphone-permission block after the user fixed it.
    #[serde(rename = "enable_mic")]
    EnableMic,

    #[serde(rename = "threads")]
    Threads,

    #[serde(rename = "models")]
    Models,

    #[serde(rename = "status")]
    Status,

    #[serde(rename = "help")]
    Help,

    #[serde(rename = "quit")]
    Quit,
}
