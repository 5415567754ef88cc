use crate::thread::{ChatMessage, Turn};
use tokio::time::Instant;

/// Capture is conceptually active. Lives only between begin and end of listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenSession {
    pub id: u64,
    /// Latest partial transcript; used when silence ends the utterance.
    pub partial: String,
}

/// Exactly one of these at a time, so listening and speaking can never overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Listening(ListenSession),
    /// Waiting for the interrupted turn to report completion.
    Interrupting,
    Busy,
    Speaking,
}

impl TurnState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening(_) => "listening",
            Self::Interrupting => "interrupting",
            Self::Busy => "busy",
            Self::Speaking => "speaking",
        }
    }

    pub fn is_listening(&self) -> bool {
        matches!(self, Self::Listening(_))
    }

    pub fn listen_id(&self) -> Option<u64> {
        match self {
            Self::Listening(session) => Some(session.id),
            _ => None,
        }
    }
}

/// Reasoning summary shown until the reply starts.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReasoningBuffer {
    text: String,
    response_started: bool,
}

impl ReasoningBuffer {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn response_started(&self) -> bool {
        self.response_started
    }

    /// Returns false when the delta is suppressed because the reply already started.
    pub fn push_delta(&mut self, delta: &str) -> bool {
        if self.response_started {
            return false;
        }
        self.text.push_str(delta);
        true
    }

    /// New summary section.
    pub fn part_added(&mut self) {
        if !self.response_started && !self.text.is_empty() && !self.text.ends_with("\n\n") {
            self.text.push_str("\n\n");
        }
    }

    /// First reply delta of the turn. Returns true only on the flip.
    pub fn mark_response_started(&mut self) -> bool {
        if self.response_started {
            return false;
        }
        self.response_started = true;
        self.text.clear();
        true
    }

    /// Start of a new turn.
    pub fn reset(&mut self) {
        self.text.clear();
        self.response_started = false;
    }

    /// Returns whether there was anything to clear.
    pub fn clear(&mut self) -> bool {
        let had_text = !self.text.is_empty();
        self.text.clear();
        had_text
    }
}

/// Auto-listen gating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoListen {
    pub enabled: bool,
    /// Set by a microphone permission failure; only cleared explicitly.
    pub permission_blocked: bool,
    /// Cool-down after a transient failure.
    pub blocked_until: Option<Instant>,
    pub connected: bool,
}

impl AutoListen {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            permission_blocked: false,
            blocked_until: None,
            connected: true,
        }
    }
}

/// Point-in-time view of the controller, for UIs and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnSnapshot {
    pub state: TurnState,
    pub active_turn: Option<Turn>,
    pub send_in_flight: bool,
    pub queued_utterance: Option<String>,
    pub reasoning: String,
    pub response_started: bool,
    pub auto_listen: bool,
    pub permission_blocked: bool,
    pub connected: bool,
    pub messages: Vec<ChatMessage>,
}

impl TurnSnapshot {
    pub fn streaming_text(&self) -> Option<&str> {
        self.messages
            .last()
            .filter(|message| message.is_streaming)
            .map(|message| message.text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_is_suppressed_after_first_reply_delta() {
        let mut reasoning = ReasoningBuffer::default();
        assert!(reasoning.push_delta("Considering"));
        reasoning.part_added();
        assert!(reasoning.push_delta("options"));
        assert_eq!(reasoning.text(), "Considering\n\noptions");

        assert!(reasoning.mark_response_started());
        assert_eq!(reasoning.text(), "");
        assert!(!reasoning.mark_response_started());
        assert!(!reasoning.push_delta("late"));
        assert_eq!(reasoning.text(), "");

        reasoning.reset();
        assert!(reasoning.push_delta("next turn"));
    }

    #[test]
    fn state_labels() {
        let listening = TurnState::Listening(ListenSession {
            id: 4,
            partial: String::new(),
        });
        assert_eq!(listening.label(), "listening");
        assert_eq!(listening.listen_id(), Some(4));
        assert_eq!(TurnState::Busy.listen_id(), None);
    }
}
