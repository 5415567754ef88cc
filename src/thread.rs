//! Conversation data owned by the turn controller.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub text: String,
    /// True only for the assistant message of the turn in progress.
    pub is_streaming: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Active,
    Completed,
    Interrupted,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub id: String,
    pub status: TurnStatus,
}

impl Turn {
    pub fn active(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TurnStatus::Active,
        }
    }
}

/// A thread and its transcript. At most one message is streaming at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    pub id: String,
    pub messages: Vec<ChatMessage>,
    next_local_id: u64,
}

impl Thread {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            next_local_id: 1,
        }
    }

    pub fn with_messages(id: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        let next_local_id = messages.len() as u64 + 1;
        Self {
            id: id.into(),
            messages,
            next_local_id,
        }
    }

    fn local_id(&mut self, prefix: &str) -> String {
        let id = format!("{prefix}-{}", self.next_local_id);
        self.next_local_id += 1;
        id
    }

    pub fn push_user(&mut self, text: &str) -> &ChatMessage {
        let id = self.local_id("user");
        self.messages.push(ChatMessage {
            id,
            role: Role::User,
            text: text.to_string(),
            is_streaming: false,
        });
        &self.messages[self.messages.len() - 1]
    }

    pub fn streaming_message(&self) -> Option<&ChatMessage> {
        self.messages
            .last()
            .filter(|message| message.is_streaming && message.role == Role::Assistant)
    }

    /// Append a reply delta, opening the streaming message on the first one.
    pub fn append_reply(&mut self, delta: &str) -> &ChatMessage {
        let open = self
            .messages
            .last()
            .is_some_and(|message| message.is_streaming && message.role == Role::Assistant);
        if !open {
            let id = self.local_id("assistant");
            self.messages.push(ChatMessage {
                id,
                role: Role::Assistant,
                text: String::new(),
                is_streaming: true,
            });
        }
        let index = self.messages.len() - 1;
        self.messages[index].text.push_str(delta);
        &self.messages[index]
    }

    /// Freeze the streaming message, if there is one.
    pub fn finish_reply(&mut self) -> Option<&ChatMessage> {
        let message = self.messages.last_mut()?;
        if !(message.is_streaming && message.role == Role::Assistant) {
            return None;
        }
        message.is_streaming = false;
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_deltas_build_one_streaming_message() {
        let mut thread = Thread::new("th");
        thread.push_user("hi");
        thread.append_reply("Hel");
        let message = thread.append_reply("lo");
        assert_eq!(message.text, "Hello");
        assert!(message.is_streaming);
        assert_eq!(thread.messages.len(), 2);

        let done = thread.finish_reply().unwrap();
        assert_eq!(done.text, "Hello");
        assert!(!done.is_streaming);
        assert!(thread.streaming_message().is_none());
        assert!(thread.finish_reply().is_none());
    }

    #[test]
    fn next_reply_opens_a_new_message() {
        let mut thread = Thread::new("th");
        thread.append_reply("one");
        thread.finish_reply();
        thread.append_reply("two");
        assert_eq!(thread.messages.len(), 2);
        assert_ne!(thread.messages[0].id, thread.messages[1].id);
    }
}
