use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u32>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tokens: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// Token counts reported by the backend. Replaced wholesale whenever a
/// response (or a streamed frame) carries one; never merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Ordered conversation transcript. Order is turn order; the only mutation
/// with a constraint is `upsert_assistant_text`, which the streaming path
/// calls repeatedly with ever-longer snapshots of the in-progress reply.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// If the last message is from the assistant, replace its content with
    /// `text`; otherwise append a new assistant message. During one streaming
    /// turn each call's `text` extends the previous one, so replacing is
    /// idempotent with respect to re-delivery of the same snapshot.
    pub fn upsert_assistant_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        match self.messages.last_mut() {
            Some(last) if last.role == Role::Assistant => last.content = text,
            _ => self.messages.push(ChatMessage::assistant(text)),
        }
    }

    /// Flip a message between user and assistant. System entries are left
    /// alone; the system prompt lives outside the transcript.
    pub fn toggle_role(&mut self, index: usize) {
        if let Some(msg) = self.messages.get_mut(index) {
            msg.role = match msg.role {
                Role::User => Role::Assistant,
                Role::Assistant => Role::User,
                Role::System => Role::System,
            };
        }
    }

    /// Append an empty user message (a new editable slot).
    pub fn add_message(&mut self) {
        self.messages.push(ChatMessage::user(""));
    }

    pub fn remove_message(&mut self, index: usize) {
        if index < self.messages.len() {
            self.messages.remove(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_trailing_assistant_message() {
        let mut t = Transcript::new();
        t.push(ChatMessage::user("hi"));
        t.upsert_assistant_text("Hel");
        t.upsert_assistant_text("Hello");

        assert_eq!(t.len(), 2);
        assert_eq!(t.last().unwrap().role, Role::Assistant);
        assert_eq!(t.last().unwrap().content, "Hello");
    }

    #[test]
    fn upsert_appends_after_user_message() {
        let mut t = Transcript::new();
        t.push(ChatMessage::user("question"));
        t.upsert_assistant_text("answer");

        assert_eq!(t.len(), 2);
        assert_eq!(t.messages()[0].content, "question");
        assert_eq!(t.messages()[0].role, Role::User);
        assert_eq!(t.messages()[1].content, "answer");
    }

    #[test]
    fn upsert_on_empty_transcript_appends() {
        let mut t = Transcript::new();
        t.upsert_assistant_text("solo");
        assert_eq!(t.len(), 1);
        assert_eq!(t.last().unwrap().role, Role::Assistant);
    }

    #[test]
    fn toggle_role_flips_user_and_assistant() {
        let mut t = Transcript::new();
        t.push(ChatMessage::user("a"));
        t.toggle_role(0);
        assert_eq!(t.messages()[0].role, Role::Assistant);
        t.toggle_role(0);
        assert_eq!(t.messages()[0].role, Role::User);
    }

    #[test]
    fn add_and_remove_message() {
        let mut t = Transcript::new();
        t.add_message();
        t.add_message();
        assert_eq!(t.len(), 2);
        t.remove_message(0);
        assert_eq!(t.len(), 1);
        // Out-of-range removal is a no-op.
        t.remove_message(5);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn roles_serialize_lowercase() {
        let msg = ChatMessage::assistant("x");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json.get("tokens").is_none());
    }
}
