use serde::{Deserialize, Serialize};

pub const GREETING: &str = "How may I assist you today?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
}

impl Role {
    /// Speaker label used when flattening a transcript.
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Append-only message log for one session. Never empty: it always
/// begins with the assistant greeting.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            messages: vec![Message::new(Role::Assistant, GREETING)],
        }
    }

    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
    }

    /// Drop everything and start over from the greeting.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.messages.push(Message::new(Role::Assistant, GREETING));
    }

    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_greeting() {
        let conversation = Conversation::new();
        assert_eq!(
            conversation.snapshot(),
            &[Message::new(Role::Assistant, GREETING)]
        );
    }

    #[test]
    fn snapshot_keeps_insertion_order() {
        let mut conversation = Conversation::new();
        conversation.append(Role::User, "first");
        conversation.append(Role::Assistant, "");
        conversation.append(Role::User, "  spaced  ");

        let contents: Vec<_> = conversation
            .snapshot()
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            contents,
            vec![
                (Role::Assistant, GREETING),
                (Role::User, "first"),
                (Role::Assistant, ""),
                (Role::User, "  spaced  "),
            ]
        );
    }

    #[test]
    fn reset_leaves_only_greeting() {
        let mut conversation = Conversation::new();
        for i in 0..5 {
            conversation.append(Role::User, format!("msg {i}"));
        }
        conversation.reset();
        assert_eq!(conversation.snapshot().len(), 1);
        assert_eq!(conversation.snapshot()[0], Message::new(Role::Assistant, GREETING));
    }

    #[test]
    fn reset_is_idempotent() {
        let mut once = Conversation::new();
        once.append(Role::User, "hello");
        once.reset();

        let mut twice = once.clone();
        twice.reset();

        assert_eq!(once.snapshot(), twice.snapshot());
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::new(Role::User, "hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }
}
