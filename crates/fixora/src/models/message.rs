use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::role::Role;
use super::tool::ToolCall;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A message to or from an LLM
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    fn new<S: Into<String>>(role: Role, content: S) -> Self {
        Message {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system<S: Into<String>>(content: S) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// A tool-role message carrying the serialized result of one call
    pub fn tool<I: Into<String>, S: Into<String>>(tool_call_id: I, content: S) -> Self {
        Message {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    /// Add a tool request to the message
    pub fn with_tool_call(mut self, tool_call: ToolCall) -> Self {
        self.tool_calls.push(tool_call);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConversationError {
    #[error("system message at position {0}; only a leading system message is allowed")]
    MisplacedSystem(usize),

    #[error("conversation has no user message")]
    Empty,
}

/// An append-only conversation with exactly one leading system message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new<S: Into<String>>(system_prompt: S) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    /// Build a conversation from client supplied messages.
    ///
    /// A leading system message from the client replaces `default_system`.
    pub fn from_messages<S: Into<String>>(
        default_system: S,
        messages: Vec<Message>,
    ) -> Result<Self, ConversationError> {
        let mut iter = messages.into_iter().peekable();
        let system = match iter.peek() {
            Some(first) if first.role == Role::System => iter
                .next()
                .map(|m| m.content)
                .unwrap_or_default(),
            _ => default_system.into(),
        };

        let mut conversation = Self::new(system);
        for (index, message) in iter.enumerate() {
            if message.role == Role::System {
                return Err(ConversationError::MisplacedSystem(index + 1));
            }
            conversation.push(message);
        }

        if conversation.messages.len() == 1 {
            return Err(ConversationError::Empty);
        }
        Ok(conversation)
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn system_prompt(&self) -> &str {
        &self.messages[0].content
    }

    /// Everything after the system message
    pub fn turns(&self) -> &[Message] {
        &self.messages[1..]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
