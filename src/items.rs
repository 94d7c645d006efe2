//! Items representing conversation messages and tool calls
//!
//! [`Message`] is an explicit tagged union: every kind carries exactly the
//! fields it needs, and the serde representation (`"kind"` tag, snake_case
//! variants) is the storage format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role in a conversation, as seen by the completion provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A message in a session's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    SystemPrompt {
        content: String,
    },
    UserText {
        source: String,
        content: String,
    },
    AssistantText {
        source: String,
        content: String,
    },
    /// One requested call. Consecutive requests from the same source form a batch.
    ToolCallRequest {
        source: String,
        call: ToolCall,
    },
    ToolResult {
        call_id: String,
        is_error: bool,
        content: String,
    },
}

/// Source used for user-authored messages.
pub const USER_SOURCE: &str = "User";

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::SystemPrompt {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::UserText {
            source: USER_SOURCE.to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(source: impl Into<String>, content: impl Into<String>) -> Self {
        Message::AssistantText {
            source: source.into(),
            content: content.into(),
        }
    }

    pub fn tool_call(source: impl Into<String>, call: ToolCall) -> Self {
        Message::ToolCallRequest {
            source: source.into(),
            call,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::ToolResult {
            call_id: call_id.into(),
            is_error: false,
            content: content.into(),
        }
    }

    pub fn tool_error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::ToolResult {
            call_id: call_id.into(),
            is_error: true,
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::SystemPrompt { .. } => Role::System,
            Message::UserText { .. } => Role::User,
            Message::AssistantText { .. } | Message::ToolCallRequest { .. } => Role::Assistant,
            Message::ToolResult { .. } => Role::Tool,
        }
    }

    /// Who produced the message: an agent topic, `User`, `System` or `Tool`.
    pub fn source(&self) -> &str {
        match self {
            Message::SystemPrompt { .. } => "System",
            Message::UserText { source, .. }
            | Message::AssistantText { source, .. }
            | Message::ToolCallRequest { source, .. } => source,
            Message::ToolResult { .. } => "Tool",
        }
    }

    /// Human-readable content. Tool call requests render as `name(args)`.
    pub fn content(&self) -> String {
        match self {
            Message::SystemPrompt { content }
            | Message::UserText { content, .. }
            | Message::AssistantText { content, .. }
            | Message::ToolResult { content, .. } => content.clone(),
            Message::ToolCallRequest { call, .. } => format!("{}({})", call.name, call.arguments),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Message::ToolResult { is_error: true, .. })
    }
}
