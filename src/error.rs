//! Error types for switchboard

use thiserror::Error;

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, SwitchboardError>;

/// Main error type.
///
/// Only the variants that end a turn ever leave the agent state machine:
/// tool execution failures are folded back into the conversation as
/// error-flagged results, and persistence failures are reported by the
/// session store as boolean/optional signals.
#[derive(Debug, Error)]
pub enum SwitchboardError {
    /// A local tool failed while executing
    #[error("Tool execution error in {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    /// The model asked for a tool that is neither local nor a delegate
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    /// Two tools with the same name were registered on one agent
    #[error("Duplicate tool name: {name}")]
    DuplicateTool { name: String },

    /// A chat referenced a session id the store does not know
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// The persistence backend rejected a read or write
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The completion provider failed
    #[error("Completion error: {0}")]
    Completion(String),

    /// The tool-calling loop did not settle within the configured bound
    #[error("Maximum turns exceeded: {max_turns}")]
    MaxTurnsExceeded { max_turns: usize },

    /// The delivery's cancellation token fired at a suspension point
    #[error("Turn cancelled")]
    Cancelled,

    /// Nothing is registered for the topic
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// A factory is already registered for the topic
    #[error("Topic already registered: {0}")]
    DuplicateTopic(String),

    /// The router was dropped or the instance task is gone
    #[error("Router closed")]
    RouterClosed,

    /// A handler returned an error for a `send`
    #[error("Handler error: {0}")]
    Handler(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl SwitchboardError {
    /// Whether the error is one the conversation absorbs instead of aborting on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SwitchboardError::ToolExecution { .. } | SwitchboardError::Persistence(_)
        )
    }

    /// Recover a typed error from a boxed service error, wrapping anything else.
    pub fn from_boxed(err: tower::BoxError, wrap: fn(String) -> SwitchboardError) -> Self {
        match err.downcast::<SwitchboardError>() {
            Ok(typed) => *typed,
            Err(other) => wrap(other.to_string()),
        }
    }
}
