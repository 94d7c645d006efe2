//! # switchboard
//!
//! A Tower-based topic router that passes conversational sessions between
//! tool-using LLM agents.
//!
//! ## Core Concepts
//!
//! - **Session**: bounded message history plus the topic that currently owns it
//! - **Topic router**: one handler instance per `(topic, session id)`, in-order
//!   delivery per instance, and a quiescence signal for shutdown
//! - **Agent**: a Tower service that runs a completion/tool loop and either
//!   answers (completing the session) or hands the session to another topic
//! - **Session store**: best-effort persistence over a pluggable backend
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use switchboard::{provider, Runtime, SessionStore, SwitchboardConfig};
//! use switchboard::provider::OpenAIProvider;
//!
//! # async fn example() -> switchboard::Result<()> {
//! let config = SwitchboardConfig::from_env();
//! let model = provider::boxed(OpenAIProvider::new(config.model.clone()));
//! let runtime = Runtime::build(&config, model, SessionStore::in_memory())?;
//!
//! let id = runtime.submit("What is the status of invoice INV-1002?", None).await?;
//! runtime.wait_idle().await;
//!
//! if let Some(session) = runtime.session(&id).await {
//!     for message in session.messages() {
//!         println!("{}: {}", message.source(), message.content());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod agents;
pub mod codec;
pub mod config;
pub mod error;
pub mod items;
pub mod logging;
pub mod provider;
pub mod router;
pub mod runtime;
pub mod server;
pub mod session;
pub mod sessions;
pub mod sqlite_session;
pub mod tool;

pub use agent::{AgentBuilder, AgentConfig, AiAgent, TurnOutcome};
pub use config::{ConfigBuilder, SwitchboardConfig};
pub use error::{Result, SwitchboardError};
pub use items::{Message, Role, ToolCall};
pub use provider::{Completion, CompletionRequest, ModelSvc, OpenAIProvider, ScriptedProvider};
pub use router::{Delivery, Publisher, TopicId, TopicRouter};
pub use runtime::Runtime;
pub use session::{HandoffRecord, Session, SessionId, SessionStatus};
pub use sessions::{InMemoryBackend, SessionBackend, SessionStore};
pub use sqlite_session::SqliteBackend;
pub use tool::{handoff_tool, tool_typed, ToolDef, ToolInvocation, ToolOutput, ToolRegistry};

// Re-export Tower traits that users need
pub use tower::{Layer, Service, ServiceExt};
