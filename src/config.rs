//! Configuration for the switchboard runtime, HTTP server and CLI.
//!
//! Layering: defaults, then an optional TOML file, then environment variables.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::agent::DEFAULT_MAX_TURNS;
use crate::agents::ORCHESTRATOR_TOPIC;
use crate::error::{Result, SwitchboardError};
use crate::session::DEFAULT_MAX_MESSAGES;

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    /// Chat model used by every LLM-driven agent
    pub model: String,

    pub temperature: Option<f32>,

    pub max_tokens: Option<u32>,

    /// History cap for new sessions
    pub max_messages: usize,

    /// Completions allowed per agent turn
    pub max_turns: usize,

    /// SQLite database path or `sqlite:` URL; `None` keeps sessions in memory
    pub database_url: Option<String>,

    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// `tracing` filter directive, overridden by `RUST_LOG`
    pub log_filter: String,

    /// Topic that owns new sessions
    pub entry_agent: String,

    /// Seconds a per-session handler instance may idle before it is released
    pub instance_idle_secs: u64,

    /// Seconds `serve` waits for in-flight turns after the listener stops
    pub shutdown_grace_secs: u64,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: None,
            max_tokens: None,
            max_messages: DEFAULT_MAX_MESSAGES,
            max_turns: DEFAULT_MAX_TURNS,
            database_url: None,
            bind_addr: "0.0.0.0:8000".to_string(),
            log_filter: "info".to_string(),
            entry_agent: ORCHESTRATOR_TOPIC.to_string(),
            instance_idle_secs: 60,
            shutdown_grace_secs: 30,
        }
    }
}

impl SwitchboardConfig {
    /// Defaults overlaid with the environment.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Parse a TOML file; missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SwitchboardError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| SwitchboardError::Config(e.to_string()))?;
        config.validate()
    }

    /// Overlay `SWITCHBOARD_*` and `OPENAI_MODEL` variables. Unparsable values are ignored.
    pub fn with_env(self) -> Self {
        self.with_vars(|key| std::env::var(key).ok())
    }

    fn with_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(model) = var("SWITCHBOARD_MODEL").or_else(|| var("OPENAI_MODEL")) {
            self.model = model;
        }
        if let Some(t) = var("SWITCHBOARD_TEMPERATURE").and_then(|v| v.parse().ok()) {
            self.temperature = Some(t);
        }
        if let Some(mt) = var("SWITCHBOARD_MAX_TOKENS").and_then(|v| v.parse().ok()) {
            self.max_tokens = Some(mt);
        }
        if let Some(n) = var("SWITCHBOARD_MAX_MESSAGES").and_then(|v| v.parse().ok()) {
            self.max_messages = n;
        }
        if let Some(n) = var("SWITCHBOARD_MAX_TURNS").and_then(|v| v.parse().ok()) {
            self.max_turns = n;
        }
        if let Some(url) = var("SWITCHBOARD_DATABASE_URL") {
            self.database_url = Some(url).filter(|u| !u.is_empty());
        }
        if let Some(addr) = var("SWITCHBOARD_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(filter) = var("SWITCHBOARD_LOG") {
            self.log_filter = filter;
        }
        if let Some(entry) = var("SWITCHBOARD_ENTRY_AGENT") {
            self.entry_agent = entry;
        }
        if let Some(n) = var("SWITCHBOARD_INSTANCE_IDLE_SECS").and_then(|v| v.parse().ok()) {
            self.instance_idle_secs = n;
        }
        if let Some(n) = var("SWITCHBOARD_SHUTDOWN_GRACE_SECS").and_then(|v| v.parse().ok()) {
            self.shutdown_grace_secs = n;
        }
        self
    }

    pub fn validate(self) -> Result<Self> {
        if self.model.trim().is_empty() {
            return Err(SwitchboardError::Config("model must not be empty".into()));
        }
        if self.entry_agent.trim().is_empty() {
            return Err(SwitchboardError::Config("entry_agent must not be empty".into()));
        }
        if self.max_messages == 0 {
            return Err(SwitchboardError::Config("max_messages must be at least 1".into()));
        }
        if self.max_turns == 0 {
            return Err(SwitchboardError::Config("max_turns must be at least 1".into()));
        }
        if self.instance_idle_secs == 0 {
            return Err(SwitchboardError::Config(
                "instance_idle_secs must be at least 1".into(),
            ));
        }
        Ok(self)
    }
}

/// Configuration builder
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: SwitchboardConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.temperature = Some(temp);
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.config.max_tokens = Some(tokens);
        self
    }

    pub fn max_messages(mut self, n: usize) -> Self {
        self.config.max_messages = n;
        self
    }

    pub fn max_turns(mut self, n: usize) -> Self {
        self.config.max_turns = n;
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = Some(url.into());
        self
    }

    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_addr = addr.into();
        self
    }

    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.config.log_filter = filter.into();
        self
    }

    pub fn entry_agent(mut self, topic: impl Into<String>) -> Self {
        self.config.entry_agent = topic.into();
        self
    }

    pub fn instance_idle_secs(mut self, secs: u64) -> Self {
        self.config.instance_idle_secs = secs;
        self
    }

    pub fn shutdown_grace_secs(mut self, secs: u64) -> Self {
        self.config.shutdown_grace_secs = secs;
        self
    }

    pub fn build(self) -> Result<SwitchboardConfig> {
        self.config.validate()
    }
}
