//! Session entity: a bounded conversation record with an owner and a status.
//!
//! The history never holds more than `max_messages` entries; appending past
//! the cap drops the oldest entries first. The same cap bounds the hand-off
//! log. Both invariants are re-established when a session is deserialized,
//! so a document written by an older or foreign writer cannot smuggle in an
//! oversized history.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::items::Message;

/// Default history cap for new sessions.
pub const DEFAULT_MAX_MESSAGES: usize = 20;

/// Session identifier newtype.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        SessionId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        SessionId(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_string())
    }
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Processing,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted trace of one ownership transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRecord {
    /// Topic of the agent giving up ownership
    pub from: String,
    /// Topic the session was published to
    pub to: String,
    /// Delegate tool call that triggered the transfer
    pub call_id: String,
    pub at: DateTime<Utc>,
}

/// A conversation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SessionDocument")]
pub struct Session {
    pub id: SessionId,
    messages: Vec<Message>,
    max_messages: usize,
    /// Topic of the agent that owns the session
    pub current_agent: String,
    pub status: SessionStatus,
    #[serde(default)]
    handoffs: Vec<HandoffRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Unchecked wire form; converted into a [`Session`] with the caps applied.
#[derive(Deserialize)]
struct SessionDocument {
    id: SessionId,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default = "default_max_messages")]
    max_messages: usize,
    current_agent: String,
    #[serde(default)]
    status: SessionStatus,
    #[serde(default)]
    handoffs: Vec<HandoffRecord>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn default_max_messages() -> usize {
    DEFAULT_MAX_MESSAGES
}

impl From<SessionDocument> for Session {
    fn from(doc: SessionDocument) -> Self {
        let mut session = Session {
            id: doc.id,
            messages: doc.messages,
            max_messages: doc.max_messages.max(1),
            current_agent: doc.current_agent,
            status: doc.status,
            handoffs: doc.handoffs,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        };
        session.trim();
        session
    }
}

impl Session {
    /// New idle session with an empty history owned by `current_agent`.
    pub fn new(current_agent: impl Into<String>, max_messages: usize) -> Self {
        Self::with_id(SessionId::generate(), current_agent, max_messages)
    }

    pub fn with_id(id: SessionId, current_agent: impl Into<String>, max_messages: usize) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            max_messages: max_messages.max(1),
            current_agent: current_agent.into(),
            status: SessionStatus::Idle,
            handoffs: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a message, dropping the oldest entries past the cap.
    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.trim();
        self.touch();
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.touch();
    }

    pub fn set_current_agent(&mut self, agent: impl Into<String>) {
        self.current_agent = agent.into();
        self.touch();
    }

    /// Record an ownership transfer and move `current_agent` to the destination.
    pub fn record_handoff(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        call_id: impl Into<String>,
    ) {
        let to = to.into();
        self.handoffs.push(HandoffRecord {
            from: from.into(),
            to: to.clone(),
            call_id: call_id.into(),
            at: Utc::now(),
        });
        self.current_agent = to;
        self.trim();
        self.touch();
    }

    pub fn handoffs(&self) -> &[HandoffRecord] {
        &self.handoffs
    }

    pub fn last_handoff(&self) -> Option<&HandoffRecord> {
        self.handoffs.last()
    }

    fn trim(&mut self) {
        if self.messages.len() > self.max_messages {
            let excess = self.messages.len() - self.max_messages;
            self.messages.drain(..excess);
        }
        if self.handoffs.len() > self.max_messages {
            let excess = self.handoffs.len() - self.max_messages;
            self.handoffs.drain(..excess);
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn new_session_is_idle_and_empty() {
        let s = Session::new("User", 20);
        assert_eq!(s.status, SessionStatus::Idle);
        assert_eq!(s.current_agent, "User");
        assert!(s.is_empty());
        assert!(s.handoffs().is_empty());
    }

    #[test]
    fn oldest_messages_are_dropped_first() {
        let mut s = Session::new("User", 2);
        s.add_message(Message::user("M1"));
        s.add_message(Message::user("M2"));
        s.add_message(Message::user("M3"));
        assert_eq!(s.messages(), &[Message::user("M2"), Message::user("M3")]);
    }

    #[test]
    fn zero_cap_is_clamped() {
        let mut s = Session::new("User", 0);
        assert_eq!(s.max_messages(), 1);
        s.add_message(Message::user("a"));
        s.add_message(Message::user("b"));
        assert_eq!(s.messages(), &[Message::user("b")]);
    }

    #[test]
    fn handoff_moves_owner_and_is_logged() {
        let mut s = Session::new("OrchestratorAgent", 20);
        s.record_handoff("OrchestratorAgent", "InvoiceAgent", "call_1");
        assert_eq!(s.current_agent, "InvoiceAgent");
        let rec = s.last_handoff().unwrap();
        assert_eq!(rec.from, "OrchestratorAgent");
        assert_eq!(rec.to, "InvoiceAgent");
        assert_eq!(rec.call_id, "call_1");
    }

    #[test]
    fn deserializing_reapplies_the_cap() {
        let raw = json!({
            "id": "s1",
            "messages": [
                {"kind": "user_text", "source": "User", "content": "1"},
                {"kind": "user_text", "source": "User", "content": "2"},
                {"kind": "user_text", "source": "User", "content": "3"}
            ],
            "max_messages": 2,
            "current_agent": "User",
            "status": "processing",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        });
        let s: Session = serde_json::from_value(raw).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.messages()[0], Message::user("2"));
        assert_eq!(s.status, SessionStatus::Processing);
    }

    #[test]
    fn document_round_trip_is_identical() {
        let mut s = Session::new("User", 5);
        s.add_message(Message::user("hello"));
        s.set_status(SessionStatus::Processing);
        s.record_handoff("User", "OrchestratorAgent", "c0");
        let raw = serde_json::to_string(&s).unwrap();
        let back: Session = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, s);
    }
}
