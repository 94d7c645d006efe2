//! Human-in-the-loop hand-off point.
//!
//! Not LLM-driven. A session delivered here is closed out for the bot side:
//! the user is told a person will follow up, the session is completed with
//! this agent as owner, and an [`Escalation`] is queued for an operator.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tower::{BoxError, Service};
use tracing::{info, warn};

use super::HUMAN_TOPIC;
use crate::items::Message;
use crate::router::Delivery;
use crate::session::{Session, SessionId, SessionStatus};
use crate::sessions::SessionStore;

pub const ESCALATION_NOTICE: &str =
    "I've passed your request to a member of our team. A person will follow up with you shortly.";

/// Work item for an operator.
#[derive(Debug, Clone, PartialEq)]
pub struct Escalation {
    pub session_id: SessionId,
    /// Topic that escalated
    pub from: Option<String>,
    /// `reason` argument of the escalating call, if any
    pub reason: Option<String>,
}

impl Escalation {
    fn from_session(session: &Session) -> Self {
        let handoff = session.last_handoff();
        let reason = handoff.and_then(|h| {
            session.messages().iter().rev().find_map(|m| match m {
                Message::ToolCallRequest { call, .. } if call.id == h.call_id => call
                    .arguments
                    .get("reason")
                    .and_then(|r| r.as_str())
                    .filter(|r| !r.is_empty())
                    .map(str::to_string),
                _ => None,
            })
        });
        Self {
            session_id: session.id.clone(),
            from: handoff.map(|h| h.from.clone()),
            reason,
        }
    }
}

#[derive(Clone)]
pub struct HumanAgent {
    store: SessionStore,
    escalations: mpsc::UnboundedSender<Escalation>,
}

impl HumanAgent {
    /// Agent plus the receiving end of its escalation queue.
    pub fn new(store: SessionStore) -> (Self, mpsc::UnboundedReceiver<Escalation>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                store,
                escalations: tx,
            },
            rx,
        )
    }

    pub async fn handle(&self, mut session: Session) -> Session {
        let escalation = Escalation::from_session(&session);
        session.add_message(Message::assistant(HUMAN_TOPIC, ESCALATION_NOTICE));
        session.set_current_agent(HUMAN_TOPIC);
        session.set_status(SessionStatus::Completed);
        if !self.store.replace(&session).await {
            warn!(session_id = %session.id, "failed to persist escalated session");
        }

        info!(
            session_id = %session.id,
            from = escalation.from.as_deref().unwrap_or("-"),
            reason = escalation.reason.as_deref().unwrap_or("-"),
            "session escalated to a human"
        );
        if self.escalations.send(escalation).is_err() {
            warn!(session_id = %session.id, "no operator is listening for escalations");
        }
        session
    }
}

impl Service<Delivery<Session>> for HumanAgent {
    type Response = ();
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, delivery: Delivery<Session>) -> Self::Future {
        let agent = self.clone();
        Box::pin(async move {
            if delivery.cancel.is_cancelled() {
                return Err(crate::error::SwitchboardError::Cancelled.into());
            }
            agent.handle(delivery.payload).await;
            Ok(())
        })
    }
}
