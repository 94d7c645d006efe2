//! Wiring of store, router, model and agents.
//!
//! [`Runtime::build`] registers every agent topic on one
//! [`TopicRouter<Session>`]. [`Runtime::submit`] is the chat entry point.
//! [`Runtime::wait_idle`] ends a one-shot run; [`Runtime::drain`] ends a
//! server, cancelling whatever is still running if it is interrupted.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tower::util::BoxService;
use tower::{BoxError, Layer, Service};
use tracing::{debug, info, instrument};

use crate::agent::AgentBuilder;
use crate::agents::{
    invoice_agent, orchestrator_agent, purchase_order_agent, Escalation, HumanAgent, UserAgent,
    HUMAN_TOPIC, USER_TOPIC,
};
use crate::config::SwitchboardConfig;
use crate::error::{Result, SwitchboardError};
use crate::items::Message;
use crate::logging::TracingLayer;
use crate::provider::ModelSvc;
use crate::router::{Delivery, TopicId, TopicRouter};
use crate::session::{Session, SessionId, SessionStatus};
use crate::sessions::{InMemoryBackend, SessionStore};
use crate::sqlite_session::SqliteBackend;

pub struct Runtime {
    router: TopicRouter<Session>,
    store: SessionStore,
    entry_agent: String,
    escalations: Option<mpsc::UnboundedReceiver<Escalation>>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("entry_agent", &self.entry_agent)
            .field("store", &self.store)
            .finish()
    }
}

impl Runtime {
    /// Register the default agent roster against `model` and `store`.
    pub fn build(config: &SwitchboardConfig, model: ModelSvc, store: SessionStore) -> Result<Self> {
        let router = TopicRouter::with_idle_timeout(Duration::from_secs(config.instance_idle_secs));

        let llm_agents: [AgentBuilder; 3] =
            [orchestrator_agent(), invoice_agent(), purchase_order_agent()];
        for builder in llm_agents {
            let agent = builder
                .model(model.clone())
                .store(store.clone())
                .max_turns(config.max_turns)
                .build()?;
            register_traced(&router, agent.topic().to_string(), agent)?;
        }

        let (human, escalations) = HumanAgent::new(store.clone());
        register_traced(&router, HUMAN_TOPIC, human)?;
        register_traced(&router, USER_TOPIC, UserAgent::new(config.entry_agent.clone()))?;

        if !router.is_registered(&config.entry_agent) {
            return Err(SwitchboardError::Config(format!(
                "entry agent {} is not a registered topic",
                config.entry_agent
            )));
        }

        info!(entry_agent = %config.entry_agent, "runtime ready");
        Ok(Self {
            router,
            store,
            entry_agent: config.entry_agent.clone(),
            escalations: Some(escalations),
        })
    }

    /// Session store selected by `database_url`: SQLite when set, memory otherwise.
    pub async fn store_from_config(config: &SwitchboardConfig) -> Result<SessionStore> {
        match config.database_url.as_deref() {
            Some(url) if url.starts_with("sqlite:") => Ok(SessionStore::new(
                SqliteBackend::connect_url(url).await?,
                config.max_messages,
            )),
            Some(path) => Ok(SessionStore::new(
                SqliteBackend::connect(path).await?,
                config.max_messages,
            )),
            None => Ok(SessionStore::new(
                InMemoryBackend::new(),
                config.max_messages,
            )),
        }
    }

    /// Append `message` to a session and hand the session to the user topic.
    ///
    /// Without `session_id` a new session owned by the entry agent is created.
    /// Returns as soon as the session is queued; poll the store for the reply.
    #[instrument(skip_all, fields(session_id))]
    pub async fn submit(&self, message: &str, session_id: Option<SessionId>) -> Result<SessionId> {
        let mut session = self.open(session_id).await?;
        tracing::Span::current().record("session_id", tracing::field::display(&session.id));

        session.add_message(Message::user(message));
        session.set_status(SessionStatus::Processing);
        self.store.replace(&session).await;

        let id = session.id.clone();
        debug!("publishing to user topic");
        self.router
            .publish(TopicId::keyed(USER_TOPIC, id.as_str()), session)?;
        Ok(id)
    }

    async fn open(&self, session_id: Option<SessionId>) -> Result<Session> {
        match session_id {
            None => Ok(self.store.create(&self.entry_agent).await),
            Some(id) => self
                .store
                .get(&id)
                .await
                .ok_or_else(|| SwitchboardError::UnknownSession(id.to_string())),
        }
    }

    pub async fn session(&self, id: &SessionId) -> Option<Session> {
        self.store.get(id).await
    }

    /// Resolves once no session is queued or being worked on.
    pub async fn wait_idle(&self) {
        self.router.wait_idle().await;
    }

    /// Let queued and running turns finish.
    ///
    /// If `interrupt` resolves first, everything outstanding is cancelled and
    /// the call returns once the cancellations have landed. Returns `true` when
    /// every turn ran to completion.
    pub async fn drain(&self, interrupt: impl Future<Output = ()>) -> bool {
        info!(pending = self.router.pending(), "draining outstanding turns");
        tokio::select! {
            biased;
            _ = self.router.wait_idle() => true,
            _ = interrupt => {
                self.cancel_all();
                self.router.wait_idle().await;
                false
            }
        }
    }

    /// Cancel every in-flight and queued turn.
    pub fn cancel_all(&self) {
        info!(pending = self.router.pending(), "cancelling outstanding work");
        self.router.cancel_all();
    }

    /// Operator side of the human escalation queue. `None` after the first call.
    pub fn take_escalations(&mut self) -> Option<mpsc::UnboundedReceiver<Escalation>> {
        self.escalations.take()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn router(&self) -> &TopicRouter<Session> {
        &self.router
    }

    pub fn entry_agent(&self) -> &str {
        &self.entry_agent
    }
}

fn register_traced<S>(router: &TopicRouter<Session>, topic: impl Into<String>, service: S) -> Result<()>
where
    S: Service<Delivery<Session>, Response = (), Error = BoxError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    router.register(topic, move |_id: &TopicId| {
        BoxService::new(TracingLayer::new().layer(service.clone()))
    })
}
