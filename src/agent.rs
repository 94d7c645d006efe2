//! # Agent (orientation)
//!
//! An [`AiAgent`] is one topic's tool-using, delegating state machine. Per
//! delivered session it runs a turn:
//!
//! ```text
//! RECEIVED -> THINKING -> TOOL_EXEC -> THINKING ... -> DONE
//!                      \-> DELEGATING
//! ```
//!
//! - THINKING asks the model for a completion over the system prompt, the
//!   session history and the schemas of every local and delegate tool.
//! - TOOL_EXEC runs the whole batch in the order the model returned it and
//!   appends one result per call before the next completion is requested.
//! - DELEGATING records the hand-off, persists, and publishes the session to
//!   the destination topic keyed by session id. The turn ends without
//!   completing the session; the destination now owns it.
//! - DONE appends the assistant text, marks the session completed with this
//!   agent as owner, and persists.
//!
//! Tool failures are folded into the history as error-flagged results. An
//! unknown tool name, a failed completion, exceeding `max_turns`, or a
//! cancelled delivery ends the turn with an error and leaves the status as
//! it was (normally `processing`).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_openai::types::ChatCompletionTool;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower::{BoxError, Service, ServiceExt};
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SwitchboardError};
use crate::items::{Message, ToolCall};
use crate::provider::{self, CompletionContent, CompletionRequest, ModelService, ModelSvc};
use crate::router::{Delivery, Publisher, TopicId};
use crate::session::{Session, SessionStatus};
use crate::sessions::SessionStore;
use crate::tool::{ToolDef, ToolInvocation, ToolKind, ToolRegistry, ToolSvc};

/// Default bound on completions per turn.
pub const DEFAULT_MAX_TURNS: usize = 10;

/// Static configuration of one agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Topic the agent is registered under; also the source of its messages
    pub topic: String,
    pub system_prompt: String,
    /// Completions allowed per turn before giving up
    pub max_turns: usize,
}

impl AgentConfig {
    pub fn new(topic: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            system_prompt: system_prompt.into(),
            max_turns: DEFAULT_MAX_TURNS,
        }
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Plain text answer; the session is completed
    Completed,
    /// Ownership moved to these topics
    HandedOff { to: Vec<String> },
}

struct AgentInner {
    config: AgentConfig,
    specs: Vec<ChatCompletionTool>,
    tools: Mutex<ToolRegistry>,
    model: Mutex<ModelSvc>,
    store: SessionStore,
}

/// LLM-driven agent. Cheap to clone.
#[derive(Clone)]
pub struct AiAgent {
    inner: Arc<AgentInner>,
}

impl std::fmt::Debug for AiAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiAgent")
            .field("topic", &self.inner.config.topic)
            .field("max_turns", &self.inner.config.max_turns)
            .finish()
    }
}

pub struct AgentBuilder {
    config: AgentConfig,
    local: Vec<ToolDef>,
    delegate: Vec<ToolDef>,
    model: Option<ModelSvc>,
    store: Option<SessionStore>,
}

impl AgentBuilder {
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    pub fn max_turns(mut self, max_turns: usize) -> Self {
        self.config.max_turns = max_turns;
        self
    }

    /// Tool whose result is fed back to the model.
    pub fn tool(mut self, tool: ToolDef) -> Self {
        self.local.push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<ToolDef>) -> Self {
        self.local.extend(tools);
        self
    }

    /// Tool whose result names the topic to hand the session to.
    pub fn delegate(mut self, tool: ToolDef) -> Self {
        self.delegate.push(tool);
        self
    }

    pub fn delegates(mut self, tools: Vec<ToolDef>) -> Self {
        self.delegate.extend(tools);
        self
    }

    pub fn model(mut self, model: ModelSvc) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_provider<P>(self, provider: P) -> Self
    where
        P: ModelService + Clone + Send + 'static,
        P::Future: Send + 'static,
    {
        self.model(provider::boxed(provider))
    }

    pub fn store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Resolve tool names and freeze the configuration.
    pub fn build(self) -> Result<AiAgent> {
        let model = self.model.ok_or_else(|| {
            SwitchboardError::Config(format!("agent {} has no model", self.config.topic))
        })?;
        let store = self.store.ok_or_else(|| {
            SwitchboardError::Config(format!("agent {} has no session store", self.config.topic))
        })?;
        if self.config.max_turns == 0 {
            return Err(SwitchboardError::Config(format!(
                "agent {}: max_turns must be at least 1",
                self.config.topic
            )));
        }
        let tools = ToolRegistry::new(self.local, self.delegate)?;
        Ok(AiAgent {
            inner: Arc::new(AgentInner {
                specs: tools.specs().to_vec(),
                tools: Mutex::new(tools),
                model: Mutex::new(model),
                store,
                config: self.config,
            }),
        })
    }
}

async fn guarded<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SwitchboardError::Cancelled),
        out = fut => Ok(out),
    }
}

impl AiAgent {
    pub fn builder(topic: impl Into<String>) -> AgentBuilder {
        AgentBuilder {
            config: AgentConfig::new(topic, ""),
            local: Vec::new(),
            delegate: Vec::new(),
            model: None,
            store: None,
        }
    }

    pub fn topic(&self) -> &str {
        &self.inner.config.topic
    }

    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    /// Names of the advertised tools, local first.
    pub fn tool_names(&self) -> Vec<String> {
        self.inner
            .specs
            .iter()
            .map(|spec| spec.function.name.clone())
            .collect()
    }

    /// Run one turn over `session`.
    #[instrument(skip_all, fields(agent = %self.inner.config.topic, session_id = %session.id))]
    pub async fn handle(
        &self,
        mut session: Session,
        cancel: &CancellationToken,
        publisher: &Publisher<Session>,
    ) -> Result<TurnOutcome> {
        let topic = self.inner.config.topic.clone();
        session.set_status(SessionStatus::Processing);
        debug!("session received");

        for step in 0..self.inner.config.max_turns {
            let request = CompletionRequest {
                system_prompt: self.inner.config.system_prompt.clone(),
                messages: session.messages().to_vec(),
                tools: self.inner.specs.clone(),
            };
            let model = self.inner.model.lock().await.clone();
            let completion = guarded(cancel, model.oneshot(request))
                .await?
                .map_err(|e| SwitchboardError::from_boxed(e, SwitchboardError::Completion))?;

            let calls = match completion.content {
                CompletionContent::ToolCalls(calls) if !calls.is_empty() => calls,
                CompletionContent::ToolCalls(_) => {
                    return self.finish(session, String::new(), cancel).await;
                }
                CompletionContent::Text(text) => {
                    return self.finish(session, text, cancel).await;
                }
            };

            debug!(step, calls = calls.len(), "executing tool batch");
            let batch = self.resolve_batch(calls).await?;
            for (call, _, _) in &batch {
                session.add_message(Message::tool_call(topic.clone(), call.clone()));
            }

            let mut destinations: Vec<(String, String)> = Vec::new();
            for (call, kind, svc) in batch {
                let result = self
                    .execute(&call, kind, svc, cancel, publisher, &mut destinations)
                    .await?;
                session.add_message(result);
            }

            if destinations.is_empty() {
                continue;
            }
            return self.hand_off(session, destinations, cancel, publisher).await;
        }

        warn!(max_turns = self.inner.config.max_turns, "turn did not settle");
        Err(SwitchboardError::MaxTurnsExceeded {
            max_turns: self.inner.config.max_turns,
        })
    }

    /// Resolve every name up front so an unknown tool aborts before any call runs.
    async fn resolve_batch(&self, calls: Vec<ToolCall>) -> Result<Vec<(ToolCall, ToolKind, ToolSvc)>> {
        let tools = self.inner.tools.lock().await;
        calls
            .into_iter()
            .map(|call| -> Result<(ToolCall, ToolKind, ToolSvc)> {
                let (kind, svc) = tools.resolve(&call.name)?;
                Ok((call, kind, svc))
            })
            .collect()
    }

    async fn execute(
        &self,
        call: &ToolCall,
        kind: ToolKind,
        svc: ToolSvc,
        cancel: &CancellationToken,
        publisher: &Publisher<Session>,
        destinations: &mut Vec<(String, String)>,
    ) -> Result<Message> {
        let invocation = ToolInvocation {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        };
        let output = match guarded(cancel, svc.oneshot(invocation)).await? {
            Ok(output) => output,
            Err(e) => {
                let failure = SwitchboardError::ToolExecution {
                    tool: call.name.clone(),
                    message: e.to_string(),
                };
                warn!(error = %failure, "tool failed");
                return Ok(Message::tool_error(call.id.clone(), failure.to_string()));
            }
        };

        if kind == ToolKind::Local {
            return Ok(if output.is_error() {
                Message::tool_error(call.id.clone(), output.content())
            } else {
                Message::tool_result(call.id.clone(), output.content())
            });
        }

        match output.destination_topic() {
            Some(to) if publisher.is_registered(&to) => {
                info!(tool = %call.name, to = %to, "delegating");
                let note = format!("Transferred to {to}. Adopt persona immediately.");
                destinations.push((to, call.id.clone()));
                Ok(Message::tool_result(call.id.clone(), note))
            }
            Some(to) => {
                warn!(tool = %call.name, to = %to, "delegate named an unknown topic");
                Ok(Message::tool_error(
                    call.id.clone(),
                    format!("unknown destination topic: {to}"),
                ))
            }
            None => {
                warn!(tool = %call.name, "delegate returned no destination");
                Ok(Message::tool_error(
                    call.id.clone(),
                    "delegate tool did not name a destination topic",
                ))
            }
        }
    }

    async fn hand_off(
        &self,
        mut session: Session,
        destinations: Vec<(String, String)>,
        cancel: &CancellationToken,
        publisher: &Publisher<Session>,
    ) -> Result<TurnOutcome> {
        let topic = &self.inner.config.topic;
        if destinations.len() > 1 {
            warn!(
                destinations = ?destinations.iter().map(|(to, _)| to.as_str()).collect::<Vec<_>>(),
                "multiple delegations in one batch; fanning out"
            );
        }
        for (to, call_id) in &destinations {
            session.record_handoff(topic.clone(), to.clone(), call_id.clone());
        }

        if !guarded(cancel, self.inner.store.replace(&session)).await? {
            warn!("pre-hand-off persist failed; publishing anyway");
        }

        let mut targets = Vec::with_capacity(destinations.len());
        for (to, _) in destinations {
            if cancel.is_cancelled() {
                return Err(SwitchboardError::Cancelled);
            }
            publisher.publish_with_cancel(
                TopicId::keyed(to.clone(), session.id.as_str()),
                session.clone(),
                cancel.child_token(),
            )?;
            targets.push(to);
        }
        Ok(TurnOutcome::HandedOff { to: targets })
    }

    async fn finish(
        &self,
        mut session: Session,
        text: String,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let topic = self.inner.config.topic.clone();
        session.add_message(Message::assistant(topic.clone(), text));
        session.set_current_agent(topic);
        session.set_status(SessionStatus::Completed);
        if !guarded(cancel, self.inner.store.replace(&session)).await? {
            warn!("failed to persist completed session");
        }
        debug!("turn completed");
        Ok(TurnOutcome::Completed)
    }
}

impl Service<Delivery<Session>> for AiAgent {
    type Response = ();
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<(), BoxError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, delivery: Delivery<Session>) -> Self::Future {
        let agent = self.clone();
        Box::pin(async move {
            agent
                .handle(delivery.payload, &delivery.cancel, &delivery.publisher)
                .await
                .map(|_| ())
                .map_err(BoxError::from)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ScriptedProvider;
    use crate::router::{HandlerService, TopicRouter};
    use crate::tool::{handoff_tool, tool_typed};
    use pretty_assertions::assert_eq;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::{json, Value};

    #[derive(Deserialize, JsonSchema)]
    struct Args {
        id: String,
    }

    fn lookup() -> ToolDef {
        tool_typed("lookup", "Look something up", |args: Args| async move {
            if args.id == "missing" {
                Ok::<_, BoxError>(json!({"error": format!("{} not found", args.id)}))
            } else {
                Ok(json!({"id": args.id, "status": "paid"}))
            }
        })
    }

    fn agent(provider: ScriptedProvider, store: SessionStore) -> AiAgent {
        AiAgent::builder("InvoiceAgent")
            .system_prompt("You answer invoice questions.")
            .tool(lookup())
            .delegate(handoff_tool("transfer_back", "Back to triage", "Triage"))
            .with_provider(provider)
            .store(store)
            .build()
            .unwrap()
    }

    type Captured = Arc<std::sync::Mutex<Vec<(TopicId, Session)>>>;

    /// Register `topic` as a sink that records every delivery.
    fn capture(router: &TopicRouter<Session>, topic: &str) -> Captured {
        let seen: Captured = Arc::default();
        let sink = seen.clone();
        router
            .register_service(
                topic,
                tower::service_fn(move |d: Delivery<Session>| {
                    let sink = sink.clone();
                    async move {
                        sink.lock().unwrap().push((d.topic, d.payload));
                        Ok::<_, BoxError>(())
                    }
                }),
            )
            .unwrap();
        seen
    }

    async fn processing_session(store: &SessionStore, text: &str) -> Session {
        let mut session = store.create("InvoiceAgent").await;
        session.add_message(Message::user(text));
        session.set_status(SessionStatus::Processing);
        assert!(store.replace(&session).await);
        session
    }

    #[tokio::test]
    async fn plain_text_completes_the_session() {
        let store = SessionStore::in_memory();
        let router = TopicRouter::<Session>::new();
        let provider = ScriptedProvider::new().with_text("Hello!");
        let a = agent(provider.clone(), store.clone());

        let mut session = store.create("User").await;
        session.add_message(Message::user("hi"));
        let outcome = a
            .handle(session.clone(), &CancellationToken::new(), &router.publisher())
            .await
            .unwrap();
        assert_eq!(outcome, TurnOutcome::Completed);

        let stored = store.get(&session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(stored.current_agent, "InvoiceAgent");
        assert_eq!(
            stored.messages().last().unwrap(),
            &Message::assistant("InvoiceAgent", "Hello!")
        );
        let req = &provider.requests()[0];
        assert_eq!(req.system_prompt, "You answer invoice questions.");
        assert_eq!(req.tools.len(), 2);
    }

    #[tokio::test]
    async fn tool_results_precede_the_next_completion() {
        let store = SessionStore::in_memory();
        let router = TopicRouter::<Session>::new();
        let provider = ScriptedProvider::new()
            .with_tool_calls(vec![
                ToolCall::new("c1", "lookup", json!({"id": "INV-1"})),
                ToolCall::new("c2", "lookup", json!({"id": "missing"})),
            ])
            .with_text("One is paid, one is missing.");
        let a = agent(provider.clone(), store.clone());

        let session = store.create("User").await;
        a.handle(session, &CancellationToken::new(), &router.publisher())
            .await
            .unwrap();

        let second = &provider.requests()[1].messages;
        let kinds: Vec<_> = second
            .iter()
            .map(|m| match m {
                Message::ToolCallRequest { call, .. } => format!("call:{}", call.id),
                Message::ToolResult { call_id, is_error, .. } => format!("result:{call_id}:{is_error}"),
                other => other.content(),
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["call:c1", "call:c2", "result:c1:false", "result:c2:true"]
        );
    }

    #[tokio::test]
    async fn unknown_tool_is_fatal_and_leaves_history_untouched() {
        let store = SessionStore::in_memory();
        let router = TopicRouter::<Session>::new();
        let provider = ScriptedProvider::new().with_tool_calls(vec![
            ToolCall::new("c1", "lookup", json!({"id": "INV-1"})),
            ToolCall::new("c2", "fetch_x", json!({})),
        ]);
        let a = agent(provider, store.clone());

        let session = store.create("User").await;
        store.update_status(&session.id, SessionStatus::Processing).await;
        let err = a
            .handle(session.clone(), &CancellationToken::new(), &router.publisher())
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::UnknownTool { name } if name == "fetch_x"));

        let stored = store.get(&session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Processing);
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn completion_failure_is_typed() {
        let store = SessionStore::in_memory();
        let router = TopicRouter::<Session>::new();
        let a = agent(ScriptedProvider::new().with_failure("503"), store.clone());
        let session = store.create("User").await;
        let err = a
            .handle(session, &CancellationToken::new(), &router.publisher())
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::Completion(m) if m == "503"));
    }

    #[tokio::test]
    async fn max_turns_bounds_the_loop() {
        let store = SessionStore::in_memory();
        let router = TopicRouter::<Session>::new();
        let mut provider = ScriptedProvider::new();
        for i in 0..3 {
            provider = provider.with_tool_call(format!("c{i}"), "lookup", json!({"id": "INV-1"}));
        }
        let a = AiAgent::builder("InvoiceAgent")
            .tool(lookup())
            .max_turns(3)
            .with_provider(provider)
            .store(store.clone())
            .build()
            .unwrap();
        let session = store.create("User").await;
        let err = a
            .handle(session, &CancellationToken::new(), &router.publisher())
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::MaxTurnsExceeded { max_turns: 3 }));
    }

    #[tokio::test]
    async fn cancelled_turn_persists_nothing() {
        let store = SessionStore::in_memory();
        let router = TopicRouter::<Session>::new();
        let a = agent(ScriptedProvider::new().with_text("never"), store.clone());
        let session = store.create("User").await;
        let token = CancellationToken::new();
        token.cancel();
        let err = a
            .handle(session.clone(), &token, &router.publisher())
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::Cancelled));
        assert_eq!(store.get(&session.id).await.unwrap().status, SessionStatus::Idle);
    }

    #[tokio::test]
    async fn builder_rejects_duplicate_tools() {
        let err = AiAgent::builder("A")
            .tool(lookup())
            .delegate(handoff_tool("lookup", "clash", "B"))
            .with_provider(ScriptedProvider::new())
            .store(SessionStore::in_memory())
            .build()
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::DuplicateTool { .. }));
    }

    #[tokio::test]
    async fn delegation_hands_the_session_to_its_destination() {
        let store = SessionStore::in_memory();
        let router = TopicRouter::<Session>::new();
        let triage = capture(&router, "Triage");
        let provider = ScriptedProvider::new().with_tool_call("c1", "transfer_back", json!({}));
        let a = agent(provider.clone(), store.clone());
        let session = processing_session(&store, "this is about a PO").await;

        let outcome = a
            .handle(session.clone(), &CancellationToken::new(), &router.publisher())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::HandedOff {
                to: vec!["Triage".to_string()]
            }
        );

        // persisted before the destination could see it
        let stored = store.get(&session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Processing);
        assert_eq!(stored.current_agent, "Triage");
        assert_eq!(stored.handoffs().len(), 1);
        let record = stored.last_handoff().unwrap();
        assert_eq!(record.from, "InvoiceAgent");
        assert_eq!(record.to, "Triage");
        assert_eq!(record.call_id, "c1");
        let note = stored.messages().last().unwrap();
        assert!(!note.is_error());
        assert!(note.content().starts_with("Transferred to Triage"));

        router.wait_idle().await;
        let seen = triage.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, TopicId::keyed("Triage", session.id.as_str()));
        assert_eq!(seen[0].1, stored);
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn two_delegations_in_one_batch_fan_out() {
        let store = SessionStore::in_memory();
        let router = TopicRouter::<Session>::new();
        let triage = capture(&router, "Triage");
        let human = capture(&router, "Human");
        let provider = ScriptedProvider::new().with_tool_calls(vec![
            ToolCall::new("c1", "transfer_back", json!({})),
            ToolCall::new("c2", "ask_a_person", json!({"reason": "angry"})),
        ]);
        let a = AiAgent::builder("InvoiceAgent")
            .delegate(handoff_tool("transfer_back", "Back to triage", "Triage"))
            .delegate(handoff_tool("ask_a_person", "Escalate", "Human"))
            .with_provider(provider)
            .store(store.clone())
            .build()
            .unwrap();
        let session = processing_session(&store, "help").await;

        let outcome = a
            .handle(session.clone(), &CancellationToken::new(), &router.publisher())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::HandedOff {
                to: vec!["Triage".to_string(), "Human".to_string()]
            }
        );

        let stored = store.get(&session.id).await.unwrap();
        let targets: Vec<&str> = stored.handoffs().iter().map(|h| h.to.as_str()).collect();
        assert_eq!(targets, vec!["Triage", "Human"]);
        assert_eq!(stored.current_agent, "Human");

        router.wait_idle().await;
        assert_eq!(triage.lock().unwrap().len(), 1);
        assert_eq!(human.lock().unwrap().len(), 1);
        assert_eq!(
            human.lock().unwrap()[0].0,
            TopicId::keyed("Human", session.id.as_str())
        );
    }

    #[tokio::test]
    async fn unregistered_destination_is_fed_back_to_the_model() {
        let store = SessionStore::in_memory();
        let router = TopicRouter::<Session>::new();
        let provider = ScriptedProvider::new()
            .with_tool_call("c1", "transfer_back", json!({}))
            .with_text("I'll keep helping you here.");
        let a = agent(provider.clone(), store.clone());
        let session = processing_session(&store, "transfer me").await;

        let outcome = a
            .handle(session.clone(), &CancellationToken::new(), &router.publisher())
            .await
            .unwrap();
        assert_eq!(outcome, TurnOutcome::Completed);

        let stored = store.get(&session.id).await.unwrap();
        assert!(stored.handoffs().is_empty());
        assert_eq!(stored.current_agent, "InvoiceAgent");
        let result = stored
            .messages()
            .iter()
            .find(|m| matches!(m, Message::ToolResult { call_id, .. } if call_id == "c1"))
            .unwrap();
        assert!(result.is_error());
        assert_eq!(result.content(), "unknown destination topic: Triage");

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].messages.iter().any(|m| m.is_error()));
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test]
    async fn failing_tool_reports_a_tool_execution_error() {
        let store = SessionStore::in_memory();
        let router = TopicRouter::<Session>::new();
        let ledger = tool_typed("ledger", "Query the ledger", |_args: Args| async move {
            Err::<Value, BoxError>("ledger offline".into())
        });
        let provider = ScriptedProvider::new()
            .with_tool_call("c1", "ledger", json!({"id": "INV-1"}))
            .with_text("The ledger is down, try later.");
        let a = AiAgent::builder("InvoiceAgent")
            .tool(ledger)
            .with_provider(provider)
            .store(store.clone())
            .build()
            .unwrap();
        let session = processing_session(&store, "balance?").await;

        a.handle(session.clone(), &CancellationToken::new(), &router.publisher())
            .await
            .unwrap();

        let stored = store.get(&session.id).await.unwrap();
        let result = &stored.messages()[2];
        assert!(result.is_error());
        assert_eq!(
            result.content(),
            "Tool execution error in ledger: ledger offline"
        );
        assert_eq!(stored.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn panicking_tool_leaves_the_router_usable() {
        let store = SessionStore::in_memory();
        let router = TopicRouter::<Session>::new();
        let boom = tool_typed("boom", "Always panics", |_args: Args| async move {
            if true {
                panic!("tool exploded");
            }
            Ok::<Value, BoxError>(Value::Null)
        });
        let a = AiAgent::builder("InvoiceAgent")
            .tool(boom)
            .with_provider(ScriptedProvider::new().with_tool_call("c1", "boom", json!({"id": "x"})))
            .store(store.clone())
            .build()
            .unwrap();
        router
            .register("InvoiceAgent", move |_id: &TopicId| -> HandlerService<Session> {
                tower::util::BoxService::new(a.clone())
            })
            .unwrap();
        let session = processing_session(&store, "go").await;

        router
            .publish(TopicId::keyed("InvoiceAgent", session.id.as_str()), session.clone())
            .unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), router.wait_idle())
            .await
            .unwrap();

        let stored = store.get(&session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Processing);
        assert_eq!(stored.len(), 1);
    }
}
