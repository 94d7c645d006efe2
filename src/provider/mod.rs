//! Completion provider abstraction
//!
//! Agents see the LLM as a Tower service:
//! `Service<CompletionRequest, Response = Completion, Error = BoxError>`.
//! Any service with that shape is a [`ModelService`].
//!
//! Implementations:
//! - [`OpenAIProvider`]: async-openai chat completions
//! - [`ScriptedProvider`]: replays a fixed script of completions and records
//!   every request it receives; drives the agent loop deterministically in
//!   tests and offline demos

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_openai::{
    config::OpenAIConfig,
    types::{ChatCompletionTool, CreateChatCompletionRequestArgs},
    Client,
};
use tower::util::BoxCloneService;
use tower::{BoxError, Service};
use tracing::debug;

use crate::codec;
use crate::items::{Message, ToolCall};

/// One completion request: fixed system prompt, session history, tool schemas.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ChatCompletionTool>,
}

/// What the model produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionContent {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: CompletionContent,
    pub finish_reason: Option<String>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: CompletionContent::Text(content.into()),
            finish_reason: Some("stop".to_string()),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            content: CompletionContent::ToolCalls(calls),
            finish_reason: Some("tool_calls".to_string()),
        }
    }
}

/// Completion capability as a Tower service.
pub trait ModelService:
    Service<CompletionRequest, Response = Completion, Error = BoxError>
{
}

impl<T> ModelService for T where T: Service<CompletionRequest, Response = Completion, Error = BoxError>
{}

/// Boxed provider shared by agents.
pub type ModelSvc = BoxCloneService<CompletionRequest, Completion, BoxError>;

pub fn boxed<P>(provider: P) -> ModelSvc
where
    P: ModelService + Clone + Send + 'static,
    P::Future: Send + 'static,
{
    BoxCloneService::new(provider)
}

/// OpenAI chat completions provider.
#[derive(Clone)]
pub struct OpenAIProvider {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAIProvider {
    /// Provider using `OPENAI_API_KEY` from the environment.
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_client(Arc::new(Client::new()), model)
    }

    pub fn with_client(client: Arc<Client<OpenAIConfig>>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn max_tokens(mut self, mt: u32) -> Self {
        self.max_tokens = Some(mt);
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

impl Service<CompletionRequest> for OpenAIProvider {
    type Response = Completion;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: CompletionRequest) -> Self::Future {
        let client = self.client.clone();
        let model = self.model.clone();
        let temperature = self.temperature;
        let max_tokens = self.max_tokens;

        Box::pin(async move {
            let messages = codec::request_messages(&req.system_prompt, &req.messages)?;

            let mut builder = CreateChatCompletionRequestArgs::default();
            builder.model(&model).messages(messages);
            if !req.tools.is_empty() {
                builder.tools(req.tools);
            }
            if let Some(t) = temperature {
                builder.temperature(t);
            }
            if let Some(mt) = max_tokens {
                builder.max_tokens(mt);
            }
            let request = builder.build()?;

            let response = client.chat().create(request).await?;
            let choice = response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| -> BoxError { "no choices in completion response".into() })?;

            let finish_reason = choice
                .finish_reason
                .as_ref()
                .and_then(|r| serde_json::to_value(r).ok())
                .and_then(|v| v.as_str().map(str::to_string));

            let calls: Vec<ToolCall> = choice
                .message
                .tool_calls
                .unwrap_or_default()
                .iter()
                .map(codec::from_wire_call)
                .collect();

            let content = if calls.is_empty() {
                CompletionContent::Text(choice.message.content.unwrap_or_default())
            } else {
                CompletionContent::ToolCalls(calls)
            };

            if let Some(usage) = response.usage {
                debug!(
                    model = %model,
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "completion received"
                );
            }

            Ok(Completion {
                content,
                finish_reason,
            })
        })
    }
}

type Script = VecDeque<Result<Completion, String>>;

/// Replays scripted completions in order; errors once the script runs out.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    script: Arc<Mutex<Script>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_completion(self, completion: Completion) -> Self {
        self.push(Ok(completion));
        self
    }

    pub fn with_text(self, content: impl Into<String>) -> Self {
        self.with_completion(Completion::text(content))
    }

    /// One completion asking for a single call to `name`.
    pub fn with_tool_call(
        self,
        id: impl Into<String>,
        name: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        self.with_completion(Completion::tool_calls(vec![ToolCall::new(id, name, args)]))
    }

    pub fn with_tool_calls(self, calls: Vec<ToolCall>) -> Self {
        self.with_completion(Completion::tool_calls(calls))
    }

    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.push(Err(message.into()));
        self
    }

    fn push(&self, entry: Result<Completion, String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(entry);
        }
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Service<CompletionRequest> for ScriptedProvider {
    type Response = Completion;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: CompletionRequest) -> Self::Future {
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(req);
        }
        let next = self
            .script
            .lock()
            .map_err(|_| "script lock poisoned".to_string())
            .and_then(|mut s| s.pop_front().ok_or_else(|| "scripted provider exhausted".to_string()));
        Box::pin(async move {
            match next {
                Ok(Ok(completion)) => Ok(completion),
                Ok(Err(message)) | Err(message) => Err(message.into()),
            }
        })
    }
}
