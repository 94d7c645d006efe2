//! Tools as Tower services.
//!
//! A [`ToolDef`] pairs an OpenAI function spec with a boxed service. An agent
//! owns one [`ToolRegistry`] that resolves every name exactly once into
//! [`ToolKind::Local`] (execute and feed the result back to the model) or
//! [`ToolKind::Delegate`] (execute to learn a destination topic, then hand
//! the session off).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_openai::types::{ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType, FunctionObjectArgs};
use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tower::util::BoxCloneService;
use tower::BoxError;

use crate::error::{Result, SwitchboardError};

/// Uniform tool invocation passed to tool services.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub id: String,   // tool_call_id
    pub name: String, // function.name
    pub arguments: Value,
}

/// Uniform tool output produced by tool services.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub id: String, // same as invocation.id
    pub result: Value,
}

impl ToolOutput {
    /// A JSON object with a top-level `"error"` field reports a failure.
    pub fn is_error(&self) -> bool {
        self.result.get("error").is_some()
    }

    /// Text fed back to the model.
    pub fn content(&self) -> String {
        match &self.result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Destination named by a delegate tool: a JSON string, or an object with `"topic"`.
    pub fn destination_topic(&self) -> Option<String> {
        match &self.result {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Object(map) => map
                .get("topic")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        }
    }
}

/// Boxed tool service type alias.
pub type ToolSvc = BoxCloneService<ToolInvocation, ToolOutput, BoxError>;

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, std::result::Result<Value, BoxError>> + Send + Sync>;

/// Definition of a tool: function spec (for OpenAI) + service implementation.
#[derive(Clone)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
    pub service: ToolSvc,
}

impl std::fmt::Debug for ToolDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDef").field("name", &self.name).finish()
    }
}

impl ToolDef {
    /// Create a tool definition from a handler that takes JSON args and returns JSON.
    pub fn from_handler(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: Value,
        handler: Handler,
    ) -> Self {
        let name = name.into();
        let expected = name.clone();
        let svc = tower::service_fn(move |inv: ToolInvocation| {
            let handler = handler.clone();
            let expected = expected.clone();
            async move {
                if inv.name != expected {
                    return Err::<ToolOutput, BoxError>(
                        format!("routed to wrong tool: expected={}, got={}", expected, inv.name).into(),
                    );
                }
                let out = (handler)(inv.arguments).await?;
                Ok(ToolOutput {
                    id: inv.id,
                    result: out,
                })
            }
        });
        Self {
            name,
            description: description.into(),
            parameters_schema,
            service: BoxCloneService::new(svc),
        }
    }

    /// Convert this tool's function signature into an OpenAI ChatCompletionTool spec.
    pub fn to_openai_tool(&self) -> Result<ChatCompletionTool> {
        let func = FunctionObjectArgs::default()
            .name(self.name.clone())
            .description(self.description.clone())
            .parameters(self.parameters_schema.clone())
            .build()
            .map_err(|e| SwitchboardError::Config(format!("tool {}: {}", self.name, e)))?;
        ChatCompletionToolArgs::default()
            .r#type(ChatCompletionToolType::Function)
            .function(func)
            .build()
            .map_err(|e| SwitchboardError::Config(format!("tool {}: {}", self.name, e)))
    }
}

/// Create a tool from a typed handler.
/// - `A` is the input args struct (Deserialize + JsonSchema)
/// - `R` is the output type (Serialize)
pub fn tool_typed<A, H, Fut, R>(
    name: impl Into<String>,
    description: impl Into<String>,
    handler: H,
) -> ToolDef
where
    A: DeserializeOwned + JsonSchema + Send + 'static,
    R: serde::Serialize + Send + 'static,
    H: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, BoxError>> + Send + 'static,
{
    let schema = schemars::schema_for!(A);
    let params_value = serde_json::to_value(schema.schema)
        .unwrap_or_else(|_| json!({"type": "object", "properties": {}}));
    let handler = Arc::new(handler);
    let erased: Handler = Arc::new(move |raw: Value| {
        let h = handler.clone();
        Box::pin(async move {
            let args: A = serde_json::from_value(raw)?;
            let out: R = (h.as_ref())(args).await?;
            Ok(serde_json::to_value(out)?)
        })
    });
    ToolDef::from_handler(name, description, params_value, erased)
}

/// Arguments every hand-off tool accepts.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct HandoffArgs {
    /// Why the conversation is being transferred
    #[serde(default)]
    pub reason: String,
}

/// Delegate tool whose execution always names `topic`.
pub fn handoff_tool(
    name: impl Into<String>,
    description: impl Into<String>,
    topic: impl Into<String>,
) -> ToolDef {
    let topic = topic.into();
    tool_typed(name, description, move |_args: HandoffArgs| {
        let topic = topic.clone();
        async move { Ok::<_, BoxError>(Value::String(topic)) }
    })
}

/// How a resolved tool name is treated by the agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Local,
    Delegate,
}

/// Name → (kind, service) table built once per agent.
#[derive(Clone)]
pub struct ToolRegistry {
    entries: HashMap<String, (ToolKind, ToolSvc)>,
    specs: Vec<ChatCompletionTool>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

impl ToolRegistry {
    /// Fails with `DuplicateTool` if a name appears twice across both lists.
    pub fn new(local: Vec<ToolDef>, delegate: Vec<ToolDef>) -> Result<Self> {
        let tagged = local
            .into_iter()
            .map(|t| (ToolKind::Local, t))
            .chain(delegate.into_iter().map(|t| (ToolKind::Delegate, t)));

        let mut entries = HashMap::new();
        let mut specs = Vec::new();
        for (kind, def) in tagged {
            if entries.contains_key(&def.name) {
                return Err(SwitchboardError::DuplicateTool { name: def.name });
            }
            specs.push(def.to_openai_tool()?);
            entries.insert(def.name, (kind, def.service));
        }
        Ok(Self { entries, specs })
    }

    /// Function specs of every tool, local first, in registration order.
    pub fn specs(&self) -> &[ChatCompletionTool] {
        &self.specs
    }

    pub fn kind(&self, name: &str) -> Option<ToolKind> {
        self.entries.get(name).map(|(kind, _)| *kind)
    }

    pub fn resolve(&self, name: &str) -> Result<(ToolKind, ToolSvc)> {
        self.entries
            .get(name)
            .map(|(kind, svc)| (*kind, svc.clone()))
            .ok_or_else(|| SwitchboardError::UnknownTool {
                name: name.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    #[derive(Deserialize, JsonSchema)]
    struct AddArgs {
        a: i64,
        b: i64,
    }

    fn adder() -> ToolDef {
        tool_typed("add", "Add two numbers", |args: AddArgs| async move {
            Ok::<_, BoxError>(json!({"sum": args.a + args.b}))
        })
    }

    #[tokio::test]
    async fn typed_tool_executes() {
        let tool = adder();
        assert_eq!(tool.parameters_schema["type"], "object");
        let out = tool
            .service
            .clone()
            .oneshot(ToolInvocation {
                id: "c1".into(),
                name: "add".into(),
                arguments: json!({"a": 2, "b": 3}),
            })
            .await
            .unwrap();
        assert_eq!(out.id, "c1");
        assert_eq!(out.result, json!({"sum": 5}));
        assert!(!out.is_error());
    }

    #[tokio::test]
    async fn bad_arguments_fail_the_call() {
        let err = adder()
            .service
            .oneshot(ToolInvocation {
                id: "c1".into(),
                name: "add".into(),
                arguments: json!({"a": "two"}),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid type"));
    }

    #[test]
    fn registry_resolves_kinds_and_rejects_duplicates() {
        let reg = ToolRegistry::new(
            vec![adder()],
            vec![handoff_tool("transfer", "Transfer", "InvoiceAgent")],
        )
        .unwrap();
        assert_eq!(reg.kind("add"), Some(ToolKind::Local));
        assert_eq!(reg.kind("transfer"), Some(ToolKind::Delegate));
        assert_eq!(reg.specs().len(), 2);
        assert!(matches!(
            reg.resolve("fetch_x"),
            Err(SwitchboardError::UnknownTool { name }) if name == "fetch_x"
        ));

        let dup = ToolRegistry::new(vec![adder()], vec![adder()]);
        assert!(matches!(dup, Err(SwitchboardError::DuplicateTool { name }) if name == "add"));
    }

    #[tokio::test]
    async fn handoff_tool_names_its_topic() {
        let out = handoff_tool("transfer", "Transfer", "InvoiceAgent")
            .service
            .oneshot(ToolInvocation {
                id: "c1".into(),
                name: "transfer".into(),
                arguments: json!({"reason": "invoice question"}),
            })
            .await
            .unwrap();
        assert_eq!(out.destination_topic().as_deref(), Some("InvoiceAgent"));
    }

    #[test]
    fn error_objects_and_topic_objects() {
        let out = ToolOutput {
            id: "1".into(),
            result: json!({"error": "Invoice INV-9 not found"}),
        };
        assert!(out.is_error());
        assert_eq!(out.destination_topic(), None);

        let out = ToolOutput {
            id: "1".into(),
            result: json!({"topic": "HumanAgent"}),
        };
        assert_eq!(out.destination_topic().as_deref(), Some("HumanAgent"));
        assert_eq!(out.content(), r#"{"topic":"HumanAgent"}"#);
    }
}
