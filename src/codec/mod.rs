//! Mapping between session [`Message`]s and OpenAI chat request messages.
//!
//! History → wire:
//! - consecutive `ToolCallRequest`s from one source coalesce into a single
//!   assistant message carrying all of their `tool_calls`
//! - a `ToolResult` whose call id has no request earlier in the window is
//!   dropped; trimming the oldest entries can leave such orphans at the head
//! - a request with no result later in the window is dropped too, since the
//!   API rejects unanswered tool calls
//! - error-flagged results are sent with an `Error: ` prefix, always added, so
//!   an error whose text already starts with it survives the trip back
//! - tool arguments are sent as their JSON encoding; a string argument goes out
//!   quoted and comes back a string
//!
//! Wire → history is the inverse and is used to import transcripts. The
//! mapping is lossless apart from the dropped entries above and one case the
//! wire cannot express: a successful result whose text begins with `Error: `
//! comes back error-flagged with the prefix stripped.
//!
//! Pure functions; nothing here touches Tower.

use std::collections::HashSet;

use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestAssistantMessageContent, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestSystemMessageContent,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestToolMessageContent,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
    ChatCompletionToolType, FunctionCall,
};
use serde_json::Value;

use crate::items::{Message, ToolCall};

/// Prefix carried by error-flagged tool results on the wire.
pub const ERROR_PREFIX: &str = "Error: ";

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("invalid tool output without tool_call_id")]
    MissingToolCallId,
    #[error("failed to build request message: {0}")]
    Build(#[from] OpenAIError),
}

/// Build the request messages for one completion: system prompt first, then history.
pub fn request_messages(
    system_prompt: &str,
    history: &[Message],
) -> Result<Vec<ChatCompletionRequestMessage>, CodecError> {
    let mut out = Vec::with_capacity(history.len() + 1);
    if !system_prompt.is_empty() {
        out.push(system(system_prompt)?);
    }
    out.extend(messages_to_chat(history)?);
    Ok(out)
}

/// Convert session history to OpenAI request messages.
pub fn messages_to_chat(
    history: &[Message],
) -> Result<Vec<ChatCompletionRequestMessage>, CodecError> {
    let answered: HashSet<&str> = history
        .iter()
        .filter_map(|m| match m {
            Message::ToolResult { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
        .collect();

    let mut out: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(history.len());
    let mut requested: HashSet<&str> = HashSet::new();
    let mut i = 0;
    while i < history.len() {
        match &history[i] {
            Message::SystemPrompt { content } => out.push(system(content)?),
            Message::UserText { content, .. } => {
                let usr = ChatCompletionRequestUserMessageArgs::default()
                    .content(content.clone())
                    .build()?;
                out.push(usr.into());
            }
            Message::AssistantText { content, .. } => {
                let asst = ChatCompletionRequestAssistantMessageArgs::default()
                    .content(content.clone())
                    .build()?;
                out.push(asst.into());
            }
            Message::ToolCallRequest { source, .. } => {
                let mut tool_calls = Vec::new();
                let mut j = i;
                while let Some(Message::ToolCallRequest { source: s, call }) = history.get(j) {
                    if s != source {
                        break;
                    }
                    if answered.contains(call.id.as_str()) {
                        requested.insert(call.id.as_str());
                        tool_calls.push(to_wire_call(call));
                    }
                    j += 1;
                }
                if !tool_calls.is_empty() {
                    let asst = ChatCompletionRequestAssistantMessageArgs::default()
                        .tool_calls(tool_calls)
                        .build()?;
                    out.push(asst.into());
                }
                i = j;
                continue;
            }
            Message::ToolResult {
                call_id,
                is_error,
                content,
            } => {
                if requested.contains(call_id.as_str()) {
                    let content = if *is_error {
                        format!("{ERROR_PREFIX}{content}")
                    } else {
                        content.clone()
                    };
                    let tool = ChatCompletionRequestToolMessageArgs::default()
                        .content(content)
                        .tool_call_id(call_id.clone())
                        .build()?;
                    out.push(tool.into());
                }
            }
        }
        i += 1;
    }
    Ok(out)
}

/// Convert OpenAI request messages to session history attributed to `source`.
pub fn chat_to_messages(
    messages: &[ChatCompletionRequestMessage],
    source: &str,
) -> Result<Vec<Message>, CodecError> {
    let mut out = Vec::with_capacity(messages.len());
    for m in messages {
        match m {
            ChatCompletionRequestMessage::System(s) => {
                if let ChatCompletionRequestSystemMessageContent::Text(t) = &s.content {
                    out.push(Message::system(t.clone()));
                }
            }
            ChatCompletionRequestMessage::User(u) => {
                if let ChatCompletionRequestUserMessageContent::Text(t) = &u.content {
                    out.push(Message::user(t.clone()));
                }
            }
            ChatCompletionRequestMessage::Assistant(a) => {
                if let Some(ChatCompletionRequestAssistantMessageContent::Text(t)) = &a.content {
                    if !t.is_empty() {
                        out.push(Message::assistant(source, t.clone()));
                    }
                }
                for tc in a.tool_calls.iter().flatten() {
                    out.push(Message::tool_call(source, from_wire_call(tc)));
                }
            }
            ChatCompletionRequestMessage::Tool(t) => {
                if t.tool_call_id.is_empty() {
                    return Err(CodecError::MissingToolCallId);
                }
                let text = match &t.content {
                    ChatCompletionRequestToolMessageContent::Text(s) => s.clone(),
                    _ => String::new(),
                };
                out.push(match text.strip_prefix(ERROR_PREFIX) {
                    Some(rest) => Message::tool_error(t.tool_call_id.clone(), rest),
                    None => Message::tool_result(t.tool_call_id.clone(), text),
                });
            }
            ChatCompletionRequestMessage::Developer(_)
            | ChatCompletionRequestMessage::Function(_) => {}
        }
    }
    Ok(out)
}

/// Parse a model-issued tool call; arguments that are not JSON are kept as a string.
pub fn from_wire_call(tc: &ChatCompletionMessageToolCall) -> ToolCall {
    let arguments: Value = serde_json::from_str(&tc.function.arguments)
        .unwrap_or_else(|_| Value::String(tc.function.arguments.clone()));
    ToolCall::new(tc.id.clone(), tc.function.name.clone(), arguments)
}

fn to_wire_call(call: &ToolCall) -> ChatCompletionMessageToolCall {
    ChatCompletionMessageToolCall {
        id: call.id.clone(),
        r#type: ChatCompletionToolType::Function,
        function: FunctionCall {
            name: call.name.clone(),
            arguments: call.arguments.to_string(),
        },
    }
}

fn system(content: &str) -> Result<ChatCompletionRequestMessage, CodecError> {
    Ok(ChatCompletionRequestSystemMessageArgs::default()
        .content(content.to_string())
        .build()?
        .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn call(id: &str, name: &str) -> Message {
        Message::tool_call("InvoiceAgent", ToolCall::new(id, name, json!({"invoice_id": id})))
    }

    #[test]
    fn consecutive_requests_form_one_batch() {
        let history = vec![
            Message::user("check two invoices"),
            call("c1", "lookup_invoice"),
            call("c2", "lookup_invoice"),
            Message::tool_result("c1", "{}"),
            Message::tool_error("c2", "not found"),
        ];
        let wire = messages_to_chat(&history).unwrap();
        assert_eq!(wire.len(), 4);
        match &wire[1] {
            ChatCompletionRequestMessage::Assistant(a) => {
                let calls = a.tool_calls.as_ref().unwrap();
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].id, "c1");
                assert_eq!(calls[1].id, "c2");
            }
            other => panic!("expected assistant batch, got {other:?}"),
        }
        match &wire[3] {
            ChatCompletionRequestMessage::Tool(t) => {
                assert_eq!(t.tool_call_id, "c2");
                assert_eq!(
                    t.content,
                    ChatCompletionRequestToolMessageContent::Text("Error: not found".into())
                );
            }
            other => panic!("expected tool message, got {other:?}"),
        }
    }

    #[test]
    fn orphaned_results_are_dropped() {
        // The request for c0 was trimmed away.
        let history = vec![
            Message::tool_result("c0", "stale"),
            Message::user("hi"),
            call("c1", "lookup_invoice"),
        ];
        let wire = messages_to_chat(&history).unwrap();
        assert_eq!(wire.len(), 1);
        assert!(matches!(wire[0], ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn system_prompt_leads_the_request() {
        let wire = request_messages("You route requests.", &[Message::user("hi")]).unwrap();
        assert_eq!(wire.len(), 2);
        assert!(matches!(wire[0], ChatCompletionRequestMessage::System(_)));
    }

    #[test]
    fn history_survives_the_wire() {
        let history = vec![
            Message::user("where is INV-1001?"),
            call("c1", "lookup_invoice"),
            Message::tool_result("c1", r#"{"status":"paid"}"#),
            Message::tool_error("c2", "boom"),
            Message::assistant("InvoiceAgent", "It has been paid."),
        ];
        // The dangling error result above has no request and is dropped.
        let expected: Vec<Message> = history
            .iter()
            .filter(|m| !matches!(m, Message::ToolResult { call_id, .. } if call_id == "c2"))
            .cloned()
            .collect();
        let wire = messages_to_chat(&history).unwrap();
        let back = chat_to_messages(&wire, "InvoiceAgent").unwrap();
        assert_eq!(back, expected);
    }

    #[test]
    fn non_json_arguments_are_preserved() {
        let tc = ChatCompletionMessageToolCall {
            id: "c9".into(),
            r#type: ChatCompletionToolType::Function,
            function: FunctionCall {
                name: "lookup_invoice".into(),
                arguments: "not json".into(),
            },
        };
        let parsed = from_wire_call(&tc);
        assert_eq!(parsed.arguments, Value::String("not json".into()));
        let resent = to_wire_call(&parsed);
        assert_eq!(resent.function.arguments, r#""not json""#);
        assert_eq!(from_wire_call(&resent), parsed);
    }

    #[test]
    fn string_arguments_stay_strings() {
        for raw in ["123", "true", "{\"a\":1}", "plain"] {
            let history = vec![
                Message::tool_call(
                    "InvoiceAgent",
                    ToolCall::new("c1", "lookup_invoice", Value::String(raw.into())),
                ),
                Message::tool_result("c1", "ok"),
            ];
            let wire = messages_to_chat(&history).unwrap();
            let back = chat_to_messages(&wire, "InvoiceAgent").unwrap();
            assert_eq!(back, history, "{raw}");
        }
    }

    #[test]
    fn error_text_with_the_prefix_keeps_it() {
        let history = vec![
            call("c1", "lookup_invoice"),
            Message::tool_error("c1", "Error: not found"),
        ];
        let wire = messages_to_chat(&history).unwrap();
        let back = chat_to_messages(&wire, "InvoiceAgent").unwrap();
        assert_eq!(back, history);
    }

    #[test]
    fn success_text_that_looks_like_an_error_comes_back_flagged() {
        let history = vec![
            call("c1", "lookup_invoice"),
            Message::tool_result("c1", "Error: the vendor's own status text"),
        ];
        let wire = messages_to_chat(&history).unwrap();
        let back = chat_to_messages(&wire, "InvoiceAgent").unwrap();
        assert_eq!(back[1], Message::tool_error("c1", "the vendor's own status text"));
    }

    #[test]
    fn missing_tool_call_id_is_error() {
        let tool = ChatCompletionRequestToolMessageArgs::default()
            .content("{\"x\":1}")
            .tool_call_id("")
            .build()
            .unwrap()
            .into();
        let err = chat_to_messages(&[tool], "A").unwrap_err();
        assert!(matches!(err, CodecError::MissingToolCallId));
    }
}
