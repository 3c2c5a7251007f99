//! Reasoning capability
//!
//! Workers talk to a language model only through `ReasoningClient`. The
//! shipped implementation is an OpenAI-compatible chat-completions client;
//! tests plug in scripted clients.

use crate::tools::ToolSpec;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod openai;

pub use openai::{provider, OpenAiCompatibleClient, ProviderConfig};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(ChatRole::Assistant, content)
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(ChatRole::Tool, content)
        }
    }
}

/// One model turn: free text, requested tool calls, or both.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.tool_calls.is_empty()
    }
}

/// Reasoning capability shared by every worker of every run.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// One completion. Retries and transport concerns belong to the
    /// implementation; the caller applies its own per-call timeout.
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<Completion>;

    fn model_name(&self) -> &str {
        "unknown"
    }
}

/// Recover function calls some models write into plain text instead of
/// the native tool-call channel.
///
/// Accepts `{"name": .., "parameters": {..}}`, `{"name": .., "arguments": {..}}`
/// and the `{"type": "function", "function": {..}}` envelope.
pub fn parse_text_tool_calls(text: &str) -> Vec<ToolCallRequest> {
    let mut calls = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find('{') {
        let start = cursor + offset;
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();

        match stream.next() {
            Some(Ok(value)) => {
                if let Some((name, arguments)) = as_function_call(&value) {
                    calls.push(ToolCallRequest {
                        id: format!("text_call_{}", calls.len()),
                        name,
                        arguments,
                    });
                    cursor = start + stream.byte_offset();
                    continue;
                }
                cursor = start + 1;
            }
            _ => cursor = start + 1,
        }
    }

    calls
}

fn as_function_call(value: &Value) -> Option<(String, Value)> {
    let object = value.as_object()?;

    if let Some(function) = object.get("function").filter(|f| f.is_object()) {
        return as_function_call(function);
    }

    let name = object.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }

    let arguments = object
        .get("parameters")
        .or_else(|| object.get("arguments"))?;

    let arguments = match arguments {
        Value::Object(_) => arguments.clone(),
        // Some models double-encode the arguments.
        Value::String(raw) => serde_json::from_str::<Value>(raw)
            .ok()
            .filter(Value::is_object)?,
        _ => return None,
    };

    Some((name.to_string(), arguments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_parameters_form() {
        let text = r#"I'll fetch it. {"name": "market_quote", "parameters": {"ticker": "NVDA"}} done"#;
        let calls = parse_text_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "market_quote");
        assert_eq!(calls[0].arguments, json!({ "ticker": "NVDA" }));
    }

    #[test]
    fn test_parse_multiple_and_function_envelope() {
        let text = r#"
            {"name": "compute_returns", "arguments": {"prices": [1, 2, 3]}}
            then {"type": "function", "function": {"name": "market_news", "arguments": "{\"query\": \"AAPL\"}"}}
        "#;
        let calls = parse_text_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "compute_returns");
        assert_eq!(calls[1].name, "market_news");
        assert_eq!(calls[1].arguments["query"], "AAPL");
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[test]
    fn test_plain_json_is_not_a_call() {
        let text = r#"Result: {"ticker": "AAPL", "price": 190.1} and {broken"#;
        assert!(parse_text_tool_calls(text).is_empty());
    }

    #[test]
    fn test_completion_emptiness() {
        assert!(Completion::text("  \n").is_empty());
        assert!(!Completion::text("analysis").is_empty());
    }

    #[test]
    fn test_tool_message_serialization() {
        let msg = ChatMessage::tool("call_1", "{}");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
        assert!(json.get("tool_calls").is_none());
    }
}
