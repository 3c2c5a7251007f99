//! OpenAI-compatible chat-completions client
//!
//! Every supported provider speaks the same wire format, so switching
//! backends is a configuration change. Uses a long-lived reqwest::Client
//! for connection pooling.

use super::{ChatMessage, ChatRole, Completion, ReasoningClient, ToolCallRequest};
use crate::config::Settings;
use crate::error::OrchestrationError;
use crate::tools::ToolSpec;
use crate::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MAX_RETRIES: u32 = 2;
const BASE_BACKOFF_MS: u64 = 500;

/// Connection details for one provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub key: &'static str,
    pub name: &'static str,
    pub base_url: &'static str,
    pub api_key_env: &'static str,
    pub default_model: &'static str,
    pub extra_headers: &'static [(&'static str, &'static str)],
}

lazy_static! {
    static ref PROVIDERS: HashMap<&'static str, ProviderConfig> = {
        let mut m = HashMap::new();
        m.insert("groq", ProviderConfig {
            key: "groq",
            name: "Groq",
            base_url: "https://api.groq.com/openai/v1",
            api_key_env: "GROQ_API_KEY",
            default_model: "llama-3.3-70b-versatile",
            extra_headers: &[],
        });
        m.insert("together", ProviderConfig {
            key: "together",
            name: "Together AI",
            base_url: "https://api.together.xyz/v1",
            api_key_env: "TOGETHER_API_KEY",
            default_model: "meta-llama/Llama-3.3-70B-Instruct-Turbo",
            extra_headers: &[],
        });
        m.insert("fireworks", ProviderConfig {
            key: "fireworks",
            name: "Fireworks AI",
            base_url: "https://api.fireworks.ai/inference/v1",
            api_key_env: "FIREWORKS_API_KEY",
            default_model: "accounts/fireworks/models/deepseek-v3-0324",
            extra_headers: &[],
        });
        m.insert("openrouter", ProviderConfig {
            key: "openrouter",
            name: "OpenRouter",
            base_url: "https://openrouter.ai/api/v1",
            api_key_env: "OPENROUTER_API_KEY",
            default_model: "meta-llama/llama-3.3-70b-instruct",
            extra_headers: &[("HTTP-Referer", "https://research-orchestrator.local")],
        });
        m
    };
}

/// Look up a provider by its key (`groq`, `together`, `fireworks`, `openrouter`).
pub fn provider(key: &str) -> Option<&'static ProviderConfig> {
    PROVIDERS.get(key.trim().to_lowercase().as_str())
}

/// Reusable chat-completions client (connection-pooled)
pub struct OpenAiCompatibleClient {
    client: Client,
    provider: &'static ProviderConfig,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(provider_key: &str, api_key: impl Into<String>, model: Option<String>) -> Result<Self> {
        let provider = provider(provider_key).ok_or_else(|| {
            OrchestrationError::ConfigError(format!("unknown LLM provider: {}", provider_key))
        })?;

        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(OrchestrationError::ConfigError(format!(
                "{} not configured",
                provider.api_key_env
            )));
        }

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            provider,
            api_key,
            model: model.unwrap_or_else(|| provider.default_model.to_string()),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let key = settings.api_key_for(&settings.llm_provider).unwrap_or_default();
        Self::new(&settings.llm_provider, key, settings.llm_model.clone())
    }

    pub fn provider(&self) -> &'static ProviderConfig {
        self.provider
    }

    async fn send_once(&self, body: &Value) -> std::result::Result<Completion, Attempt> {
        let url = format!("{}/chat/completions", self.provider.base_url);

        let mut request = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body);
        for (name, value) in self.provider.extra_headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await.map_err(|e| {
            Attempt::Retryable(format!("{} request failed: {}", self.provider.name, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = format!("{} returned {}: {}", self.provider.name, status, error_text);
            return Err(if is_retryable(status) {
                Attempt::Retryable(message)
            } else {
                Attempt::Fatal(message)
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            Attempt::Fatal(format!("{} parse error: {}", self.provider.name, e))
        })?;

        parse_response(parsed).map_err(Attempt::Fatal)
    }
}

#[async_trait]
impl ReasoningClient for OpenAiCompatibleClient {
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<Completion> {
        let body = build_request_body(&self.model, messages, tools);
        let mut attempt = 0;

        loop {
            debug!(provider = self.provider.key, model = %self.model, attempt, "Calling chat completions");

            match self.send_once(&body).await {
                Ok(completion) => {
                    info!(
                        provider = self.provider.key,
                        tool_calls = completion.tool_calls.len(),
                        text_chars = completion.text.len(),
                        "Completion received"
                    );
                    return Ok(completion);
                }
                Err(Attempt::Retryable(message)) if attempt < MAX_RETRIES => {
                    let delay = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(provider = self.provider.key, attempt, ?delay, "Retrying after: {}", message);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(Attempt::Retryable(message)) | Err(Attempt::Fatal(message)) => {
                    error!(provider = self.provider.key, "LLM call failed: {}", message);
                    return Err(OrchestrationError::LlmError(message));
                }
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

enum Attempt {
    Retryable(String),
    Fatal(String),
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn build_request_body(model: &str, messages: &[ChatMessage], tools: &[ToolSpec]) -> Value {
    let messages: Vec<Value> = messages.iter().map(message_to_wire).collect();

    let mut body = json!({
        "model": model,
        "messages": messages,
        "temperature": 0.3,
        "max_tokens": 2048,
    });

    if !tools.is_empty() {
        body["tools"] = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tool_choice"] = json!("auto");
    }

    body
}

fn message_to_wire(msg: &ChatMessage) -> Value {
    match msg.role {
        ChatRole::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content,
        }),
        ChatRole::Assistant if !msg.tool_calls.is_empty() => json!({
            "role": "assistant",
            "content": msg.content,
            "tool_calls": msg.tool_calls.iter().map(|c| json!({
                "id": c.id,
                "type": "function",
                "function": { "name": c.name, "arguments": c.arguments.to_string() },
            })).collect::<Vec<_>>(),
        }),
        role => json!({ "role": role, "content": msg.content }),
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn parse_response(response: ChatResponse) -> std::result::Result<Completion, String> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| "response carried no choices".to_string())?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, call)| ToolCallRequest {
            id: if call.id.is_empty() {
                format!("call_{}", i)
            } else {
                call.id
            },
            // Unparseable arguments stay a string so schema validation rejects them.
            arguments: if call.function.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments))
            },
            name: call.function.name,
        })
        .collect();

    Ok(Completion {
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
    })
}
