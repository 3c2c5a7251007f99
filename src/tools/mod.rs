//! Tool trait and registry
//!
//! Tools are looked up by name, validated against their declared input
//! schema and executed under a per-call timeout. A failed call is a
//! `ToolError` value that the calling worker reasons about; it never
//! aborts a run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub mod computation;
pub mod market;

pub use computation::{ComputeCorrelationTool, ComputeReturnsTool, PortfolioRiskTool};
pub use market::{FinancialApiClient, MacroIndicatorTool, MarketNewsTool, MarketQuoteTool};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    InvalidArguments,
    UpstreamUnavailable,
    Timeout,
    Internal,
}

/// Typed failure of a single tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidArguments, message)
    }

    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::UpstreamUnavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Internal, message)
    }
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolErrorKind::InvalidArguments => "invalid_arguments",
            ToolErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Successful tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool: String,
    pub payload: Value,
}

/// Tool description handed to the reasoning capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Trait for a single tool
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON-schema subset: `type: object`, `properties.*.type`, `required`.
    fn input_schema(&self) -> Value;
    async fn execute(&self, arguments: &Value) -> std::result::Result<Value, ToolError>;
}

/// Tool registry for looking up and invoking tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    call_timeout: Duration,
}

impl ToolRegistry {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            call_timeout,
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Specs for the named tools, skipping names that are not registered.
    pub fn specs(&self, names: &[&str]) -> Vec<ToolSpec> {
        names
            .iter()
            .filter_map(|name| self.tools.get(*name))
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.input_schema(),
            })
            .collect()
    }

    /// Validate and execute one tool call.
    pub async fn invoke(
        &self,
        tool_name: &str,
        arguments: &Value,
    ) -> std::result::Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(tool_name)
            .cloned()
            .ok_or_else(|| ToolError::invalid_arguments(format!("unknown tool: {}", tool_name)))?;

        validate_arguments(&tool.input_schema(), arguments)?;

        debug!(tool = tool_name, "Invoking tool");

        match tokio::time::timeout(self.call_timeout, tool.execute(arguments)).await {
            Ok(Ok(payload)) => Ok(ToolResult {
                tool: tool_name.to_string(),
                payload,
            }),
            Ok(Err(e)) => {
                warn!(tool = tool_name, error = %e, "Tool call failed");
                Err(e)
            }
            Err(_) => {
                warn!(tool = tool_name, timeout_secs = self.call_timeout.as_secs(), "Tool call timed out");
                Err(ToolError::new(
                    ToolErrorKind::Timeout,
                    format!("{} did not finish within {:?}", tool_name, self.call_timeout),
                ))
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// Check arguments against the declared schema subset.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> std::result::Result<(), ToolError> {
    let Some(args) = arguments.as_object() else {
        return Err(ToolError::invalid_arguments("arguments must be a JSON object"));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(field) {
                return Err(ToolError::invalid_arguments(format!(
                    "missing required argument '{}'",
                    field
                )));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (field, value) in args {
        let Some(expected) = properties
            .get(field)
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
        else {
            continue;
        };

        let matches = match expected {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };

        if !matches {
            return Err(ToolError::invalid_arguments(format!(
                "argument '{}' must be of type {}",
                field, expected
            )));
        }
    }

    Ok(())
}

/// Registry with every built-in tool.
pub fn create_default_registry(
    financial_api_base_url: Option<&str>,
    call_timeout: Duration,
) -> ToolRegistry {
    let api = financial_api_base_url.and_then(|url| FinancialApiClient::new(url, call_timeout));

    let mut registry = ToolRegistry::new(call_timeout);

    registry.register(Arc::new(ComputeReturnsTool));
    registry.register(Arc::new(ComputeCorrelationTool));
    registry.register(Arc::new(PortfolioRiskTool));
    registry.register(Arc::new(MarketQuoteTool::new(api.clone())));
    registry.register(Arc::new(MarketNewsTool::new(api.clone())));
    registry.register(Arc::new(MacroIndicatorTool::new(api)));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn description(&self) -> &'static str {
            "Never answers in time"
        }

        fn input_schema(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }

        async fn execute(&self, _arguments: &Value) -> std::result::Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({}))
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_invalid_arguments() {
        let registry = create_default_registry(None, Duration::from_secs(1));
        let err = registry.invoke("does_not_exist", &json!({})).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArguments);
    }

    #[tokio::test]
    async fn test_schema_validation_rejects_missing_argument() {
        let registry = create_default_registry(None, Duration::from_secs(1));
        let err = registry.invoke("compute_returns", &json!({})).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArguments);
        assert!(err.message.contains("prices"));
    }

    #[tokio::test]
    async fn test_schema_validation_rejects_wrong_type() {
        let registry = create_default_registry(None, Duration::from_secs(1));
        let err = registry
            .invoke("compute_returns", &json!({ "prices": "100,101" }))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArguments);
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let registry = create_default_registry(None, Duration::from_secs(1));
        let result = registry
            .invoke("compute_returns", &json!({ "prices": [100.0, 110.0, 99.0] }))
            .await
            .unwrap();
        assert_eq!(result.tool, "compute_returns");
        assert_eq!(result.payload["n_periods"], 2);
    }

    #[tokio::test]
    async fn test_timeout_is_reported_as_timeout_kind() {
        let mut registry = ToolRegistry::new(Duration::from_millis(20));
        registry.register(Arc::new(SlowTool));
        let err = registry.invoke("slow", &json!({})).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_market_tools_unavailable_without_api() {
        let registry = create_default_registry(None, Duration::from_secs(1));
        let err = registry
            .invoke("market_quote", &json!({ "ticker": "AAPL" }))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::UpstreamUnavailable);
    }

    #[test]
    fn test_specs_skip_unknown_names() {
        let registry = create_default_registry(None, Duration::from_secs(1));
        let specs = registry.specs(&["compute_returns", "nope"]);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "compute_returns");
    }
}
