//! HTTP-backed market data tools
//!
//! Thin adapters over a financial data service reachable at
//! `FINANCIAL_API_BASE_URL`. What the service returns is passed through as
//! the tool payload.

use super::{Tool, ToolError, ToolErrorKind};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Clone)]
pub struct FinancialApiClient {
    client: Client,
    base_url: String,
}

impl FinancialApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Option<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()
            .ok()?;

        Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ToolError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    ToolErrorKind::Timeout
                } else {
                    ToolErrorKind::UpstreamUnavailable
                };
                ToolError::new(kind, format!("request to {} failed: {}", path, e))
            })?;

        let status = response.status();
        let body = response.json::<Value>().await.map_err(|e| {
            ToolError::upstream_unavailable(format!("invalid JSON from {}: {}", path, e))
        })?;

        if status.is_success() {
            Ok(body)
        } else if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            Err(ToolError::invalid_arguments(format!(
                "{} rejected the request ({}): {}",
                path, status, body
            )))
        } else {
            Err(ToolError::upstream_unavailable(format!(
                "{} returned {}: {}",
                path, status, body
            )))
        }
    }
}

fn require_api(api: &Option<FinancialApiClient>) -> Result<&FinancialApiClient, ToolError> {
    api.as_ref().ok_or_else(|| {
        ToolError::upstream_unavailable("FINANCIAL_API_BASE_URL is not configured")
    })
}

fn require_str<'a>(arguments: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::invalid_arguments(format!("'{}' must be a non-empty string", field)))
}

pub struct MarketQuoteTool {
    api: Option<FinancialApiClient>,
}

impl MarketQuoteTool {
    pub fn new(api: Option<FinancialApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for MarketQuoteTool {
    fn name(&self) -> &'static str {
        "market_quote"
    }

    fn description(&self) -> &'static str {
        "Latest price, volume and basic company info for a ticker"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ticker": { "type": "string" },
                "history_days": { "type": "integer" }
            },
            "required": ["ticker"]
        })
    }

    async fn execute(&self, arguments: &Value) -> Result<Value, ToolError> {
        let api = require_api(&self.api)?;
        let ticker = require_str(arguments, "ticker")?.to_uppercase();
        let history_days = arguments
            .get("history_days")
            .and_then(Value::as_u64)
            .unwrap_or(5)
            .min(365);

        api.post_json(
            "/api/v1/market/quote",
            &json!({ "ticker": ticker, "history_days": history_days }),
        )
        .await
    }
}

pub struct MarketNewsTool {
    api: Option<FinancialApiClient>,
}

impl MarketNewsTool {
    pub fn new(api: Option<FinancialApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for MarketNewsTool {
    fn name(&self) -> &'static str {
        "market_news"
    }

    fn description(&self) -> &'static str {
        "Recent headlines and sentiment for a ticker or topic"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: &Value) -> Result<Value, ToolError> {
        let api = require_api(&self.api)?;
        let query = require_str(arguments, "query")?;
        let limit = arguments
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(10)
            .clamp(1, 50);

        api.post_json("/api/v1/news", &json!({ "query": query, "limit": limit }))
            .await
    }
}

pub struct MacroIndicatorTool {
    api: Option<FinancialApiClient>,
}

impl MacroIndicatorTool {
    pub fn new(api: Option<FinancialApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for MacroIndicatorTool {
    fn name(&self) -> &'static str {
        "macro_indicator"
    }

    fn description(&self) -> &'static str {
        "Recent observations of a macroeconomic series (e.g. CPIAUCSL, FEDFUNDS, UNRATE)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "series_id": { "type": "string" },
                "observations": { "type": "integer" }
            },
            "required": ["series_id"]
        })
    }

    async fn execute(&self, arguments: &Value) -> Result<Value, ToolError> {
        let api = require_api(&self.api)?;
        let series_id = require_str(arguments, "series_id")?.to_uppercase();
        let observations = arguments
            .get("observations")
            .and_then(Value::as_u64)
            .unwrap_or(12)
            .clamp(1, 120);

        api.post_json(
            "/api/v1/macro/series",
            &json!({ "series_id": series_id, "observations": observations }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blank_ticker_rejected_before_network() {
        let api = FinancialApiClient::new("http://127.0.0.1:9", Duration::from_millis(50));
        let tool = MarketQuoteTool::new(api);
        let err = tool.execute(&json!({ "ticker": "  " })).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArguments);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_upstream_failure() {
        let api = FinancialApiClient::new("http://127.0.0.1:9/", Duration::from_millis(200));
        let tool = MarketNewsTool::new(api);
        let err = tool.execute(&json!({ "query": "AAPL" })).await.unwrap_err();
        assert!(matches!(
            err.kind,
            ToolErrorKind::UpstreamUnavailable | ToolErrorKind::Timeout
        ));
    }
}
