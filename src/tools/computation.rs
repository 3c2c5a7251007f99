//! Deterministic computation tools
//!
//! Pure statistics over caller-supplied series. No network, no state.

use super::{Tool, ToolError};
use async_trait::async_trait;
use serde_json::{json, Value};

const TRADING_DAYS: f64 = 252.0;

fn number_series(arguments: &Value, field: &str) -> Result<Vec<f64>, ToolError> {
    numbers(arguments.get(field), field)
}

fn numbers(value: Option<&Value>, field: &str) -> Result<Vec<f64>, ToolError> {
    let values = value
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::invalid_arguments(format!("'{}' must be an array", field)))?;

    values
        .iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                ToolError::invalid_arguments(format!("'{}' must contain only numbers", field))
            })
        })
        .collect()
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample standard deviation (n - 1).
fn std_dev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    var.sqrt()
}

/// Overflowing inputs would otherwise serialize as `null`.
fn ensure_finite(xs: &[f64]) -> Result<(), ToolError> {
    if xs.iter().all(|x| x.is_finite()) {
        Ok(())
    } else {
        Err(ToolError::internal("computation produced a non-finite result"))
    }
}

fn round(x: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (x * factor).round() / factor
}

fn sharpe(returns: &[f64]) -> Value {
    let sd = std_dev(returns);
    if sd > 0.0 {
        json!(round(mean(returns) / sd * TRADING_DAYS.sqrt(), 4))
    } else {
        Value::Null
    }
}

pub struct ComputeReturnsTool;

#[async_trait]
impl Tool for ComputeReturnsTool {
    fn name(&self) -> &'static str {
        "compute_returns"
    }

    fn description(&self) -> &'static str {
        "Compute simple/log returns, cumulative return, volatility, approximate Sharpe and max drawdown from sequential close prices"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prices": { "type": "array", "description": "Sequential close prices" }
            },
            "required": ["prices"]
        })
    }

    async fn execute(&self, arguments: &Value) -> Result<Value, ToolError> {
        let prices = number_series(arguments, "prices")?;

        if prices.len() < 2 {
            return Err(ToolError::invalid_arguments("need at least 2 prices"));
        }
        if prices.iter().any(|p| *p <= 0.0) {
            return Err(ToolError::invalid_arguments("prices must be positive"));
        }

        let simple: Vec<f64> = prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect();
        let log: Vec<f64> = prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect();

        let mut peak = prices[0];
        let mut max_drawdown = 0.0_f64;
        for p in &prices {
            peak = peak.max(*p);
            max_drawdown = max_drawdown.min(p / peak - 1.0);
        }

        let first = prices[0];
        let last = prices[prices.len() - 1];

        Ok(json!({
            "simple_returns": simple.iter().map(|r| round(*r, 6)).collect::<Vec<_>>(),
            "log_returns": log.iter().map(|r| round(*r, 6)).collect::<Vec<_>>(),
            "cumulative_return_pct": round((last / first - 1.0) * 100.0, 4),
            "mean_return_pct": round(mean(&simple) * 100.0, 4),
            "std_dev_pct": round(std_dev(&simple) * 100.0, 4),
            "annualized_vol_pct": round(std_dev(&simple) * TRADING_DAYS.sqrt() * 100.0, 4),
            "sharpe_approx": sharpe(&simple),
            "max_drawdown_pct": round(max_drawdown * 100.0, 4),
            "n_periods": simple.len(),
        }))
    }
}

pub struct ComputeCorrelationTool;

#[async_trait]
impl Tool for ComputeCorrelationTool {
    fn name(&self) -> &'static str {
        "compute_correlation"
    }

    fn description(&self) -> &'static str {
        "Pearson correlation between two equal-length numeric series"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "series_a": { "type": "array" },
                "series_b": { "type": "array" }
            },
            "required": ["series_a", "series_b"]
        })
    }

    async fn execute(&self, arguments: &Value) -> Result<Value, ToolError> {
        let a = number_series(arguments, "series_a")?;
        let b = number_series(arguments, "series_b")?;

        if a.len() != b.len() {
            return Err(ToolError::invalid_arguments(format!(
                "series lengths differ ({} vs {})",
                a.len(),
                b.len()
            )));
        }
        if a.len() < 2 {
            return Err(ToolError::invalid_arguments("need at least 2 observations"));
        }

        let (ma, mb) = (mean(&a), mean(&b));
        let cov: f64 = a.iter().zip(&b).map(|(x, y)| (x - ma) * (y - mb)).sum();
        let var_a: f64 = a.iter().map(|x| (x - ma).powi(2)).sum();
        let var_b: f64 = b.iter().map(|y| (y - mb).powi(2)).sum();

        let correlation = if var_a > 0.0 && var_b > 0.0 {
            json!(round(cov / (var_a.sqrt() * var_b.sqrt()), 6))
        } else {
            Value::Null
        };

        Ok(json!({
            "correlation": correlation,
            "n_observations": a.len(),
        }))
    }
}

pub struct PortfolioRiskTool;

#[async_trait]
impl Tool for PortfolioRiskTool {
    fn name(&self) -> &'static str {
        "portfolio_risk"
    }

    fn description(&self) -> &'static str {
        "Portfolio return and volatility from asset weights and per-asset periodic return series"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "weights": { "type": "object", "description": "ticker -> weight" },
                "returns": { "type": "object", "description": "ticker -> periodic returns" }
            },
            "required": ["weights", "returns"]
        })
    }

    async fn execute(&self, arguments: &Value) -> Result<Value, ToolError> {
        let weights = arguments
            .get("weights")
            .and_then(Value::as_object)
            .ok_or_else(|| ToolError::invalid_arguments("'weights' must be an object"))?;
        let returns = arguments
            .get("returns")
            .and_then(Value::as_object)
            .ok_or_else(|| ToolError::invalid_arguments("'returns' must be an object"))?;

        if weights.is_empty() {
            return Err(ToolError::invalid_arguments("'weights' must not be empty"));
        }

        let mut series: Vec<(f64, Vec<f64>)> = Vec::with_capacity(weights.len());
        for (ticker, weight) in weights {
            let weight = weight.as_f64().ok_or_else(|| {
                ToolError::invalid_arguments(format!("weight for {} must be a number", ticker))
            })?;
            if !returns.contains_key(ticker) {
                return Err(ToolError::invalid_arguments(format!(
                    "no return series for {}",
                    ticker
                )));
            }
            let rets = numbers(returns.get(ticker), ticker)?;
            series.push((weight, rets));
        }

        let periods = series[0].1.len();
        if periods < 2 || series.iter().any(|(_, r)| r.len() != periods) {
            return Err(ToolError::invalid_arguments(
                "return series must share a length of at least 2",
            ));
        }

        let weight_sum: f64 = series.iter().map(|(w, _)| w).sum();
        let portfolio: Vec<f64> = (0..periods)
            .map(|t| series.iter().map(|(w, r)| w * r[t]).sum())
            .collect();
        ensure_finite(&portfolio)?;

        Ok(json!({
            "weight_sum": round(weight_sum, 6),
            "mean_return_pct": round(mean(&portfolio) * 100.0, 4),
            "volatility_pct": round(std_dev(&portfolio) * 100.0, 4),
            "annualized_vol_pct": round(std_dev(&portfolio) * TRADING_DAYS.sqrt() * 100.0, 4),
            "sharpe_approx": sharpe(&portfolio),
            "n_periods": periods,
        }))
    }
}
