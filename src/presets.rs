//! Preset research tasks shared by the CLI and the API

use serde::Serialize;

/// Characters of the task text shown as its description.
const DESCRIPTION_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresetTask {
    pub name: &'static str,
    pub task: &'static str,
}

/// Listing shape for `GET /api/examples`.
#[derive(Debug, Clone, Serialize)]
pub struct PresetSummary {
    pub name: &'static str,
    pub description: String,
    pub task: &'static str,
}

pub const PRESET_TASKS: &[PresetTask] = &[
    PresetTask {
        name: "market_analysis",
        task: "Perform a comprehensive analysis of the current technology sector. \
               Get the latest prices for AAPL, MSFT, GOOGL, NVDA and META. \
               Compute their recent returns and volatility. \
               Fetch recent market news about these companies. \
               Provide a summary of which stocks look strongest and any risks.",
    },
    PresetTask {
        name: "portfolio_review",
        task: "I have a portfolio with the following allocation: \
               40% AAPL, 25% MSFT, 20% GOOGL, 15% AMZN. \
               Analyse the portfolio's recent performance, compute risk metrics \
               (volatility, Sharpe ratio, max drawdown), assess diversification \
               and suggest any rebalancing changes.",
    },
    PresetTask {
        name: "macro_research",
        task: "Research the current macroeconomic environment. \
               What are the latest trends in interest rates, inflation and employment? \
               Fetch recent financial news about Federal Reserve policy. \
               How might the macro environment affect equity markets in the near term? \
               Provide specific data points and a structured analysis.",
    },
    PresetTask {
        name: "quant_screen",
        task: "Run a quantitative comparison of AAPL vs MSFT. \
               Get 3 months of historical prices for both stocks. \
               Compute returns, volatility, Sharpe ratio, correlation between the two \
               and moving averages. Present the results in a structured format.",
    },
];

pub fn find(name: &str) -> Option<&'static PresetTask> {
    let name = name.trim();
    PRESET_TASKS.iter().find(|p| p.name == name)
}

/// Preset text for a known name, otherwise the input unchanged.
pub fn resolve(input: &str) -> String {
    find(input)
        .map(|p| p.task.to_string())
        .unwrap_or_else(|| input.to_string())
}

impl PresetTask {
    pub fn summary(&self) -> PresetSummary {
        let description: String = self.task.chars().take(DESCRIPTION_CHARS).collect();
        PresetSummary {
            name: self.name,
            description: format!("{}...", description),
            task: self.task,
        }
    }
}

pub fn summaries() -> Vec<PresetSummary> {
    PRESET_TASKS.iter().map(PresetTask::summary).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_name_and_passthrough() {
        assert!(resolve(" quant_screen ").starts_with("Run a quantitative comparison"));
        assert_eq!(resolve("Analyse NVDA"), "Analyse NVDA");
    }

    #[test]
    fn test_summary_description_is_capped() {
        let summary = PRESET_TASKS[0].summary();
        assert_eq!(summary.description.chars().count(), DESCRIPTION_CHARS + 3);
        assert!(summary.description.ends_with("..."));
        assert_eq!(summary.task, PRESET_TASKS[0].task);
    }
}
