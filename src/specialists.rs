//! Specialist roster
//!
//! A specialist is a worker configuration: an id, the analytical aspects it
//! covers, the tools it may call and its system prompt. Roster order is the
//! Router's tie-break order.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Analytical perspective a task may need.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Aspect {
    MarketContext,
    Quantitative,
    Risk,
    Implementation,
}

impl Aspect {
    pub const ALL: [Aspect; 4] = [
        Aspect::MarketContext,
        Aspect::Quantitative,
        Aspect::Risk,
        Aspect::Implementation,
    ];

    /// Task keywords that indicate this aspect is relevant.
    fn keywords(self) -> &'static [&'static str] {
        match self {
            Aspect::MarketContext => &[
                "news", "market", "macro", "sentiment", "economy", "economic", "inflation",
                "interest rate", "fed", "sector", "outlook", "catalyst", "earnings",
            ],
            Aspect::Quantitative => &[
                "return", "volatility", "sharpe", "correlation", "statistic", "performance",
                "price", "drawdown", "factor", "valuation", "metric", "momentum",
            ],
            Aspect::Risk => &[
                "risk", "portfolio", "allocation", "allocate", "diversif", "hedge",
                "exposure", "rebalanc", "position siz", "weight",
            ],
            Aspect::Implementation => &[
                "code", "implement", "script", "python", "algorithm", "backtest",
                "automate", "program", "function",
            ],
        }
    }

    /// Phrases in a step summary saying this aspect is still uncovered.
    fn gap_phrases(self) -> &'static [&'static str] {
        match self {
            Aspect::MarketContext => &[
                "missing market context",
                "no market context",
                "needs market context",
                "lacks market context",
            ],
            Aspect::Quantitative => &[
                "needs quantitative analysis",
                "no quantitative analysis",
                "missing quantitative analysis",
                "requires quantitative analysis",
            ],
            Aspect::Risk => &[
                "no risk assessment",
                "missing risk assessment",
                "needs risk assessment",
                "requires risk assessment",
            ],
            Aspect::Implementation => &[
                "requires implementation",
                "needs implementation",
                "no implementation",
            ],
        }
    }
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Aspect::MarketContext => "market_context",
            Aspect::Quantitative => "quantitative",
            Aspect::Risk => "risk",
            Aspect::Implementation => "implementation",
        };
        write!(f, "{}", s)
    }
}

/// Aspects the task text asks for, in `Aspect::ALL` order.
pub fn detect_aspects(task_text: &str) -> Vec<Aspect> {
    let text = task_text.to_lowercase();
    Aspect::ALL
        .into_iter()
        .filter(|aspect| aspect.keywords().iter().any(|kw| text.contains(kw)))
        .collect()
}

/// Aspects a step summary explicitly flags as missing.
pub fn detect_gaps(summary: &str) -> Vec<Aspect> {
    let text = summary.to_lowercase();
    Aspect::ALL
        .into_iter()
        .filter(|aspect| aspect.gap_phrases().iter().any(|p| text.contains(p)))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Specialist {
    pub id: String,
    pub name: String,
    pub description: String,
    pub aspects: Vec<Aspect>,
    pub tools: Vec<String>,
    #[serde(skip)]
    pub system_prompt: String,
}

impl Specialist {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            aspects: Vec::new(),
            tools: Vec::new(),
            system_prompt: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_aspects(mut self, aspects: &[Aspect]) -> Self {
        self.aspects = aspects.to_vec();
        self
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn covers(&self, aspect: Aspect) -> bool {
        self.aspects.contains(&aspect)
    }

    pub fn may_use(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t == tool)
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(String::as_str).collect()
    }
}

const SHARED_RULES: &str = "\
Rules:
- Call your tools to gather data before you analyse. Never invent numbers.
- If a tool fails, say so and work with what you have.
- Finish with a concise, decision-ready summary of your findings.
- If an important perspective outside your remit is still uncovered, say so \
plainly (for example \"no risk assessment yet\" or \"needs quantitative analysis\").";

/// Built-in roster, in tie-break order.
pub fn default_roster() -> Vec<Specialist> {
    vec![
        Specialist::new("research_intelligence", "Research Intelligence")
            .with_description("News, sentiment and macroeconomic context")
            .with_aspects(&[Aspect::MarketContext])
            .with_tools(&["market_news", "macro_indicator", "market_quote"])
            .with_system_prompt(format!(
                "You are a research intelligence analyst covering financial markets and the macro economy.\n\
                 Gather recent news, sentiment and macro series relevant to the task, separate signal \
                 from noise and name the concrete catalysts with their likely price impact.\n\n{}",
                SHARED_RULES
            )),
        Specialist::new("quant_researcher", "Quantitative Researcher")
            .with_description("Returns, volatility, correlations and other statistics")
            .with_aspects(&[Aspect::Quantitative])
            .with_tools(&["market_quote", "compute_returns", "compute_correlation"])
            .with_system_prompt(format!(
                "You are a quantitative researcher.\n\
                 Pull the relevant price data and compute returns, volatility, risk-adjusted return, \
                 drawdowns and correlations. Cite exact values and state your methodology.\n\n{}",
                SHARED_RULES
            )),
        Specialist::new("portfolio_analyst", "Portfolio Analyst")
            .with_description("Portfolio construction, allocation and risk")
            .with_aspects(&[Aspect::Risk])
            .with_tools(&["portfolio_risk", "compute_correlation", "market_quote"])
            .with_system_prompt(format!(
                "You are a portfolio analyst focused on construction and risk management.\n\
                 Assess concentration, diversification and portfolio-level risk, then propose \
                 specific weights with the expected effect on return and volatility.\n\n{}",
                SHARED_RULES
            )),
        Specialist::new("software_developer", "Software Developer")
            .with_description("Turns analysis into working code and verifies calculations")
            .with_aspects(&[Aspect::Implementation])
            .with_tools(&["compute_returns", "compute_correlation"])
            .with_system_prompt(format!(
                "You are a software developer building financial analysis tooling.\n\
                 When the task needs code, write clean, modular, well-tested code and verify any \
                 numbers it relies on with your tools.\n\n{}",
                SHARED_RULES
            )),
    ]
}
