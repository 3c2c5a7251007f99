//! Core data models for the research orchestrator

use crate::config::MAX_ITERATIONS_CEILING;
use crate::error::OrchestrationError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Longest task text accepted.
pub const MAX_TASK_CHARS: usize = 5000;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Synthesized,
    IterationLimit,
    Cancelled,
    FatalError,
}

//
// ================= Task =================
//

/// One prior exchange in the conversation the task belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// Already-extracted file content attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileContext {
    pub name: String,
    #[serde(default = "default_file_kind")]
    pub kind: String,
    pub content: String,
}

fn default_file_kind() -> String {
    "text/plain".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskConfig {
    pub max_iterations: u32,
    /// Render a long-form HTML report alongside the synthesis.
    #[serde(default)]
    pub generate_report: bool,
}

/// Immutable input of one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub text: String,
    pub files: Vec<FileContext>,
    pub history: Vec<ConversationTurn>,
    pub config: TaskConfig,
    pub submitted_at: DateTime<Utc>,
}

impl Task {
    pub fn new(text: impl Into<String>, config: TaskConfig) -> Result<Self> {
        let text = text.into();
        let trimmed_len = text.trim().chars().count();

        if trimmed_len == 0 {
            return Err(OrchestrationError::InvalidTask(
                "task text must not be empty".to_string(),
            ));
        }
        if trimmed_len > MAX_TASK_CHARS {
            return Err(OrchestrationError::InvalidTask(format!(
                "task text exceeds {} characters",
                MAX_TASK_CHARS
            )));
        }
        if config.max_iterations == 0 || config.max_iterations > MAX_ITERATIONS_CEILING {
            return Err(OrchestrationError::InvalidTask(format!(
                "max_iterations must be within 1..={}",
                MAX_ITERATIONS_CEILING
            )));
        }

        Ok(Self {
            task_id: Uuid::new_v4(),
            text,
            files: Vec::new(),
            history: Vec::new(),
            config,
            submitted_at: Utc::now(),
        })
    }

    pub fn with_files(mut self, files: Vec<FileContext>) -> Self {
        self.files = files;
        self
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }

    /// All file blocks framed for a prompt, or an empty string.
    pub fn file_context(&self) -> String {
        self.files
            .iter()
            .map(FileContext::render)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl FileContext {
    /// Frame the content so a worker can tell where the file begins and ends.
    pub fn render(&self) -> String {
        let rule = "=".repeat(80);
        format!(
            "{rule}\nFILE: {}\nTYPE: {}\n{rule}\n\n{}\n\n{rule}",
            self.name,
            self.kind,
            self.content,
            rule = rule
        )
    }
}

//
// ================= Steps =================
//

/// The recorded result of one Worker Loop invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub worker: String,
    pub summary: String,
    pub tool_call_count: u32,
    pub status: StepStatus,
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
}

/// Wire form of a step as it appears in `agent_steps`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentStep {
    pub agent: String,
    pub summary: String,
    pub tool_calls: u32,
    pub status: StepStatus,
}

impl From<&StepResult> for AgentStep {
    fn from(step: &StepResult) -> Self {
        Self {
            agent: step.worker.clone(),
            summary: step.summary.clone(),
            tool_calls: step.tool_call_count,
            status: step.status,
        }
    }
}

/// Latest completed output of every worker, merged in step order.
pub fn agent_outputs(steps: &[StepResult]) -> BTreeMap<String, String> {
    let mut outputs: BTreeMap<String, String> = BTreeMap::new();
    for step in steps.iter().filter(|s| s.status == StepStatus::Completed) {
        outputs
            .entry(step.worker.clone())
            .and_modify(|existing| {
                existing.push_str("\n\n");
                existing.push_str(&step.summary);
            })
            .or_insert_with(|| step.summary.clone());
    }
    outputs
}

//
// ================= Final Result =================
//

/// What a finished run hands back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub termination_reason: TerminationReason,
    pub final_output: Option<String>,
    pub report_html: Option<String>,
    pub iterations: u32,
    pub steps: Vec<StepResult>,
    /// Diagnostic for fatal or cancelled runs.
    pub message: Option<String>,
    pub execution_time_ms: u64,
}

impl RunOutcome {
    pub fn agent_steps(&self) -> Vec<AgentStep> {
        self.steps.iter().map(AgentStep::from).collect()
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationReason::Synthesized => "synthesized",
            TerminationReason::IterationLimit => "iteration_limit",
            TerminationReason::Cancelled => "cancelled",
            TerminationReason::FatalError => "fatal_error",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_iterations: u32) -> TaskConfig {
        TaskConfig {
            max_iterations,
            generate_report: false,
        }
    }

    #[test]
    fn test_task_rejects_empty_text() {
        assert!(matches!(
            Task::new("   ", config(5)),
            Err(OrchestrationError::InvalidTask(_))
        ));
    }

    #[test]
    fn test_task_rejects_out_of_range_iterations() {
        assert!(Task::new("Analyse AAPL", config(0)).is_err());
        assert!(Task::new("Analyse AAPL", config(MAX_ITERATIONS_CEILING + 1)).is_err());
        assert!(Task::new("Analyse AAPL", config(MAX_ITERATIONS_CEILING)).is_ok());
    }

    #[test]
    fn test_termination_reason_wire_names() {
        let json = serde_json::to_string(&TerminationReason::IterationLimit).unwrap();
        assert_eq!(json, "\"iteration_limit\"");
        assert_eq!(TerminationReason::FatalError.to_string(), "fatal_error");
    }

    #[test]
    fn test_agent_outputs_skip_failed_steps_and_merge_repeats() {
        let step = |worker: &str, summary: &str, status| StepResult {
            worker: worker.to_string(),
            summary: summary.to_string(),
            tool_call_count: 1,
            status,
            iteration: 1,
            timestamp: Utc::now(),
        };
        let steps = vec![
            step("quant_researcher", "first", StepStatus::Completed),
            step("portfolio_analyst", "boom", StepStatus::Failed),
            step("quant_researcher", "second", StepStatus::Completed),
        ];

        let outputs = agent_outputs(&steps);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["quant_researcher"], "first\n\nsecond");
    }

    #[test]
    fn test_file_context_render_frames_content() {
        let file = FileContext {
            name: "holdings.csv".to_string(),
            kind: "text/csv".to_string(),
            content: "ticker,weight\nAAPL,0.4".to_string(),
        };
        let rendered = file.render();
        assert!(rendered.contains("FILE: holdings.csv"));
        assert!(rendered.contains("AAPL,0.4"));
    }
}
