//! Synthesizer
//!
//! A fixed-role worker with no tools whose input is the full step log.
//! When the reasoning capability is unavailable the answer degrades to a
//! deterministic, attributed digest of the specialist findings.

use crate::error::OrchestrationError;
use crate::execution::truncate_chars;
use crate::llm::{ChatMessage, ReasoningClient};
use crate::models::{StepResult, StepStatus, Task};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SYNTHESIS_PROMPT: &str = "\
You are the lead analyst. Several specialists have reported on the task below.
Write the final answer for the user:
- Quote specialist findings with attribution (\"According to quant_researcher: ...\").
- Use only numbers the specialists actually reported. Never estimate new ones.
- State plainly what data is missing or which steps failed.
- Be specific and actionable, and match what the user asked for.";

/// Input budget per step when feeding the synthesizer.
const MAX_STEP_CHARS: usize = 3000;

pub struct Synthesizer {
    reasoner: Arc<dyn ReasoningClient>,
    timeout: Duration,
}

impl Synthesizer {
    pub fn new(reasoner: Arc<dyn ReasoningClient>, timeout: Duration) -> Self {
        Self { reasoner, timeout }
    }

    /// Final answer for `task` from every recorded step. Never fails.
    pub async fn synthesize(&self, task: &Task, steps: &[StepResult]) -> String {
        let messages = vec![
            ChatMessage::system(SYNTHESIS_PROMPT),
            ChatMessage::user(synthesis_input(task, steps)),
        ];

        let result = match tokio::time::timeout(self.timeout, self.reasoner.complete(&messages, &[])).await {
            Ok(result) => result,
            Err(_) => Err(OrchestrationError::LlmTimeout(self.timeout.as_secs())),
        };

        match result {
            Ok(completion) if !completion.text.trim().is_empty() => {
                info!(steps = steps.len(), "Synthesis produced by reasoning capability");
                completion.text.trim().to_string()
            }
            Ok(_) => {
                warn!("Synthesis response was empty; using deterministic digest");
                fallback_synthesis(task, steps)
            }
            Err(e) => {
                warn!(error = %e, "Synthesis failed; using deterministic digest");
                fallback_synthesis(task, steps)
            }
        }
    }
}

fn synthesis_input(task: &Task, steps: &[StepResult]) -> String {
    let mut input = format!("Task: {}\n\nSpecialist reports:\n\n", task.text);
    for step in steps {
        let status = match step.status {
            StepStatus::Completed => "completed",
            StepStatus::Failed => "FAILED",
        };
        input.push_str(&format!(
            "### {} (iteration {}, {}, {} tool calls)\n{}\n\n",
            step.worker,
            step.iteration,
            status,
            step.tool_call_count,
            truncate_chars(&step.summary, MAX_STEP_CHARS)
        ));
    }
    input.push_str("Write the final synthesis now.");
    input
}

/// Attributed digest of completed findings, listing failed steps separately.
pub fn fallback_synthesis(task: &Task, steps: &[StepResult]) -> String {
    let mut out = format!("Summary of specialist findings for: {}\n", task.text);

    let completed: Vec<&StepResult> = steps
        .iter()
        .filter(|s| s.status == StepStatus::Completed)
        .collect();

    if completed.is_empty() {
        out.push_str("\nNo specialist completed its analysis.\n");
    }
    for step in &completed {
        out.push_str(&format!("\nAccording to {}:\n{}\n", step.worker, step.summary.trim()));
    }

    let failed: Vec<&str> = steps
        .iter()
        .filter(|s| s.status == StepStatus::Failed)
        .map(|s| s.worker.as_str())
        .collect();
    if !failed.is_empty() {
        out.push_str(&format!("\nIncomplete: {} did not finish.\n", failed.join(", ")));
    }

    out
}
