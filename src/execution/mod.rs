//! Worker Loop
//!
//! Runs one specialist against the current state and produces exactly one
//! `StepResult` (or nothing, when the run is cancelled mid-step). The loop
//! alternates reasoning calls and tool invocations under an inner bound
//! that is separate from the orchestration iteration bound.

use crate::config::OrchestrationPolicy;
use crate::error::OrchestrationError;
use crate::events::{CancelSignal, EventEmitter, RunEvent};
use crate::llm::{parse_text_tool_calls, ChatMessage, Completion, ReasoningClient, ToolCallRequest};
use crate::models::{Role, StepResult, StepStatus};
use crate::specialists::{Aspect, Specialist};
use crate::state::OrchestrationState;
use crate::tools::{ToolError, ToolRegistry};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest summary kept for a step.
pub const MAX_SUMMARY_CHARS: usize = 3000;
/// Longest tool payload fed back into a worker's context.
pub const MAX_TOOL_RESULT_CHARS: usize = 2000;
/// Longest prior conversation turn included in a prompt.
pub const MAX_HISTORY_TURN_CHARS: usize = 500;

/// What one worker invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    Finished(StepResult),
    /// Cancel observed between cycles; nothing is recorded.
    Cancelled,
}

pub struct WorkerLoop {
    reasoner: Arc<dyn ReasoningClient>,
    tools: Arc<ToolRegistry>,
    max_tool_rounds: u32,
    max_empty_retries: u32,
    summary_window: usize,
    llm_timeout: Duration,
}

/// Mutable bookkeeping for one invocation.
struct Scratch {
    messages: Vec<ChatMessage>,
    tool_call_count: u32,
    tool_failures: Vec<String>,
    last_text: String,
}

impl WorkerLoop {
    pub fn new(
        reasoner: Arc<dyn ReasoningClient>,
        tools: Arc<ToolRegistry>,
        policy: &OrchestrationPolicy,
    ) -> Self {
        Self {
            reasoner,
            tools,
            max_tool_rounds: policy.max_tool_rounds.max(1),
            max_empty_retries: policy.max_empty_retries,
            summary_window: policy.summary_window,
            llm_timeout: policy.llm_timeout,
        }
    }

    pub async fn run(
        &self,
        specialist: &Specialist,
        focus: &[Aspect],
        state: &OrchestrationState,
        iteration: u32,
        emitter: &mut EventEmitter,
        cancel: &CancelSignal,
    ) -> WorkerOutcome {
        let run_id = state.run_id();
        let tool_names = specialist.tool_names();
        let tool_specs = self.tools.specs(&tool_names);

        let mut scratch = Scratch {
            messages: vec![
                ChatMessage::system(specialist.system_prompt.clone()),
                ChatMessage::user(self.task_prompt(specialist, focus, state)),
            ],
            tool_call_count: 0,
            tool_failures: Vec::new(),
            last_text: String::new(),
        };

        let finish = |status: StepStatus, summary: String, tool_call_count: u32| {
            WorkerOutcome::Finished(StepResult {
                worker: specialist.id.clone(),
                summary: truncate_chars(&summary, MAX_SUMMARY_CHARS),
                tool_call_count,
                status,
                iteration,
                timestamp: Utc::now(),
            })
        };

        let mut empty_retries = 0;
        let mut answered = false;

        for round in 0..self.max_tool_rounds {
            if cancel.is_cancelled() {
                info!(run_id = %run_id, worker = %specialist.id, round, "Worker cancelled between cycles");
                return WorkerOutcome::Cancelled;
            }

            debug!(
                run_id = %run_id,
                worker = %specialist.id,
                round,
                messages = scratch.messages.len(),
                "Reasoning call"
            );

            let completion = tokio::select! {
                biased;
                _ = cancel.cancelled() => return WorkerOutcome::Cancelled,
                result = self.reason(&scratch.messages, &tool_specs) => result,
            };

            let completion = match completion {
                Ok(c) => c,
                Err(e) if scratch.last_text.trim().is_empty() => {
                    warn!(run_id = %run_id, worker = %specialist.id, error = %e, "Reasoning failed before any output");
                    return finish(
                        StepStatus::Failed,
                        format!("Reasoning call failed: {}", e),
                        scratch.tool_call_count,
                    );
                }
                Err(e) => {
                    warn!(run_id = %run_id, worker = %specialist.id, error = %e, "Reasoning failed after partial output");
                    let summary = format!(
                        "{}\n\n[partial completion: reasoning unavailable after partial progress ({})]",
                        scratch.last_text.trim(),
                        e
                    );
                    return finish(
                        StepStatus::Completed,
                        with_failures(summary, &scratch.tool_failures),
                        scratch.tool_call_count,
                    );
                }
            };

            if completion.is_empty() {
                empty_retries += 1;
                warn!(run_id = %run_id, worker = %specialist.id, round, empty_retries, "Empty response");
                if empty_retries > self.max_empty_retries {
                    break;
                }
                scratch.messages.push(ChatMessage::user(format!(
                    "Your response was empty. Call one of your tools ({}) to gather data, then give your analysis.",
                    tool_names.join(", ")
                )));
                continue;
            }

            let Completion { text, mut tool_calls } = completion;
            let mut recovered = false;
            if tool_calls.is_empty() {
                tool_calls = parse_text_tool_calls(&text);
                recovered = !tool_calls.is_empty();
                if recovered {
                    info!(worker = %specialist.id, count = tool_calls.len(), "Recovered text tool calls");
                }
            }
            // Text that only carried recovered calls is not analysis.
            if !recovered && !text.trim().is_empty() {
                scratch.last_text = text.clone();
            }

            if tool_calls.is_empty() {
                answered = true;
                break;
            }

            scratch
                .messages
                .push(ChatMessage::assistant(text, tool_calls.clone()));

            let failed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return WorkerOutcome::Cancelled,
                failed = self.execute_calls(specialist, run_id, &tool_calls, &mut scratch, emitter) => failed,
            };

            if failed == tool_calls.len() {
                warn!(run_id = %run_id, worker = %specialist.id, round, "Every tool call in cycle failed");
                let reason = scratch
                    .tool_failures
                    .iter()
                    .rev()
                    .take(failed)
                    .rev()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("; ");
                return finish(
                    StepStatus::Failed,
                    format!("All tool calls failed: {}", reason),
                    scratch.tool_call_count,
                );
            }
        }

        if scratch.last_text.trim().is_empty() && scratch.tool_call_count == 0 {
            return finish(
                StepStatus::Failed,
                "No usable response from the reasoning capability".to_string(),
                0,
            );
        }

        let summary = if answered {
            scratch.last_text.trim().to_string()
        } else if scratch.last_text.trim().is_empty() {
            format!(
                "Partial completion: reached the limit of {} reasoning/tool rounds after {} tool call(s).",
                self.max_tool_rounds, scratch.tool_call_count
            )
        } else {
            format!(
                "{}\n\n[partial completion: reached the limit of {} reasoning/tool rounds]",
                scratch.last_text.trim(),
                self.max_tool_rounds
            )
        };

        info!(
            run_id = %run_id,
            worker = %specialist.id,
            tool_calls = scratch.tool_call_count,
            answered,
            "Worker finished"
        );

        finish(
            StepStatus::Completed,
            with_failures(summary, &scratch.tool_failures),
            scratch.tool_call_count,
        )
    }

    async fn reason(
        &self,
        messages: &[ChatMessage],
        tool_specs: &[crate::tools::ToolSpec],
    ) -> crate::Result<Completion> {
        match tokio::time::timeout(self.llm_timeout, self.reasoner.complete(messages, tool_specs)).await {
            Ok(result) => result,
            Err(_) => Err(OrchestrationError::LlmTimeout(self.llm_timeout.as_secs())),
        }
    }

    /// Execute one cycle of tool calls. Returns how many failed.
    async fn execute_calls(
        &self,
        specialist: &Specialist,
        run_id: uuid::Uuid,
        calls: &[ToolCallRequest],
        scratch: &mut Scratch,
        emitter: &mut EventEmitter,
    ) -> usize {
        let mut failed = 0;

        for call in calls {
            scratch.tool_call_count += 1;

            let result = if specialist.may_use(&call.name) {
                self.tools.invoke(&call.name, &call.arguments).await
            } else {
                Err(ToolError::invalid_arguments(format!(
                    "tool '{}' is not available to {}",
                    call.name, specialist.id
                )))
            };

            emitter.emit(RunEvent::ToolCall {
                run_id,
                worker: specialist.id.clone(),
                tool: call.name.clone(),
                ok: result.is_ok(),
                error: result.as_ref().err().map(ToString::to_string),
            });

            let content = match result {
                Ok(output) => truncate_chars(&output.payload.to_string(), MAX_TOOL_RESULT_CHARS),
                Err(e) => {
                    failed += 1;
                    scratch.tool_failures.push(format!("{} ({})", call.name, e));
                    json!({ "error": e.to_string() }).to_string()
                }
            };

            scratch.messages.push(ChatMessage::tool(call.id.clone(), content));
        }

        failed
    }

    fn task_prompt(&self, specialist: &Specialist, focus: &[Aspect], state: &OrchestrationState) -> String {
        let task = state.task();
        let mut prompt = String::new();

        let history: Vec<String> = state
            .history()
            .iter()
            .filter(|turn| !turn.content.trim().is_empty())
            .map(|turn| {
                let speaker = match turn.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                    Role::System => "System",
                };
                format!(
                    "{}: {}",
                    speaker,
                    truncate_chars(&turn.content, MAX_HISTORY_TURN_CHARS)
                )
            })
            .collect();

        if !history.is_empty() {
            prompt.push_str("--- CONVERSATION HISTORY ---\n");
            prompt.push_str(&history.join("\n\n"));
            prompt.push_str("\n--- END CONVERSATION HISTORY ---\n\n");
        }

        prompt.push_str(&format!("Task: {}\n\n", task.text));

        if !focus.is_empty() {
            let aspects: Vec<String> = focus.iter().map(|a| a.to_string().replace('_', " ")).collect();
            prompt.push_str(&format!(
                "Focus: you were chosen to cover {}. Concentrate your analysis there.\n\n",
                aspects.join(", ")
            ));
        }

        if !specialist.tools.is_empty() {
            prompt.push_str(&format!(
                "Available tools: {}\n\n",
                specialist.tools.join(", ")
            ));
        }

        let files = task.file_context();
        if !files.is_empty() {
            prompt.push_str(&files);
            prompt.push_str("\n\n");
        }

        let steps = state.steps();
        let window = &steps[steps.len().saturating_sub(self.summary_window)..];
        if !window.is_empty() {
            prompt.push_str("--- PRIOR FINDINGS ---\n");
            for step in window {
                prompt.push_str(&format!(
                    "[{} | {:?}] {}\n\n",
                    step.worker, step.status, step.summary
                ));
            }
            prompt.push_str("--- END PRIOR FINDINGS ---\n\n");
        }

        prompt.push_str(
            "Gather real data with your tools before analysing, build on the prior findings \
             instead of repeating them, and finish with a decisive, data-backed summary.",
        );
        prompt
    }
}

fn with_failures(summary: String, failures: &[String]) -> String {
    if failures.is_empty() {
        summary
    } else {
        format!("{}\n\nTool failures: {}", summary, failures.join("; "))
    }
}

/// Cut `text` to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...[truncated]", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConversationTurn;
    use crate::testing::{llm_error, state_with, stub_registry, stub_specialist, tool_call, ScriptedReasoner};
    use serde_json::json;

    fn worker(reasoner: Arc<ScriptedReasoner>) -> WorkerLoop {
        WorkerLoop::new(reasoner, stub_registry(), &OrchestrationPolicy::default())
    }

    async fn run_once(reasoner: Arc<ScriptedReasoner>) -> (WorkerOutcome, EventEmitter) {
        let state = state_with("Analyse AAPL", 5, &[]);
        let mut emitter = EventEmitter::detached(CancelSignal::new()).with_tool_calls(true);
        let outcome = worker(reasoner)
            .run(&stub_specialist("quant_researcher"), &[], &state, 1, &mut emitter, &CancelSignal::new())
            .await;
        (outcome, emitter)
    }

    fn finished(outcome: WorkerOutcome) -> StepResult {
        match outcome {
            WorkerOutcome::Finished(step) => step,
            WorkerOutcome::Cancelled => panic!("worker was cancelled"),
        }
    }

    #[tokio::test]
    async fn test_tool_then_answer() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            Ok(tool_call("echo", json!({ "x": 1 }))),
            Ok(Completion::text("Volatility is 22%.")),
        ]));
        let (outcome, emitter) = run_once(reasoner.clone()).await;
        let step = finished(outcome);

        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.summary, "Volatility is 22%.");
        assert_eq!(step.tool_call_count, 1);
        assert_eq!(step.worker, "quant_researcher");
        assert_eq!(emitter.events().len(), 1);

        let second_call = &reasoner.calls()[1];
        let tool_msg = second_call.last().unwrap();
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_echo"));
        assert!(tool_msg.content.contains("\"x\":1"));
    }

    #[tokio::test]
    async fn test_all_tool_calls_failing_fails_step() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![Ok(tool_call("broken", json!({})))]));
        let step = finished(run_once(reasoner).await.0);

        assert_eq!(step.status, StepStatus::Failed);
        assert!(step.summary.contains("All tool calls failed"));
        assert!(step.summary.contains("data feed offline"));
    }

    #[tokio::test]
    async fn test_partial_tool_failure_recorded_in_summary() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            Ok(Completion {
                text: String::new(),
                tool_calls: vec![
                    tool_call("echo", json!({})).tool_calls.remove(0),
                    tool_call("broken", json!({})).tool_calls.remove(0),
                ],
            }),
            Ok(Completion::text("Partial data only.")),
        ]));
        let step = finished(run_once(reasoner).await.0);

        assert_eq!(step.status, StepStatus::Completed);
        assert!(step.summary.starts_with("Partial data only."));
        assert!(step.summary.contains("Tool failures: broken"));
        assert_eq!(step.tool_call_count, 2);
    }

    #[tokio::test]
    async fn test_undeclared_tool_rejected() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![Ok(tool_call(
            "compute_returns",
            json!({ "prices": [1, 2] }),
        ))]));
        let step = finished(run_once(reasoner).await.0);
        assert_eq!(step.status, StepStatus::Failed);
        assert!(step.summary.contains("not available to quant_researcher"));
    }

    #[tokio::test]
    async fn test_inner_bound_reached_is_partial_completion() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            Ok(tool_call("echo", json!({ "n": 1 }))),
            Ok(tool_call("echo", json!({ "n": 2 }))),
            Ok(tool_call("echo", json!({ "n": 3 }))),
            Ok(Completion::text("never reached")),
        ]));
        let step = finished(run_once(reasoner.clone()).await.0);

        assert_eq!(step.status, StepStatus::Completed);
        assert!(step.summary.contains("Partial completion"));
        assert_eq!(step.tool_call_count, 3);
        assert_eq!(reasoner.call_count(), 3);
    }

    #[tokio::test]
    async fn test_reasoning_failure_before_output_fails_step() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![llm_error("503 upstream")]));
        let step = finished(run_once(reasoner).await.0);
        assert_eq!(step.status, StepStatus::Failed);
        assert!(step.summary.contains("503 upstream"));
    }

    #[tokio::test]
    async fn test_reasoning_failure_after_output_keeps_partial_text() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            Ok(Completion {
                text: "Price is 190.".to_string(),
                tool_calls: tool_call("echo", json!({})).tool_calls,
            }),
            llm_error("rate limited"),
        ]));
        let step = finished(run_once(reasoner).await.0);
        assert_eq!(step.status, StepStatus::Completed);
        assert!(step.summary.starts_with("Price is 190."));
        assert!(step.summary.contains("partial completion"));
    }

    #[tokio::test]
    async fn test_empty_responses_are_nudged_then_given_up() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            Ok(Completion::default()),
            Ok(Completion::default()),
            Ok(Completion::default()),
        ]));
        let step = finished(run_once(reasoner.clone()).await.0);
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(reasoner.call_count(), 3);
        assert!(reasoner.calls()[1].last().unwrap().content.contains("empty"));
    }

    #[tokio::test]
    async fn test_text_tool_calls_are_executed() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            Ok(Completion::text(r#"{"name": "echo", "parameters": {"q": "AAPL"}}"#)),
            Ok(Completion::text("AAPL looks fine.")),
        ]));
        let step = finished(run_once(reasoner).await.0);
        assert_eq!(step.tool_call_count, 1);
        assert_eq!(step.summary, "AAPL looks fine.");
    }

    #[tokio::test]
    async fn test_cancelled_before_first_cycle_records_nothing() {
        let state = state_with("Analyse AAPL", 5, &[]);
        let cancel = CancelSignal::new();
        cancel.cancel("user request");
        let mut emitter = EventEmitter::detached(cancel.clone());
        let reasoner = Arc::new(ScriptedReasoner::answering("unused"));

        let outcome = worker(reasoner.clone())
            .run(&stub_specialist("quant_researcher"), &[], &state, 1, &mut emitter, &cancel)
            .await;

        assert_eq!(outcome, WorkerOutcome::Cancelled);
        assert_eq!(reasoner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_reasoning_timeout_fails_step() {
        let state = state_with("Analyse AAPL", 5, &[]);
        let policy = OrchestrationPolicy {
            llm_timeout: Duration::from_millis(20),
            ..OrchestrationPolicy::default()
        };
        let reasoner = Arc::new(ScriptedReasoner::answering("late").with_delay(Duration::from_millis(200)));
        let worker = WorkerLoop::new(reasoner, stub_registry(), &policy);
        let mut emitter = EventEmitter::detached(CancelSignal::new());

        let step = finished(
            worker
                .run(&stub_specialist("quant_researcher"), &[], &state, 1, &mut emitter, &CancelSignal::new())
                .await,
        );
        assert_eq!(step.status, StepStatus::Failed);
        assert!(step.summary.contains("timed out"));
    }

    #[tokio::test]
    async fn test_prompt_includes_history_files_and_prior_window() {
        let mut state = state_with(
            "Analyse AAPL",
            10,
            &[("research_intelligence", StepStatus::Completed, "Sentiment is bullish")],
        );
        state.push_turn(ConversationTurn {
            role: Role::User,
            content: "x".repeat(800),
        });
        let reasoner = Arc::new(ScriptedReasoner::answering("ok"));
        let mut emitter = EventEmitter::detached(CancelSignal::new());

        worker(reasoner.clone())
            .run(&stub_specialist("quant_researcher"), &[], &state, 2, &mut emitter, &CancelSignal::new())
            .await;

        let prompt = &reasoner.calls()[0][1].content;
        assert!(prompt.contains("Task: Analyse AAPL"));
        assert!(!prompt.contains("Focus:"));
        assert!(prompt.contains("Sentiment is bullish"));
        assert!(prompt.contains("CONVERSATION HISTORY"));
        assert!(!prompt.contains(&"x".repeat(501)));
        assert!(prompt.contains("Available tools: echo, broken"));
    }

    #[tokio::test]
    async fn test_prompt_names_focus_aspects() {
        let state = state_with(
            "Analyse AAPL",
            10,
            &[("quant_researcher", StepStatus::Completed, "Returns computed, but no risk assessment yet.")],
        );
        let reasoner = Arc::new(ScriptedReasoner::answering("ok"));
        let mut emitter = EventEmitter::detached(CancelSignal::new());

        worker(reasoner.clone())
            .run(
                &stub_specialist("portfolio_analyst"),
                &[Aspect::Risk, Aspect::MarketContext],
                &state,
                2,
                &mut emitter,
                &CancelSignal::new(),
            )
            .await;

        let prompt = &reasoner.calls()[0][1].content;
        assert!(prompt.contains("Focus: you were chosen to cover risk, market context."));
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("héllo", 2), "hé...[truncated]");
    }
}
