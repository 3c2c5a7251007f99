//! Test doubles shared by unit tests: scripted reasoning, stub tools and
//! state builders.

use crate::error::OrchestrationError;
use crate::llm::{ChatMessage, Completion, ReasoningClient, ToolCallRequest};
use crate::models::{StepResult, StepStatus, Task, TaskConfig};
use crate::specialists::{default_roster, Specialist};
use crate::state::OrchestrationState;
use crate::tools::{Tool, ToolError, ToolRegistry, ToolSpec};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn task(text: &str, max_iterations: u32) -> Arc<Task> {
    Arc::new(
        Task::new(
            text,
            TaskConfig {
                max_iterations,
                generate_report: false,
            },
        )
        .unwrap(),
    )
}

pub fn step(worker: &str, status: StepStatus, summary: &str, iteration: u32) -> StepResult {
    StepResult {
        worker: worker.to_string(),
        summary: summary.to_string(),
        tool_call_count: 0,
        status,
        iteration,
        timestamp: Utc::now(),
    }
}

/// State that has run one iteration per given step.
pub fn state_with(
    text: &str,
    max_iterations: u32,
    steps: &[(&str, StepStatus, &str)],
) -> OrchestrationState {
    let mut state = OrchestrationState::new(task(text, max_iterations));
    for (worker, status, summary) in steps {
        let iteration = state.begin_iteration().unwrap();
        state.push_step(step(worker, *status, summary, iteration));
    }
    state
}

/// Default-roster specialists with the given ids, in the given order.
pub fn roster(ids: &[&str]) -> Vec<Specialist> {
    let all = default_roster();
    ids.iter()
        .map(|id| all.iter().find(|s| s.id == *id).cloned().unwrap())
        .collect()
}

pub fn tool_call(name: &str, arguments: Value) -> Completion {
    Completion {
        text: String::new(),
        tool_calls: vec![ToolCallRequest {
            id: format!("call_{}", name),
            name: name.to_string(),
            arguments,
        }],
    }
}

/// Replays queued responses in order; once the script runs out every call
/// answers with `fallback`.
pub struct ScriptedReasoner {
    script: Mutex<VecDeque<Result<Completion>>>,
    fallback: Completion,
    delay: Duration,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedReasoner {
    pub fn new(script: Vec<Result<Completion>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Completion::text("Analysis complete."),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with the same text.
    pub fn answering(text: &str) -> Self {
        Self {
            fallback: Completion::text(text),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningClient for ScriptedReasoner {
    async fn complete(&self, messages: &[ChatMessage], _tools: &[ToolSpec]) -> Result<Completion> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => Ok(self.fallback.clone()),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

pub fn llm_error(message: &str) -> Result<Completion> {
    Err(OrchestrationError::LlmError(message.to_string()))
}

/// Returns its arguments as the payload.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn description(&self) -> &'static str {
        "Echo arguments"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, arguments: &Value) -> std::result::Result<Value, ToolError> {
        Ok(json!({ "echo": arguments }))
    }
}

/// Always reports its upstream as unavailable.
pub struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn description(&self) -> &'static str {
        "Always fails"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: &Value) -> std::result::Result<Value, ToolError> {
        Err(ToolError::upstream_unavailable("data feed offline"))
    }
}

pub fn stub_registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new(Duration::from_secs(1));
    registry.register(Arc::new(EchoTool));
    registry.register(Arc::new(BrokenTool));
    Arc::new(registry)
}

/// A specialist allowed to use the stub tools.
pub fn stub_specialist(id: &str) -> Specialist {
    let base = default_roster()
        .into_iter()
        .find(|s| s.id == id)
        .unwrap_or_else(|| Specialist::new(id, id));
    base.with_tools(&["echo", "broken"])
        .with_system_prompt(format!("You are {}.", id))
}

pub fn stub_roster(ids: &[&str]) -> Vec<Specialist> {
    ids.iter().map(|id| stub_specialist(id)).collect()
}
