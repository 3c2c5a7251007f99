//! Orchestration state
//!
//! Owned by exactly one Orchestrator run. Every other component receives
//! `&OrchestrationState` and returns values; the step log and history are
//! append-only and no accessor hands out mutable access to them.

use crate::error::OrchestrationError;
use crate::models::{ConversationTurn, StepResult, StepStatus, Task, TerminationReason};
use crate::Result;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrchestrationState {
    run_id: Uuid,
    task: Arc<Task>,
    history: Vec<ConversationTurn>,
    step_results: Vec<StepResult>,
    iteration: u32,
    termination_reason: Option<TerminationReason>,
    final_output: Option<String>,
}

impl OrchestrationState {
    pub fn new(task: Arc<Task>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            history: task.history.clone(),
            task,
            step_results: Vec::new(),
            iteration: 0,
            termination_reason: None,
            final_output: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn max_iterations(&self) -> u32 {
        self.task.config.max_iterations
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn steps(&self) -> &[StepResult] {
        &self.step_results
    }

    pub fn last_step(&self) -> Option<&StepResult> {
        self.step_results.last()
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.termination_reason
    }

    pub fn final_output(&self) -> Option<&str> {
        self.final_output.as_deref()
    }

    pub fn is_terminated(&self) -> bool {
        self.termination_reason.is_some()
    }

    /// Specialists with at least one completed step, in order of first
    /// completion. Recomputed from the step log on every call.
    pub fn specialists_used(&self) -> Vec<&str> {
        let mut used: Vec<&str> = Vec::new();
        for step in self
            .step_results
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
        {
            if !used.contains(&step.worker.as_str()) {
                used.push(step.worker.as_str());
            }
        }
        used
    }

    pub fn has_attempted(&self, specialist_id: &str) -> bool {
        self.step_results.iter().any(|s| s.worker == specialist_id)
    }

    pub fn failed_attempts(&self, specialist_id: &str) -> usize {
        self.step_results
            .iter()
            .filter(|s| s.worker == specialist_id && s.status == StepStatus::Failed)
            .count()
    }

    /// Claim the next iteration. Refuses to exceed `max_iterations`.
    pub fn begin_iteration(&mut self) -> Result<u32> {
        if self.iteration >= self.max_iterations() {
            return Err(OrchestrationError::ContractViolation(format!(
                "iteration {} would exceed max_iterations {}",
                self.iteration + 1,
                self.max_iterations()
            )));
        }
        self.iteration += 1;
        Ok(self.iteration)
    }

    pub fn push_step(&mut self, step: StepResult) {
        self.step_results.push(step);
    }

    pub fn push_turn(&mut self, turn: ConversationTurn) {
        self.history.push(turn);
    }

    /// Record the terminal outcome. A run terminates exactly once.
    pub fn finish(
        &mut self,
        reason: TerminationReason,
        final_output: Option<String>,
    ) -> Result<()> {
        if let Some(existing) = self.termination_reason {
            return Err(OrchestrationError::StateError(format!(
                "run already terminated ({})",
                existing
            )));
        }
        self.termination_reason = Some(reason);
        self.final_output = final_output;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskConfig;
    use chrono::Utc;

    fn state(max_iterations: u32) -> OrchestrationState {
        let task = Task::new(
            "Assess AAPL",
            TaskConfig {
                max_iterations,
                generate_report: false,
            },
        )
        .unwrap();
        OrchestrationState::new(Arc::new(task))
    }

    fn step(worker: &str, status: StepStatus, iteration: u32) -> StepResult {
        StepResult {
            worker: worker.to_string(),
            summary: format!("{} summary", worker),
            tool_call_count: 0,
            status,
            iteration,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_begin_iteration_is_bounded() {
        let mut state = state(2);
        assert_eq!(state.begin_iteration().unwrap(), 1);
        assert_eq!(state.begin_iteration().unwrap(), 2);
        assert!(matches!(
            state.begin_iteration(),
            Err(OrchestrationError::ContractViolation(_))
        ));
        assert_eq!(state.iteration(), 2);
    }

    #[test]
    fn test_specialists_used_counts_completed_steps_once() {
        let mut state = state(5);
        state.push_step(step("quant_researcher", StepStatus::Completed, 1));
        state.push_step(step("portfolio_analyst", StepStatus::Failed, 2));
        state.push_step(step("quant_researcher", StepStatus::Completed, 3));

        assert_eq!(state.specialists_used(), vec!["quant_researcher"]);
        assert!(state.has_attempted("portfolio_analyst"));
        assert_eq!(state.failed_attempts("portfolio_analyst"), 1);
        assert_eq!(state.steps().len(), 3);
    }

    #[test]
    fn test_finish_only_once() {
        let mut state = state(1);
        state
            .finish(TerminationReason::Synthesized, Some("answer".to_string()))
            .unwrap();
        assert!(state.finish(TerminationReason::Cancelled, None).is_err());
        assert_eq!(state.final_output(), Some("answer"));
        assert_eq!(state.termination_reason(), Some(TerminationReason::Synthesized));
    }
}
