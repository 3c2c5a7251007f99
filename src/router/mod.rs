//! Router - pure routing policy
//!
//! `decide` reads an immutable state snapshot and returns the next action.
//! It never mutates state and never calls the reasoning capability, so the
//! same snapshot always yields the same decision.
//!
//! Policy, in priority order:
//! 1. iteration budget spent: synthesize what exists, or terminate with
//!    `iteration_limit` when nothing does
//! 2. fewer than `min_specialists` distinct specialists completed: run an
//!    unused specialist, preferring one that covers an unaddressed aspect,
//!    or fail with a routing deadlock when every unused one is exhausted
//! 3. latest step failed or flags a missing perspective: run the best
//!    specialist for the flagged aspects
//! 4. synthesize
//!
//! A `RunWorker` decision carries the aspects the worker was picked to
//! cover, so the worker prompt can name its focus.

use crate::config::OrchestrationPolicy;
use crate::error::OrchestrationError;
use crate::models::{StepStatus, TerminationReason};
use crate::specialists::{detect_aspects, detect_gaps, Aspect, Specialist};
use crate::state::OrchestrationState;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RouteDecision {
    RunWorker {
        specialist: String,
        focus: Vec<Aspect>,
    },
    Synthesize { budget_capped: bool },
    Terminate {
        reason: TerminationReason,
        diagnostic: Option<String>,
    },
}

impl RouteDecision {
    fn run(specialist: &Specialist, focus: Vec<Aspect>) -> Self {
        RouteDecision::RunWorker {
            specialist: specialist.id.clone(),
            focus,
        }
    }

    fn fatal(diagnostic: impl Into<String>) -> Self {
        RouteDecision::Terminate {
            reason: TerminationReason::FatalError,
            diagnostic: Some(diagnostic.into()),
        }
    }
}

pub struct Router {
    roster: Arc<[Specialist]>,
    min_specialists: usize,
    max_attempts_per_specialist: usize,
}

impl Router {
    pub fn new(roster: Arc<[Specialist]>, policy: &OrchestrationPolicy) -> Self {
        Self {
            roster,
            min_specialists: policy.min_specialists,
            max_attempts_per_specialist: policy.max_attempts_per_specialist,
        }
    }

    pub fn roster(&self) -> &[Specialist] {
        &self.roster
    }

    pub fn specialist(&self, id: &str) -> Option<&Specialist> {
        self.roster.iter().find(|s| s.id == id)
    }

    pub fn decide(&self, state: &OrchestrationState) -> RouteDecision {
        let decision = self.evaluate(state);
        debug!(
            run_id = %state.run_id(),
            iteration = state.iteration(),
            ?decision,
            "Routing decision"
        );
        decision
    }

    fn evaluate(&self, state: &OrchestrationState) -> RouteDecision {
        if state.iteration() >= state.max_iterations() {
            return if state.steps().is_empty() {
                RouteDecision::Terminate {
                    reason: TerminationReason::IterationLimit,
                    diagnostic: None,
                }
            } else {
                RouteDecision::Synthesize { budget_capped: true }
            };
        }

        if self.roster.is_empty() {
            return RouteDecision::fatal("no specialists configured");
        }

        let used = state.specialists_used();

        if used.len() < self.min_specialists {
            return match self.next_for_diversity(state, &used) {
                Some((specialist, focus)) => RouteDecision::run(specialist, focus),
                None => RouteDecision::fatal(
                    OrchestrationError::RoutingDeadlock(format!(
                        "{} of {} required specialists completed and no eligible specialist remains",
                        used.len(),
                        self.min_specialists
                    ))
                    .to_string(),
                ),
            };
        }

        if let Some((specialist, focus)) = self.next_for_gap(state, &used) {
            return RouteDecision::run(specialist, focus);
        }

        RouteDecision::Synthesize { budget_capped: false }
    }

    fn addressed_aspects(&self, used: &[&str]) -> Vec<Aspect> {
        self.roster
            .iter()
            .filter(|s| used.contains(&s.id.as_str()))
            .flat_map(|s| s.aspects.iter().copied())
            .collect()
    }

    fn is_exhausted(&self, state: &OrchestrationState, specialist: &Specialist) -> bool {
        state.failed_attempts(&specialist.id) >= self.max_attempts_per_specialist
    }

    /// Rule 2 candidate: any unused specialist that is not exhausted.
    /// Ranked never-attempted first, then covering an unaddressed aspect,
    /// then task relevance, then roster order.
    fn next_for_diversity(
        &self,
        state: &OrchestrationState,
        used: &[&str],
    ) -> Option<(&Specialist, Vec<Aspect>)> {
        let addressed = self.addressed_aspects(used);
        let task_aspects = detect_aspects(&state.task().text);

        let specialist = self
            .roster
            .iter()
            .enumerate()
            .filter(|(_, s)| !used.contains(&s.id.as_str()))
            .filter(|(_, s)| !self.is_exhausted(state, s))
            .min_by_key(|(index, s)| {
                let fresh = s.aspects.iter().any(|a| !addressed.contains(a));
                let relevant = s
                    .aspects
                    .iter()
                    .any(|a| !addressed.contains(a) && task_aspects.contains(a));
                (state.has_attempted(&s.id), !fresh, !relevant, *index)
            })
            .map(|(_, s)| s)?;

        let focus = specialist
            .aspects
            .iter()
            .copied()
            .filter(|a| !addressed.contains(a))
            .collect();
        Some((specialist, focus))
    }

    /// Rule 3 candidate for the aspects the latest step left open.
    fn next_for_gap(
        &self,
        state: &OrchestrationState,
        used: &[&str],
    ) -> Option<(&Specialist, Vec<Aspect>)> {
        let last = state.last_step()?;

        let mut flagged = detect_gaps(&last.summary);
        if last.status == StepStatus::Failed {
            if let Some(failed) = self.specialist(&last.worker) {
                flagged.extend(failed.aspects.iter().copied());
            }
        }
        if flagged.is_empty() {
            return None;
        }

        let specialist = self
            .roster
            .iter()
            .enumerate()
            .filter(|(_, s)| s.id != last.worker)
            .filter(|(_, s)| !self.is_exhausted(state, s))
            .filter(|(_, s)| flagged.iter().any(|a| s.covers(*a)))
            .min_by_key(|(index, s)| (used.contains(&s.id.as_str()), *index))
            .map(|(_, s)| s)?;

        let mut focus: Vec<Aspect> = flagged.into_iter().filter(|a| specialist.covers(*a)).collect();
        focus.sort();
        focus.dedup();
        Some((specialist, focus))
    }
}
