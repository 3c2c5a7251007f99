//! Orchestrator - drives one run through its state machine
//!
//! ROUTING → WORKER_RUNNING → ROUTING … → SYNTHESIZING → DONE
//!
//! plus the CANCELLED and FATAL_ERROR terminals. The Orchestrator is the
//! only writer of `OrchestrationState` and the only producer of events;
//! every run ends with exactly one terminal event.

use crate::audit::{AuditLog, RunRecord};
use crate::config::{OrchestrationPolicy, Settings};
use crate::events::{CancelSignal, EventEmitter, RunEvent};
use crate::execution::{WorkerLoop, WorkerOutcome};
use crate::llm::{OpenAiCompatibleClient, ReasoningClient};
use crate::models::{agent_outputs, AgentStep, RunOutcome, Task, TerminationReason};
use crate::report;
use crate::router::{RouteDecision, Router};
use crate::specialists::{default_roster, Aspect, Specialist};
use crate::state::OrchestrationState;
use crate::synthesis::Synthesizer;
use crate::tools::{create_default_registry, ToolRegistry};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Routing,
    WorkerRunning { specialist: String, focus: Vec<Aspect> },
    Synthesizing { budget_capped: bool },
    Done,
    Cancelled,
    FatalError(String),
}

/// Result of a run driven in synchronous mode.
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub outcome: RunOutcome,
    /// Events drained from the subscriber channel, terminal last.
    pub events: Vec<RunEvent>,
}

impl CompletedRun {
    pub fn terminal_event(&self) -> Option<&RunEvent> {
        self.events.iter().rev().find(|e| e.is_terminal())
    }
}

/// Main orchestrator that coordinates routing, workers and synthesis
pub struct Orchestrator {
    router: Router,
    worker: WorkerLoop,
    synthesizer: Synthesizer,
    audit_log: Arc<AuditLog>,
    policy: OrchestrationPolicy,
}

impl Orchestrator {
    pub fn new(
        roster: Vec<Specialist>,
        reasoner: Arc<dyn ReasoningClient>,
        tools: Arc<ToolRegistry>,
        audit_log: Arc<AuditLog>,
        policy: OrchestrationPolicy,
    ) -> Self {
        Self {
            router: Router::new(Arc::from(roster), &policy),
            worker: WorkerLoop::new(reasoner.clone(), tools, &policy),
            synthesizer: Synthesizer::new(reasoner, policy.llm_timeout),
            audit_log,
            policy,
        }
    }

    /// Default roster, configured provider client and default tool set.
    pub fn from_settings(settings: &Settings, audit_log: Arc<AuditLog>) -> crate::Result<Self> {
        let reasoner: Arc<dyn ReasoningClient> = Arc::new(OpenAiCompatibleClient::from_settings(settings)?);
        let tools = Arc::new(create_default_registry(
            settings.financial_api_base_url.as_deref(),
            settings.policy.tool_timeout,
        ));

        info!(
            provider = %settings.llm_provider,
            model = reasoner.model_name(),
            tools = tools.list().len(),
            "Orchestrator configured"
        );

        Ok(Self::new(
            default_roster(),
            reasoner,
            tools,
            audit_log,
            settings.policy.clone(),
        ))
    }

    pub fn roster(&self) -> &[Specialist] {
        self.router.roster()
    }

    pub fn policy(&self) -> &OrchestrationPolicy {
        &self.policy
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit_log
    }

    /// Drive one run to a terminal state, emitting its events.
    ///
    /// Never returns an error: fatal conditions end the run with an
    /// `error` event and `TerminationReason::FatalError`.
    pub async fn run(
        &self,
        task: Arc<Task>,
        owner_id: Option<Uuid>,
        emitter: &mut EventEmitter,
        cancel: &CancelSignal,
    ) -> RunOutcome {
        let start_time = Instant::now();
        let mut state = OrchestrationState::new(task.clone());
        let run_id = state.run_id();

        info!(
            run_id = %run_id,
            task_id = %task.task_id,
            max_iterations = task.config.max_iterations,
            roster = self.roster().len(),
            "Orchestrator: starting run"
        );

        let _timer = RunTimer::start(cancel.clone(), self.policy.run_timeout);

        emitter.emit(RunEvent::Start {
            run_id,
            task: task.text.clone(),
            max_iterations: task.config.max_iterations,
        });

        let mut report_html = None;
        let mut phase = Phase::Routing;

        loop {
            phase = match phase {
                Phase::Routing => self.route(&mut state, cancel),

                Phase::WorkerRunning { specialist: id, focus } => {
                    let Some(specialist) = self.router.specialist(&id) else {
                        return self
                            .finish_fatal(state, emitter, owner_id, start_time, format!("unknown specialist: {}", id))
                            .await;
                    };

                    let iteration = state.iteration();
                    match self.worker.run(specialist, &focus, &state, iteration, emitter, cancel).await {
                        WorkerOutcome::Finished(step) => {
                            info!(
                                run_id = %run_id,
                                iteration = step.iteration,
                                worker = %step.worker,
                                status = ?step.status,
                                tool_calls = step.tool_call_count,
                                "Step recorded"
                            );
                            emitter.emit(RunEvent::Step {
                                run_id,
                                iteration: step.iteration,
                                worker: step.worker.clone(),
                                summary: step.summary.clone(),
                                tool_calls: step.tool_call_count,
                                status: step.status,
                            });
                            state.push_step(step);
                            Phase::Routing
                        }
                        WorkerOutcome::Cancelled => Phase::Cancelled,
                    }
                }

                Phase::Synthesizing { budget_capped } => {
                    let output = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        output = self.synthesizer.synthesize(state.task(), state.steps()) => Some(output),
                    };

                    match output {
                        None => Phase::Cancelled,
                        Some(output) => {
                            if task.config.generate_report {
                                report_html = Some(report::render_html(&task, &output, state.steps()));
                            }
                            let reason = if budget_capped {
                                TerminationReason::IterationLimit
                            } else {
                                TerminationReason::Synthesized
                            };
                            match state.finish(reason, Some(output)) {
                                Ok(()) => Phase::Done,
                                Err(e) => Phase::FatalError(e.to_string()),
                            }
                        }
                    }
                }

                Phase::Done => break,
                Phase::Cancelled => {
                    return self.finish_cancelled(state, emitter, owner_id, start_time, cancel).await;
                }
                Phase::FatalError(message) => {
                    return self.finish_fatal(state, emitter, owner_id, start_time, message).await;
                }
            };
        }

        let termination_reason = state
            .termination_reason()
            .unwrap_or(TerminationReason::Synthesized);

        emitter.emit(RunEvent::Done {
            run_id,
            output: state.final_output().map(str::to_string),
            termination_reason,
            iterations: state.iteration(),
            agent_steps: agent_steps(&state),
            agent_outputs: agent_outputs(state.steps()),
            report_html: report_html.clone(),
        });

        info!(
            run_id = %run_id,
            termination_reason = %termination_reason,
            iterations = state.iteration(),
            steps = state.steps().len(),
            "Orchestrator: run complete"
        );

        self.conclude(state, report_html, None, emitter, owner_id, start_time).await
    }

    /// One ROUTING transition.
    fn route(&self, state: &mut OrchestrationState, cancel: &CancelSignal) -> Phase {
        if cancel.is_cancelled() {
            return Phase::Cancelled;
        }

        match self.router.decide(state) {
            RouteDecision::RunWorker { specialist, focus } => {
                if self.router.specialist(&specialist).is_none() {
                    return Phase::FatalError(format!(
                        "router contract violation: unknown specialist {}",
                        specialist
                    ));
                }
                match state.begin_iteration() {
                    Ok(iteration) => {
                        debug!(run_id = %state.run_id(), iteration, worker = %specialist, ?focus, "Dispatching worker");
                        Phase::WorkerRunning { specialist, focus }
                    }
                    Err(e) => Phase::FatalError(e.to_string()),
                }
            }
            RouteDecision::Synthesize { budget_capped } => Phase::Synthesizing { budget_capped },
            RouteDecision::Terminate {
                reason: TerminationReason::IterationLimit,
                ..
            } => match state.finish(TerminationReason::IterationLimit, None) {
                Ok(()) => Phase::Done,
                Err(e) => Phase::FatalError(e.to_string()),
            },
            RouteDecision::Terminate { reason, diagnostic } => {
                Phase::FatalError(diagnostic.unwrap_or_else(|| reason.to_string()))
            }
        }
    }

    async fn finish_cancelled(
        &self,
        mut state: OrchestrationState,
        emitter: &mut EventEmitter,
        owner_id: Option<Uuid>,
        start_time: Instant,
        cancel: &CancelSignal,
    ) -> RunOutcome {
        let reason = cancel.reason().unwrap_or_else(|| "cancelled".to_string());
        warn!(run_id = %state.run_id(), reason = %reason, steps = state.steps().len(), "Run cancelled");

        if let Err(e) = state.finish(TerminationReason::Cancelled, None) {
            warn!(run_id = %state.run_id(), error = %e, "Cancelled after termination");
        }

        emitter.emit(RunEvent::Cancelled {
            run_id: state.run_id(),
            reason: reason.clone(),
            termination_reason: TerminationReason::Cancelled,
            iterations: state.iteration(),
            agent_steps: agent_steps(&state),
        });

        self.conclude(state, None, Some(reason), emitter, owner_id, start_time).await
    }

    async fn finish_fatal(
        &self,
        mut state: OrchestrationState,
        emitter: &mut EventEmitter,
        owner_id: Option<Uuid>,
        start_time: Instant,
        message: String,
    ) -> RunOutcome {
        error!(run_id = %state.run_id(), message = %message, "Run failed");

        if !state.is_terminated() {
            if let Err(e) = state.finish(TerminationReason::FatalError, None) {
                warn!(run_id = %state.run_id(), error = %e, "Could not record fatal termination");
            }
        }

        emitter.emit(RunEvent::Error {
            run_id: state.run_id(),
            message: message.clone(),
            agent_steps: agent_steps(&state),
        });

        self.conclude(state, None, Some(message), emitter, owner_id, start_time).await
    }

    async fn conclude(
        &self,
        state: OrchestrationState,
        report_html: Option<String>,
        message: Option<String>,
        emitter: &EventEmitter,
        owner_id: Option<Uuid>,
        start_time: Instant,
    ) -> RunOutcome {
        let termination_reason = state
            .termination_reason()
            .unwrap_or(TerminationReason::FatalError);

        let outcome = RunOutcome {
            run_id: state.run_id(),
            termination_reason,
            final_output: state.final_output().map(str::to_string),
            report_html,
            iterations: state.iteration(),
            steps: state.steps().to_vec(),
            message,
            execution_time_ms: start_time.elapsed().as_millis() as u64,
        };

        let record = RunRecord::new(
            owner_id,
            state.task().clone(),
            outcome.clone(),
            emitter.events().to_vec(),
        );
        if let Err(e) = self.audit_log.record(record).await {
            warn!(run_id = %outcome.run_id, error = %e, "Failed to record run");
        }

        outcome
    }

    /// Synchronous mode: run with a subscriber channel and drain it
    /// server-side until the terminal event.
    pub async fn run_to_completion(
        &self,
        task: Arc<Task>,
        owner_id: Option<Uuid>,
        cancel: CancelSignal,
    ) -> CompletedRun {
        let (emitter, mut rx) = EventEmitter::channel(self.policy.event_buffer, cancel.clone());
        let mut emitter = emitter.with_tool_calls(self.policy.stream_tool_calls);

        let drive = async {
            let outcome = self.run(task, owner_id, &mut emitter, &cancel).await;
            drop(emitter);
            outcome
        };

        let drain = async {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    break;
                }
            }
            events
        };

        let (outcome, events) = tokio::join!(drive, drain);
        CompletedRun { outcome, events }
    }
}

fn agent_steps(state: &OrchestrationState) -> Vec<AgentStep> {
    state.steps().iter().map(AgentStep::from).collect()
}

/// Fires the cancel signal with "run timeout" unless dropped first.
struct RunTimer(tokio::task::JoinHandle<()>);

impl RunTimer {
    fn start(cancel: CancelSignal, timeout: std::time::Duration) -> Self {
        Self(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            cancel.cancel("run timeout");
        }))
    }
}

impl Drop for RunTimer {
    fn drop(&mut self) {
        self.0.abort();
    }
}
