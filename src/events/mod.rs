//! Run events, the emitter that delivers them, and the cancel signal
//!
//! The Orchestrator is the only producer. Every event goes into a local
//! append-only log and, while a subscriber is attached, into one bounded
//! FIFO channel. A full or closed channel detaches the subscriber and fires
//! the run's cancel signal; delivery failure is never a processing error.

use crate::models::{AgentStep, StepStatus, TerminationReason};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Start {
        run_id: Uuid,
        task: String,
        max_iterations: u32,
    },
    Step {
        run_id: Uuid,
        iteration: u32,
        worker: String,
        summary: String,
        tool_calls: u32,
        status: StepStatus,
    },
    ToolCall {
        run_id: Uuid,
        worker: String,
        tool: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Done {
        run_id: Uuid,
        output: Option<String>,
        termination_reason: TerminationReason,
        iterations: u32,
        agent_steps: Vec<AgentStep>,
        agent_outputs: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        report_html: Option<String>,
    },
    Error {
        run_id: Uuid,
        message: String,
        agent_steps: Vec<AgentStep>,
    },
    Cancelled {
        run_id: Uuid,
        reason: String,
        termination_reason: TerminationReason,
        iterations: u32,
        agent_steps: Vec<AgentStep>,
    },
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunEvent::Done { .. } | RunEvent::Error { .. } | RunEvent::Cancelled { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RunEvent::Start { .. } => "start",
            RunEvent::Step { .. } => "step",
            RunEvent::ToolCall { .. } => "tool_call",
            RunEvent::Done { .. } => "done",
            RunEvent::Error { .. } => "error",
            RunEvent::Cancelled { .. } => "cancelled",
        }
    }
}

/// Cooperative cancellation shared by a run and whoever may stop it.
/// The first reason given wins.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.reason.lock() {
            if slot.is_none() {
                *slot = Some(reason.into());
            }
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().ok().and_then(|slot| slot.clone())
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

pub struct EventEmitter {
    subscriber: Option<mpsc::Sender<RunEvent>>,
    cancel: CancelSignal,
    log: Vec<RunEvent>,
    stream_tool_calls: bool,
}

impl EventEmitter {
    /// Emitter with one subscriber behind a queue of `capacity` events.
    pub fn channel(
        capacity: usize,
        cancel: CancelSignal,
    ) -> (Self, mpsc::Receiver<RunEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let emitter = Self {
            subscriber: Some(tx),
            cancel,
            log: Vec::new(),
            stream_tool_calls: false,
        };
        (emitter, rx)
    }

    /// Emitter that only records events locally.
    pub fn detached(cancel: CancelSignal) -> Self {
        Self {
            subscriber: None,
            cancel,
            log: Vec::new(),
            stream_tool_calls: false,
        }
    }

    pub fn with_tool_calls(mut self, enabled: bool) -> Self {
        self.stream_tool_calls = enabled;
        self
    }

    pub fn is_attached(&self) -> bool {
        self.subscriber.is_some()
    }

    /// Every event emitted so far, in order.
    pub fn events(&self) -> &[RunEvent] {
        &self.log
    }

    /// Record and deliver one event. `tool_call` events are dropped
    /// entirely, from the log as well, unless tool-call streaming is on.
    pub fn emit(&mut self, event: RunEvent) {
        if matches!(event, RunEvent::ToolCall { .. }) && !self.stream_tool_calls {
            return;
        }

        debug!(kind = event.kind(), "Emitting event");

        if let Some(tx) = &self.subscriber {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Event queue full; dropping subscriber");
                    self.subscriber = None;
                    self.cancel.cancel("subscriber overflow");
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("Subscriber disconnected");
                    self.subscriber = None;
                    self.cancel.cancel("subscriber disconnected");
                }
            }
        }

        self.log.push(event);
    }
}
