//! Research Orchestrator
//!
//! Answers open-ended financial research tasks by routing them through a
//! roster of specialist workers and synthesizing their findings:
//! - A pure router picks the next specialist from the step log
//! - Each worker runs a bounded reason/act loop over its declared tools
//! - Tool failures are values, worker failures are recorded steps
//! - Every run emits an ordered event stream ending in one terminal event
//!
//! LOOP:
//! ROUTE → WORKER → ROUTE … → SYNTHESIZE → DONE

pub mod agent;
pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod files;
pub mod llm;
pub mod memory;
pub mod models;
pub mod presets;
pub mod report;
pub mod router;
pub mod specialists;
pub mod state;
pub mod synthesis;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use agent::{CompletedRun, Orchestrator};
pub use events::{CancelSignal, EventEmitter, RunEvent};
