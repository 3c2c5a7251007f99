//! Run audit log
//!
//! Every finished run is recorded with its task, event log and outcome,
//! sealed by a SHA-256 hash so a stored record can be checked later.

use crate::events::RunEvent;
use crate::models::{RunOutcome, Task};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Records kept before the oldest are evicted.
const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub owner_id: Option<Uuid>,
    pub task: Task,
    pub outcome: RunOutcome,
    pub events: Vec<RunEvent>,
    pub integrity_hash: String,
    pub created_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(owner_id: Option<Uuid>, task: Task, outcome: RunOutcome, events: Vec<RunEvent>) -> Self {
        let integrity_hash = compute_run_hash(&task, &outcome);
        Self {
            run_id: outcome.run_id,
            owner_id,
            task,
            outcome,
            events,
            integrity_hash,
            created_at: Utc::now(),
        }
    }
}

/// Audit trail storage
pub struct AuditLog {
    records: Arc<RwLock<HashMap<Uuid, RunRecord>>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Store a run record, evicting the oldest when full
    pub async fn record(&self, record: RunRecord) -> Result<Uuid> {
        let run_id = record.run_id;
        let mut records = self.records.write().await;

        if records.len() >= self.capacity && !records.contains_key(&run_id) {
            let oldest = records
                .values()
                .min_by_key(|r| r.created_at)
                .map(|r| r.run_id);
            if let Some(oldest) = oldest {
                debug!(run_id = %oldest, "Evicting oldest run record");
                records.remove(&oldest);
            }
        }

        records.insert(run_id, record);
        Ok(run_id)
    }

    pub async fn get(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&run_id).cloned())
    }

    /// Run ids for an owner, oldest first
    pub async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<Uuid>> {
        let records = self.records.read().await;

        let mut items: Vec<_> = records
            .values()
            .filter(|record| record.owner_id == Some(owner_id))
            .map(|record| (record.run_id, record.created_at))
            .collect();

        items.sort_by_key(|(_, created_at)| *created_at);

        Ok(items.into_iter().map(|(id, _)| id).collect())
    }

    /// Recompute a record's hash and compare it with the sealed one
    pub async fn verify_integrity(&self, run_id: Uuid) -> Result<bool> {
        let records = self.records.read().await;

        Ok(records
            .get(&run_id)
            .map(|record| compute_run_hash(&record.task, &record.outcome) == record.integrity_hash)
            .unwrap_or(false))
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct Sealed<'a> {
    task: &'a Task,
    termination_reason: &'a crate::models::TerminationReason,
    final_output: &'a Option<String>,
    steps: &'a [crate::models::StepResult],
}

/// SHA-256 over the task and the parts of the outcome that matter.
/// JSON is streamed straight into the hasher.
pub fn compute_run_hash(task: &Task, outcome: &RunOutcome) -> String {
    let sealed = Sealed {
        task,
        termination_reason: &outcome.termination_reason,
        final_output: &outcome.final_output,
        steps: &outcome.steps,
    };

    let mut hasher = Sha256::new();
    if serde_json::to_writer(&mut HashWriter(&mut hasher), &sealed).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
