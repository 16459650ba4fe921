//! Persistence contract: a narrow repository interface the Agent
//! writes through. Concrete schemas are an external concern; this
//! crate ships the trait plus an in-process implementation keyed by
//! `DashMap<Uuid, _>`: concurrency-safe state shared across runs without a
//! single global lock.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::{Candidate, OptionContract, Run};
use crate::error::AgentError;
use crate::provider::gateway::ToolLogEntry;

#[derive(Debug, Clone)]
pub struct RawOptionsSnapshot {
    pub symbol: String,
    pub asof: chrono::DateTime<chrono::Utc>,
    pub contract_count: usize,
}

#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn open_run(&self, run: &Run) -> Result<(), AgentError>;
    async fn persist_raw_options(&self, run_id: Uuid, snapshot: RawOptionsSnapshot) -> Result<(), AgentError>;
    async fn persist_contracts(&self, run_id: Uuid, symbol: &str, contracts: &[OptionContract]) -> Result<(), AgentError>;
    async fn persist_candidate(&self, run_id: Uuid, candidate: &Candidate) -> Result<(), AgentError>;
    async fn log_tool(&self, run_id: Uuid, entry: ToolLogEntry) -> Result<(), AgentError>;
    async fn close_run(&self, run: &Run) -> Result<(), AgentError>;
}

#[derive(Default)]
struct RunRecord {
    run: Option<Run>,
    raw_options: Vec<RawOptionsSnapshot>,
    contracts: Vec<(String, OptionContract)>,
    candidates: Vec<Candidate>,
    tool_log: Vec<ToolLogEntry>,
}

/// Process-wide, concurrency-safe in-memory store. This is the Agent's own
/// test/default implementation; a durable backend is an external concern —
/// the IPS-builder UI and its CRUD persistence live elsewhere, and schemas
/// are owned externally. Swapping in a real store means implementing
/// `RunRepository` against it, nothing in this crate
/// changes.
#[derive(Default)]
pub struct InMemoryRunRepository {
    runs: DashMap<Uuid, RunRecord>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_run(&self, run_id: Uuid) -> Option<Run> {
        self.runs.get(&run_id).and_then(|r| r.run.clone())
    }

    pub fn get_candidates(&self, run_id: Uuid) -> Vec<Candidate> {
        self.runs.get(&run_id).map(|r| r.candidates.clone()).unwrap_or_default()
    }

    pub fn get_tool_log(&self, run_id: Uuid) -> Vec<ToolLogEntry> {
        self.runs.get(&run_id).map(|r| r.tool_log.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn open_run(&self, run: &Run) -> Result<(), AgentError> {
        self.runs.insert(run.run_id, RunRecord { run: Some(run.clone()), ..Default::default() });
        Ok(())
    }

    async fn persist_raw_options(&self, run_id: Uuid, snapshot: RawOptionsSnapshot) -> Result<(), AgentError> {
        if let Some(mut record) = self.runs.get_mut(&run_id) {
            record.raw_options.push(snapshot);
        }
        Ok(())
    }

    async fn persist_contracts(&self, run_id: Uuid, symbol: &str, contracts: &[OptionContract]) -> Result<(), AgentError> {
        if let Some(mut record) = self.runs.get_mut(&run_id) {
            record.contracts.extend(contracts.iter().cloned().map(|c| (symbol.to_string(), c)));
        }
        Ok(())
    }

    async fn persist_candidate(&self, run_id: Uuid, candidate: &Candidate) -> Result<(), AgentError> {
        if let Some(mut record) = self.runs.get_mut(&run_id) {
            record.candidates.push(candidate.clone());
        }
        Ok(())
    }

    async fn log_tool(&self, run_id: Uuid, entry: ToolLogEntry) -> Result<(), AgentError> {
        if let Some(mut record) = self.runs.get_mut(&run_id) {
            record.tool_log.push(entry);
        }
        Ok(())
    }

    async fn close_run(&self, run: &Run) -> Result<(), AgentError> {
        if let Some(mut record) = self.runs.get_mut(&run.run_id) {
            record.run = Some(run.clone());
        }
        Ok(())
    }
}
