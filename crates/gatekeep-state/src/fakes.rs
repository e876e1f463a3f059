//! In-memory fakes for storage traits (testing only)
//!
//! `MemoryGateLedger` satisfies both `ValidationLedger` and `RevertLedger`
//! without any external dependencies.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug, Default)]
struct LedgerState {
    runs: Vec<ValidationRun>,
    run_ids: HashSet<String>,
    reverts: Vec<RevertRecord>,
    generations: HashMap<String, u64>,
}

/// In-memory ledger backed by append-only vectors.
#[derive(Debug, Default)]
pub struct MemoryGateLedger {
    state: Mutex<LedgerState>,
}

impl MemoryGateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of runs appended so far.
    pub fn run_count(&self) -> usize {
        self.lock().runs.len()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ValidationLedger for MemoryGateLedger {
    async fn begin_trigger(&self, source_ref: &str) -> StorageResult<u64> {
        let mut state = self.lock();
        let generation = state.generations.entry(source_ref.to_string()).or_insert(0);
        *generation += 1;
        Ok(*generation)
    }

    async fn current_generation(&self, source_ref: &str) -> StorageResult<Option<u64>> {
        Ok(self.lock().generations.get(source_ref).copied())
    }

    async fn append_run(&self, run: ValidationRun) -> StorageResult<()> {
        let mut state = self.lock();
        if !state.run_ids.insert(run.run_id.0.clone()) {
            return Err(StorageError::DuplicateRun {
                run_id: run.run_id.0.clone(),
            });
        }
        state.runs.push(run);
        Ok(())
    }

    async fn runs_for_source(&self, source_ref: &str) -> StorageResult<Vec<ValidationRun>> {
        let state = self.lock();
        let mut runs: Vec<ValidationRun> = state
            .runs
            .iter()
            .filter(|r| r.source_ref == source_ref)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.recorded_at);
        Ok(runs)
    }
}

#[async_trait]
impl RevertLedger for MemoryGateLedger {
    async fn record_revert(&self, record: RevertRecord) -> StorageResult<()> {
        let mut state = self.lock();
        if state
            .reverts
            .iter()
            .any(|r| r.revert_id == record.revert_id)
        {
            return Err(StorageError::DuplicateRevert {
                revert_id: record.revert_id,
            });
        }
        state.reverts.push(record);
        Ok(())
    }

    async fn list_reverts(&self) -> StorageResult<Vec<RevertRecord>> {
        Ok(self.lock().reverts.clone())
    }
}
