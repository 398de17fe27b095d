//! Concurrency-safe store of job records.
//!
//! The registry is the only shared mutable state in the engine. Records live
//! behind a per-entry `RwLock` inside a sharded `DashMap`; callers only ever
//! receive clones, so a reader can never observe a half-applied update.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::cancellation::CancellationFlag;
use super::job::{JobId, JobKind, JobRecord, JobSpec, JobStatus};
use crate::error::{Result, TrainyardError};

/// A stored record plus its cancellation flag.
#[derive(Debug)]
struct JobEntry {
    record: RwLock<JobRecord>,
    cancel: CancellationFlag,
}

/// Shared store of all job records.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<JobId, Arc<JobEntry>>,
    sequence: AtomicU64,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new `Pending` record and return its id.
    pub fn create(&self, spec: JobSpec, total_steps: u32) -> Result<JobId> {
        if total_steps == 0 {
            return Err(TrainyardError::invalid_field("total_steps", "must be positive"));
        }

        loop {
            let id = JobId::new();
            match self.jobs.entry(id) {
                dashmap::mapref::entry::Entry::Occupied(_) => continue,
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
                    let record = JobRecord::new(id, spec, total_steps, sequence);
                    slot.insert(Arc::new(JobEntry {
                        record: RwLock::new(record),
                        cancel: CancellationFlag::new(),
                    }));
                    return Ok(id);
                }
            }
        }
    }

    fn entry(&self, id: JobId) -> Result<Arc<JobEntry>> {
        self.jobs
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| TrainyardError::job_not_found(id))
    }

    /// Snapshot of one record.
    pub fn get(&self, id: JobId) -> Result<JobRecord> {
        let entry = self.entry(id)?;
        let record = entry.record.read().clone();
        Ok(record)
    }

    /// Snapshots of every record in insertion order.
    pub fn list(&self) -> Vec<JobRecord> {
        self.list_filtered(None, None)
    }

    pub fn list_filtered(&self, status: Option<JobStatus>, kind: Option<JobKind>) -> Vec<JobRecord> {
        let entries: Vec<Arc<JobEntry>> = self.jobs.iter().map(|e| Arc::clone(e.value())).collect();

        let mut records: Vec<JobRecord> = entries
            .iter()
            .map(|entry| entry.record.read().clone())
            .filter(|r| status.map_or(true, |s| r.status == s))
            .filter(|r| kind.map_or(true, |k| r.kind == k))
            .collect();
        records.sort_by_key(|r| r.sequence);
        records
    }

    /// Latch the job's cancellation flag.
    ///
    /// Returns `false` when the job is unknown, already terminal, or already
    /// flagged. Never changes `status`; the runner observes the flag at its next
    /// step boundary.
    pub fn request_cancel(&self, id: JobId) -> bool {
        let Ok(entry) = self.entry(id) else {
            return false;
        };

        // Holding the write lock orders this against the runner's terminal write.
        let mut record = entry.record.write();
        if record.is_terminal() {
            return false;
        }
        if !entry.cancel.request() {
            return false;
        }
        record.cancel_requested = true;
        true
    }

    pub fn is_cancel_requested(&self, id: JobId) -> Result<bool> {
        Ok(self.entry(id)?.cancel.is_requested())
    }

    pub fn cancellation_token(&self, id: JobId) -> Result<CancellationToken> {
        Ok(self.entry(id)?.cancel.token())
    }

    /// Apply `mutator` atomically with respect to readers.
    ///
    /// Terminal records are frozen: any update to one fails with
    /// `InvalidStateTransition` and leaves it untouched. A mutator that returns
    /// an error must not have changed the record.
    pub fn update<T, F>(&self, id: JobId, mutator: F) -> Result<T>
    where
        F: FnOnce(&mut JobRecord) -> Result<T>,
    {
        let entry = self.entry(id)?;
        let mut record = entry.record.write();
        if record.is_terminal() {
            let status = record.status;
            return Err(TrainyardError::invalid_state_transition(id, status, status));
        }
        mutator(&mut record)
    }

    /// Drop terminal records that ended before `cutoff`. Returns how many went.
    pub fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        self.jobs.retain(|_, entry| {
            let record = entry.record.read();
            let expired = record.is_terminal() && record.ended_at.map_or(false, |ended| ended < cutoff);
            if expired {
                evicted += 1;
            }
            !expired
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn count_by_status(&self) -> HashMap<JobStatus, usize> {
        let mut counts = HashMap::new();
        for entry in self.jobs.iter() {
            let status = entry.value().record.read().status;
            *counts.entry(status).or_insert(0) += 1;
        }
        counts
    }

    /// Ids of every job that has not reached a terminal state.
    pub fn active_ids(&self) -> Vec<JobId> {
        self.jobs
            .iter()
            .filter(|e| !e.value().record.read().is_terminal())
            .map(|e| *e.key())
            .collect()
    }
}
