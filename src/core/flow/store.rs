#![allow(clippy::result_large_err)]

use crate::core::error::AppError;
use crate::core::flow::run::{ExecutionRun, NewRun, RunHistoryEntry, RunStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// Durable per-run state with compare-and-swap saves.
///
/// `save` succeeds only when the stored `version` equals `expected_version`;
/// the committed run comes back with `version + 1`. Every committed save
/// appends a [`RunHistoryEntry`].
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create(&self, new_run: NewRun, now: DateTime<Utc>) -> Result<ExecutionRun, AppError>;

    async fn load(&self, run_id: Uuid) -> Result<ExecutionRun, AppError>;

    async fn save(
        &self,
        run: ExecutionRun,
        expected_version: u64,
    ) -> Result<ExecutionRun, AppError>;

    /// Suspended runs whose timer or suspension deadline is at or before `now`.
    async fn find_due_waits(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, AppError>;

    /// Suspended runs waiting on the given external event key.
    async fn find_by_event_key(&self, key: &str) -> Result<Vec<Uuid>, AppError>;

    async fn history(&self, run_id: Uuid) -> Result<Vec<RunHistoryEntry>, AppError>;

    async fn list(&self) -> Result<Vec<ExecutionRun>, AppError>;
}

/// Bump the version of a run that won the compare-and-swap.
pub(crate) fn commit(mut run: ExecutionRun, stored: &ExecutionRun) -> ExecutionRun {
    run.version = stored.version + 1;
    if run.updated_at < stored.updated_at {
        run.updated_at = stored.updated_at;
    }
    run
}

pub(crate) fn conflict(run_id: Uuid, expected: u64, actual: u64) -> AppError {
    let mut err = AppError::conflict(format!(
        "run {} was modified concurrently (expected version {}, found {})",
        run_id, expected, actual
    ));
    err.add_context("run_id", &run_id.to_string());
    err
}

struct StoredRun {
    run: ExecutionRun,
    history: Vec<RunHistoryEntry>,
}

/// Process-local store backed by a concurrent map.
#[derive(Default)]
pub struct MemoryRunStore {
    runs: DashMap<Uuid, StoredRun>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create(&self, new_run: NewRun, now: DateTime<Utc>) -> Result<ExecutionRun, AppError> {
        let run = new_run.into_run(now);
        let entry = RunHistoryEntry::from_run(&run);
        self.runs.insert(
            run.run_id,
            StoredRun {
                run: run.clone(),
                history: vec![entry],
            },
        );
        Ok(run)
    }

    async fn load(&self, run_id: Uuid) -> Result<ExecutionRun, AppError> {
        self.runs
            .get(&run_id)
            .map(|stored| stored.run.clone())
            .ok_or_else(|| AppError::not_found(format!("run {} not found", run_id)))
    }

    async fn save(
        &self,
        run: ExecutionRun,
        expected_version: u64,
    ) -> Result<ExecutionRun, AppError> {
        let mut stored = self
            .runs
            .get_mut(&run.run_id)
            .ok_or_else(|| AppError::not_found(format!("run {} not found", run.run_id)))?;
        if stored.run.version != expected_version {
            return Err(conflict(run.run_id, expected_version, stored.run.version));
        }
        let committed = commit(run, &stored.run);
        stored.history.push(RunHistoryEntry::from_run(&committed));
        stored.run = committed.clone();
        Ok(committed)
    }

    async fn find_due_waits(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, AppError> {
        let mut due: Vec<(DateTime<Utc>, Uuid)> = self
            .runs
            .iter()
            .filter(|entry| entry.run.is_due(now))
            .map(|entry| (entry.run.updated_at, entry.run.run_id))
            .collect();
        due.sort();
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    async fn find_by_event_key(&self, key: &str) -> Result<Vec<Uuid>, AppError> {
        Ok(self
            .runs
            .iter()
            .filter(|entry| {
                entry.run.status == RunStatus::Suspended
                    && entry.run.external_event_key.as_deref() == Some(key)
            })
            .map(|entry| entry.run.run_id)
            .collect())
    }

    async fn history(&self, run_id: Uuid) -> Result<Vec<RunHistoryEntry>, AppError> {
        self.runs
            .get(&run_id)
            .map(|stored| stored.history.clone())
            .ok_or_else(|| AppError::not_found(format!("run {} not found", run_id)))
    }

    async fn list(&self) -> Result<Vec<ExecutionRun>, AppError> {
        let mut runs: Vec<ExecutionRun> = self.runs.iter().map(|e| e.run.clone()).collect();
        runs.sort_by_key(|run| run.created_at);
        Ok(runs)
    }
}
