#![allow(clippy::result_large_err)]

use crate::core::error::AppError;
use crate::core::flow::run::{ExecutionRun, NewRun, RunHistoryEntry, RunStatus};
use crate::core::flow::store::{commit, conflict, RunStore};
use crate::core::types::ErrorCategory;
use crate::utils::{append_jsonl, read_json, read_jsonl, write_json};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use uuid::Uuid;

const LOCK_WAIT: Duration = Duration::from_secs(2);
const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

/// Paths under `<root>/runs/<run_id>`.
pub struct RunStatePaths {
    pub run_dir: PathBuf,
    pub run_file: PathBuf,
    pub history_file: PathBuf,
    pub lock_file: PathBuf,
}

impl RunStatePaths {
    pub fn new(root: &Path, run_id: &Uuid) -> Self {
        let run_dir = root.join("runs").join(run_id.to_string());
        Self {
            run_file: run_dir.join("run.json"),
            history_file: run_dir.join("history.jsonl"),
            lock_file: run_dir.join("run.lock"),
            run_dir,
        }
    }
}

/// Run store keeping one directory per run; safe across processes sharing the directory.
pub struct FileRunStore {
    root: PathBuf,
}

impl FileRunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_ids(&self) -> Result<Vec<Uuid>, AppError> {
        let runs_dir = self.root.join("runs");
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&runs_dir)?.flatten() {
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok())
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn read_run(&self, run_id: &Uuid) -> Result<ExecutionRun, AppError> {
        let paths = RunStatePaths::new(&self.root, run_id);
        read_json(&paths.run_file).map_err(|err| {
            if err.category == ErrorCategory::NotFound {
                AppError::not_found(format!("run {} not found", run_id))
            } else {
                err
            }
        })
    }

    fn scan(&self) -> Result<Vec<ExecutionRun>, AppError> {
        let mut runs = Vec::new();
        for id in self.run_ids()? {
            match self.read_run(&id) {
                Ok(run) => runs.push(run),
                Err(err) => {
                    tracing::warn!(run_id = %id, error = %err, "skipping unreadable run state")
                }
            }
        }
        Ok(runs)
    }
}

/// Exclusive `run.lock` held for the duration of a compare-and-swap.
struct RunLock {
    path: PathBuf,
}

impl RunLock {
    async fn acquire(path: &Path) -> Result<RunLock, AppError> {
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(RunLock {
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_is_stale(path) {
                        tracing::warn!(lock = %path.display(), "removing stale run lock");
                        let _ = fs::remove_file(path);
                        continue;
                    }
                    if started.elapsed() >= LOCK_WAIT {
                        return Err(AppError::conflict(format!(
                            "run lock {} is held by another writer",
                            path.display()
                        )));
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(err) => {
                    return Err(AppError::new(
                        ErrorCategory::IoError,
                        format!("failed to create lock {}: {}", path.display(), err),
                    ))
                }
            }
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn lock_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age > LOCK_STALE_AFTER)
        .unwrap_or(false)
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn create(&self, new_run: NewRun, now: DateTime<Utc>) -> Result<ExecutionRun, AppError> {
        let run = new_run.into_run(now);
        let paths = RunStatePaths::new(&self.root, &run.run_id);
        fs::create_dir_all(&paths.run_dir)?;
        write_json(&paths.run_file, &run)?;
        append_jsonl(&paths.history_file, &RunHistoryEntry::from_run(&run))?;
        Ok(run)
    }

    async fn load(&self, run_id: Uuid) -> Result<ExecutionRun, AppError> {
        self.read_run(&run_id)
    }

    async fn save(
        &self,
        run: ExecutionRun,
        expected_version: u64,
    ) -> Result<ExecutionRun, AppError> {
        let paths = RunStatePaths::new(&self.root, &run.run_id);
        if !paths.run_file.exists() {
            return Err(AppError::not_found(format!("run {} not found", run.run_id)));
        }
        let _lock = RunLock::acquire(&paths.lock_file).await?;
        let stored = self.read_run(&run.run_id)?;
        if stored.version != expected_version {
            return Err(conflict(run.run_id, expected_version, stored.version));
        }
        let committed = commit(run, &stored);
        write_json(&paths.run_file, &committed)?;
        append_jsonl(&paths.history_file, &RunHistoryEntry::from_run(&committed))?;
        Ok(committed)
    }

    async fn find_due_waits(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, AppError> {
        let mut due: Vec<(DateTime<Utc>, Uuid)> = self
            .scan()?
            .into_iter()
            .filter(|run| run.is_due(now))
            .map(|run| (run.updated_at, run.run_id))
            .collect();
        due.sort();
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    async fn find_by_event_key(&self, key: &str) -> Result<Vec<Uuid>, AppError> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|run| {
                run.status == RunStatus::Suspended && run.external_event_key.as_deref() == Some(key)
            })
            .map(|run| run.run_id)
            .collect())
    }

    async fn history(&self, run_id: Uuid) -> Result<Vec<RunHistoryEntry>, AppError> {
        let paths = RunStatePaths::new(&self.root, &run_id);
        if !paths.run_file.exists() {
            return Err(AppError::not_found(format!("run {} not found", run_id)));
        }
        read_jsonl(&paths.history_file)
    }

    async fn list(&self) -> Result<Vec<ExecutionRun>, AppError> {
        let mut runs = self.scan()?;
        runs.sort_by_key(|run| run.created_at);
        Ok(runs)
    }
}
