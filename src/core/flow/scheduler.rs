#![allow(clippy::result_large_err)] // Scheduler APIs return AppError so run failures keep their structured codes.

//! The interpreter that moves runs through a graph, one persisted step at a time.
//!
//! Every step loads the run, evaluates the current node and commits the
//! result with a compare-and-swap save. A losing writer reloads and
//! re-evaluates. Nothing about a run lives in memory between steps, so any
//! worker can pick up any run.

use crate::core::config::EngineConfig;
use crate::core::error::AppError;
use crate::core::flow::catalog::GraphCatalog;
use crate::core::flow::clock::{Clock, SystemClock};
use crate::core::flow::dispatcher::{EffectDispatcher, EffectError};
use crate::core::flow::effects::{Completion, EffectOutcome, EffectRequest};
use crate::core::flow::evaluators::{evaluate, EvalContext, EvalResult, EvalSettings};
use crate::core::flow::expression::ExpressionEngine;
use crate::core::flow::run::{ExecutionRun, NewRun, RunHistoryEntry, RunStatus, WaitTarget};
use crate::core::flow::schema::NodeKind;
use crate::core::flow::store::RunStore;
use crate::core::flow::validate::{ValidGraph, ValidNode};
use crate::core::types::ErrorCategory;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::Rng;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Result of one scheduler step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The run is still Running and the next step can execute immediately.
    Advanced,
    /// The run is suspended or terminal.
    Stopped(RunStatus),
}

pub struct FlowEngine {
    catalog: Arc<dyn GraphCatalog>,
    store: Arc<dyn RunStore>,
    dispatcher: EffectDispatcher,
    expressions: ExpressionEngine,
    settings: EvalSettings,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl FlowEngine {
    pub fn new(
        catalog: Arc<dyn GraphCatalog>,
        store: Arc<dyn RunStore>,
        dispatcher: EffectDispatcher,
        config: EngineConfig,
    ) -> Self {
        Self {
            catalog,
            store,
            dispatcher: dispatcher.with_timeout(config.effect_timeout()),
            expressions: ExpressionEngine::default(),
            settings: EvalSettings::from_config(&config),
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn GraphCatalog> {
        &self.catalog
    }

    /// Start a run of the latest published version whose trigger matches the payload.
    pub async fn trigger_event(&self, graph_id: &str, payload: Value) -> Result<Uuid, AppError> {
        self.trigger_version(graph_id, None, payload).await
    }

    /// Start a run pinned to a specific version (or the latest when `None`).
    pub async fn trigger_version(
        &self,
        graph_id: &str,
        version: Option<u32>,
        payload: Value,
    ) -> Result<Uuid, AppError> {
        let graph = match version {
            Some(version) => self.catalog.get(graph_id, version).await?,
            None => self.catalog.latest(graph_id).await?,
        };
        let entry = graph.match_trigger(&payload).ok_or_else(|| {
            AppError::new(
                ErrorCategory::NotFound,
                format!(
                    "no trigger in graph {} v{} matches the event",
                    graph.id(),
                    graph.version()
                ),
            )
            .with_code("FLOW-TRIGGER-001")
        })?;
        let run = self
            .store
            .create(
                NewRun {
                    graph_id: graph.id().to_string(),
                    graph_version: graph.version(),
                    tenant_id: graph.tenant_id().to_string(),
                    entry_node_id: entry.to_string(),
                    trigger_payload: payload,
                },
                self.clock.now(),
            )
            .await?;
        tracing::info!(
            run_id = %run.run_id,
            graph_id = %run.graph_id,
            version = run.graph_version,
            tenant_id = %run.tenant_id,
            trigger = %entry,
            "run created"
        );
        let run_id = run.run_id;
        if let Err(mut err) = self.drive(run_id).await {
            tracing::error!(run_id = %run_id, error = %err, "run created but driving it failed");
            err.add_context("run_id", &run_id.to_string());
            return Err(err);
        }
        Ok(run_id)
    }

    /// Resume a suspended run, recording `payload` as the waiting node's result.
    pub async fn resume_run(&self, run_id: Uuid, payload: Value) -> Result<RunStatus, AppError> {
        let now = self.clock.now();
        let resumed = self
            .transition(run_id, |run, graph| {
                if run.status != RunStatus::Suspended {
                    return false;
                }
                let value = if payload.is_null() {
                    json!({ "resumed_at": now })
                } else {
                    payload.clone()
                };
                let node_id = run.current_node_id.clone();
                record_outcome(run, graph.node(&node_id), value, now);
                run.clear_wait();
                run.pending_effect_idempotency_key = None;
                run.status = RunStatus::Running;
                true
            })
            .await?;
        if !resumed {
            let run = self.store.load(run_id).await?;
            tracing::debug!(run_id = %run_id, status = %run.status, "resume ignored; run is not suspended");
            return Ok(run.status);
        }
        tracing::info!(run_id = %run_id, "run resumed");
        self.drive(run_id).await
    }

    /// Resume every run waiting on `key`. Returns the runs that were resumed.
    pub async fn deliver_event(&self, key: &str, payload: Value) -> Result<Vec<Uuid>, AppError> {
        let waiting = self.store.find_by_event_key(key).await?;
        let results = join_all(
            waiting
                .iter()
                .map(|run_id| self.resume_run(*run_id, payload.clone())),
        )
        .await;
        let mut resumed = Vec::new();
        for (run_id, result) in waiting.into_iter().zip(results) {
            match result {
                Ok(_) => resumed.push(run_id),
                Err(err) => {
                    tracing::error!(run_id = %run_id, key = %key, error = %err, "failed to resume run for event")
                }
            }
        }
        Ok(resumed)
    }

    /// Wake runs whose timer elapsed and fail runs whose suspension ceiling passed.
    pub async fn wake_due(&self) -> Result<Vec<Uuid>, AppError> {
        let now = self.clock.now();
        let due = self.store.find_due_waits(now).await?;
        let mut woken = Vec::new();
        for run_id in due {
            match self.wake_run(run_id, now).await {
                Ok(true) => woken.push(run_id),
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(run_id = %run_id, error = %err, "failed to wake run")
                }
            }
        }
        Ok(woken)
    }

    async fn wake_run(&self, run_id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        let woke = self
            .transition(run_id, |run, graph| {
                if !run.is_due(now) {
                    return false;
                }
                let timer_due = run.suspended_until.map(|at| at <= now).unwrap_or(false);
                if timer_due {
                    let node_id = run.current_node_id.clone();
                    let until = run.suspended_until;
                    record_outcome(run, graph.node(&node_id), json!({ "waited_until": until }), now);
                    run.clear_wait();
                    run.status = RunStatus::Running;
                } else {
                    let node_id = run.current_node_id.clone();
                    let key = run.external_event_key.clone().unwrap_or_default();
                    tracing::warn!(run_id = %run.run_id, node_id = %node_id, key = %key, "suspension ceiling reached");
                    run.fail(
                        "FLOW-SUSPEND-001",
                        Some(&node_id),
                        format!("external event '{}' did not arrive before the suspension deadline", key),
                    );
                }
                true
            })
            .await?;
        if woke {
            self.drive(run_id).await?;
        }
        Ok(woke)
    }

    /// Cancel a non-terminal run. In-flight effect outcomes are discarded.
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<RunStatus, AppError> {
        self.transition(run_id, |run, _| {
            if run.status.is_terminal() {
                return false;
            }
            run.status = RunStatus::Cancelled;
            run.clear_wait();
            run.pending_effect_idempotency_key = None;
            true
        })
        .await?;
        let run = self.store.load(run_id).await?;
        tracing::info!(run_id = %run_id, status = %run.status, "cancel requested");
        Ok(run.status)
    }

    pub async fn load_run(&self, run_id: Uuid) -> Result<ExecutionRun, AppError> {
        self.store.load(run_id).await
    }

    pub async fn run_history(&self, run_id: Uuid) -> Result<Vec<RunHistoryEntry>, AppError> {
        self.store.history(run_id).await
    }

    pub async fn list_runs(&self) -> Result<Vec<ExecutionRun>, AppError> {
        self.store.list().await
    }

    /// Step until the run suspends or terminates.
    pub async fn drive(&self, run_id: Uuid) -> Result<RunStatus, AppError> {
        loop {
            match self.step(run_id).await? {
                StepOutcome::Advanced => continue,
                StepOutcome::Stopped(status) => return Ok(status),
            }
        }
    }

    /// Execute one step, re-evaluating from fresh state on save conflicts.
    pub async fn step(&self, run_id: Uuid) -> Result<StepOutcome, AppError> {
        let mut attempt = 0;
        loop {
            match self.try_step(run_id).await {
                Err(err) if err.is_conflict() && attempt < self.config.runtime.conflict_retries => {
                    attempt += 1;
                    tracing::debug!(run_id = %run_id, attempt, "save conflict; reloading run");
                }
                other => return other,
            }
        }
    }

    async fn try_step(&self, run_id: Uuid) -> Result<StepOutcome, AppError> {
        let mut run = self.store.load(run_id).await?;
        if run.status != RunStatus::Running {
            return Ok(StepOutcome::Stopped(run.status));
        }
        let expected = run.version;
        let now = self.clock.now();
        let graph = self
            .catalog
            .get(&run.graph_id, run.graph_version)
            .await?;

        let Some(node) = graph.node(&run.current_node_id) else {
            let node_id = run.current_node_id.clone();
            run.fail(
                "FLOW-RUN-001",
                Some(&node_id),
                format!("node '{}' does not exist in graph v{}", node_id, run.graph_version),
            );
            return self.commit(run, expected, now).await;
        };

        if !run.entered {
            run.entered = true;
            *run.visited_count.entry(node.node.id.clone()).or_insert(0) += 1;
            run.total_steps += 1;
            if self.exceeds_budget(&mut run, node) {
                return self.commit(run, expected, now).await;
            }
        }

        let result = {
            let ctx = EvalContext {
                run: &run,
                node,
                graph: &graph,
                now,
                settings: &self.settings,
                expressions: &self.expressions,
            };
            evaluate(&ctx)
        };

        match result {
            EvalResult::Continue(label) => {
                let next = graph
                    .resolve_branch(&node.node.id, label.as_deref())
                    .map(|edge| edge.target.clone());
                match next {
                    Ok(target) => self.advance(&mut run, &graph, &target, now),
                    Err(err) => {
                        tracing::warn!(
                            run_id = %run.run_id,
                            node_id = %node.node.id,
                            label = ?label,
                            "no matching branch"
                        );
                        run.fail(&err.code, Some(&node.node.id), err.message);
                    }
                }
            }
            EvalResult::Suspend { target, deadline } => {
                match &target {
                    WaitTarget::Until(until) => run.suspend(Some(*until), None, None),
                    WaitTarget::ExternalEvent(key) => run.suspend(None, Some(key.clone()), deadline),
                }
                tracing::info!(run_id = %run.run_id, node_id = %node.node.id, target = ?target, "run suspended");
            }
            EvalResult::Dispatch(request) => {
                return self.run_effect(run, expected, node, request).await;
            }
            EvalResult::Complete { outcome } => complete(&mut run, &node.node.id, outcome, now),
            EvalResult::Fail(reason) => {
                tracing::warn!(
                    run_id = %run.run_id,
                    node_id = %node.node.id,
                    code = %reason.code,
                    reason = %reason.message,
                    "node failed"
                );
                run.fail(&reason.code, Some(&node.node.id), reason.message);
            }
        }
        self.commit(run, expected, now).await
    }

    /// Apply the visit bound and run-wide budget. Returns true when the run was failed.
    fn exceeds_budget(&self, run: &mut ExecutionRun, node: &ValidNode) -> bool {
        let runtime = &self.config.runtime;
        let limit = node.node.max_visits.unwrap_or(if node.node.loop_safe {
            runtime.loop_safe_visit_limit
        } else {
            runtime.max_node_visits
        });
        let visits = run.visits(&node.node.id);
        let (code, reason) = if visits > limit {
            (
                "FLOW-BUDGET-001",
                format!("node '{}' visited {} times (limit {})", node.node.id, visits, limit),
            )
        } else if run.total_steps > runtime.max_steps_per_run {
            (
                "FLOW-BUDGET-002",
                format!(
                    "run exceeded its step budget of {} at node '{}'",
                    runtime.max_steps_per_run, node.node.id
                ),
            )
        } else {
            return false;
        };
        tracing::error!(
            run_id = %run.run_id,
            node_id = %node.node.id,
            visits,
            total_steps = run.total_steps,
            trail = ?run.visited_count,
            "{}",
            reason
        );
        run.fail(code, Some(&node.node.id), reason);
        true
    }

    /// Move to `target`. Entering an End node completes the run in the same save.
    fn advance(&self, run: &mut ExecutionRun, graph: &ValidGraph, target: &str, now: DateTime<Utc>) {
        run.advance_to(target);
        let Some(next) = graph.node(target) else {
            return;
        };
        if next.node.kind != NodeKind::End {
            return;
        }
        run.entered = true;
        *run.visited_count.entry(target.to_string()).or_insert(0) += 1;
        run.total_steps += 1;
        if self.exceeds_budget(run, next) {
            return;
        }
        let result = evaluate(&EvalContext {
            run: &*run,
            node: next,
            graph,
            now,
            settings: &self.settings,
            expressions: &self.expressions,
        });
        if let EvalResult::Complete { outcome } = result {
            complete(run, target, outcome, now);
        }
    }

    /// Persist the pending key, dispatch with retries, then record the outcome.
    async fn run_effect(
        &self,
        mut run: ExecutionRun,
        expected: u64,
        node: &ValidNode,
        request: EffectRequest,
    ) -> Result<StepOutcome, AppError> {
        if request.completion == Completion::Callback {
            return self.run_callback_effect(run, expected, node, request).await;
        }
        let node_id = node.node.id.clone();
        let mut expected = expected;
        if run.pending_effect_idempotency_key.as_deref() != Some(request.idempotency_key.as_str()) {
            run.pending_effect_idempotency_key = Some(request.idempotency_key.clone());
            run.updated_at = self.clock.now();
            run = self.store.save(run, expected).await?;
            expected = run.version;
        }

        let outcome = self.dispatch_with_retry(&run, &node_id, &request).await;
        let now = self.clock.now();
        match outcome {
            Ok(EffectOutcome::Completed(value)) => {
                record_outcome(&mut run, Some(node), value, now);
                run.pending_effect_idempotency_key = None;
            }
            Ok(EffectOutcome::Accepted) => {
                run.fail(
                    "FLOW-EFFECT-003",
                    Some(&node_id),
                    format!("{} collaborator deferred a request that needs an inline result", request.kind()),
                );
            }
            Err((err, attempts)) => {
                run.fail(
                    err.code(),
                    Some(&node_id),
                    format!("{} (after {} attempt(s))", err, attempts),
                );
            }
        }

        let run_id = run.run_id;
        match self.commit(run, expected, now).await {
            Err(err) if err.is_conflict() => {
                let fresh = self.store.load(run_id).await?;
                if fresh.status.is_terminal() {
                    tracing::info!(
                        run_id = %run_id,
                        node_id = %node_id,
                        status = %fresh.status,
                        "discarding effect outcome for a run that ended concurrently"
                    );
                    return Ok(StepOutcome::Stopped(fresh.status));
                }
                Err(err)
            }
            other => other,
        }
    }

    /// Suspend on the request key, then submit. The run is already waiting when
    /// the submission goes out, so a callback that beats the submit's return
    /// still finds it.
    async fn run_callback_effect(
        &self,
        mut run: ExecutionRun,
        expected: u64,
        node: &ValidNode,
        request: EffectRequest,
    ) -> Result<StepOutcome, AppError> {
        let node_id = node.node.id.clone();
        let key = request.idempotency_key.clone();
        let run_id = run.run_id;
        let now = self.clock.now();
        let deadline = chrono::Duration::from_std(self.settings.suspend_timeout)
            .ok()
            .and_then(|d| now.checked_add_signed(d));
        run.pending_effect_idempotency_key = Some(key.clone());
        run.suspend(None, Some(key.clone()), deadline);
        run.updated_at = now;
        let run = self.store.save(run, expected).await?;
        tracing::info!(
            run_id = %run_id,
            node_id = %node_id,
            key = %key,
            "awaiting asynchronous result"
        );

        match self.dispatch_with_retry(&run, &node_id, &request).await {
            // callback dispatches only ever come back as accepted
            Ok(_) => {
                self.transition(run_id, |run, _| {
                    if !run.is_waiting_on(&key) || run.pending_effect_idempotency_key.is_none() {
                        return false;
                    }
                    run.pending_effect_idempotency_key = None;
                    true
                })
                .await?;
            }
            Err((err, attempts)) => {
                let failed = self
                    .transition(run_id, |run, _| {
                        if !run.is_waiting_on(&key) {
                            return false;
                        }
                        run.pending_effect_idempotency_key = None;
                        run.fail(
                            err.code(),
                            Some(&node_id),
                            format!("{} (after {} attempt(s))", err, attempts),
                        );
                        true
                    })
                    .await?;
                if failed {
                    tracing::warn!(run_id = %run_id, node_id = %node_id, code = %err.code(), "run failed");
                }
            }
        }

        let fresh = self.store.load(run_id).await?;
        Ok(match fresh.status {
            RunStatus::Running => StepOutcome::Advanced,
            status => StepOutcome::Stopped(status),
        })
    }

    async fn dispatch_with_retry(
        &self,
        run: &ExecutionRun,
        node_id: &str,
        request: &EffectRequest,
    ) -> Result<EffectOutcome, (EffectError, u32)> {
        let policy = &self.config.effects;
        let mut attempts = 0u32;
        let mut backoff_ms = policy.backoff_ms;
        loop {
            attempts += 1;
            match self.dispatcher.dispatch(request).await {
                Ok(outcome) => {
                    tracing::info!(
                        run_id = %run.run_id,
                        node_id = %node_id,
                        kind = %request.kind(),
                        key = %request.idempotency_key,
                        attempts,
                        "effect dispatched"
                    );
                    return Ok(outcome);
                }
                Err(err) => {
                    if !err.retryable() || attempts >= policy.max_attempts {
                        tracing::error!(
                            run_id = %run.run_id,
                            node_id = %node_id,
                            key = %request.idempotency_key,
                            attempts,
                            error = %err,
                            "effect failed"
                        );
                        return Err((err, attempts));
                    }
                    let jitter = if policy.jitter_ms > 0 {
                        rand::thread_rng().gen_range(0..=policy.jitter_ms)
                    } else {
                        0
                    };
                    let sleep_ms = backoff_ms.saturating_add(jitter);
                    tracing::warn!(
                        run_id = %run.run_id,
                        node_id = %node_id,
                        attempts,
                        retry_in_ms = sleep_ms,
                        error = %err,
                        "effect failed; retrying"
                    );
                    if sleep_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                    }
                    backoff_ms = ((backoff_ms as f32) * policy.backoff_multiplier).max(1.0) as u64;
                }
            }
        }
    }

    /// Load, mutate and save with conflict retries. The closure returns false to skip the save.
    async fn transition<F>(&self, run_id: Uuid, mut apply: F) -> Result<bool, AppError>
    where
        F: FnMut(&mut ExecutionRun, &ValidGraph) -> bool,
    {
        let mut attempt = 0;
        loop {
            let mut run = self.store.load(run_id).await?;
            let graph = self
                .catalog
                .get(&run.graph_id, run.graph_version)
                .await?;
            let expected = run.version;
            if !apply(&mut run, &graph) {
                return Ok(false);
            }
            run.updated_at = self.clock.now();
            match self.store.save(run, expected).await {
                Ok(saved) => {
                    tracing::debug!(run_id = %run_id, status = %saved.status, version = saved.version, "run transitioned");
                    return Ok(true);
                }
                Err(err) if err.is_conflict() && attempt < self.config.runtime.conflict_retries => {
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn commit(
        &self,
        mut run: ExecutionRun,
        expected: u64,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, AppError> {
        run.updated_at = now;
        let saved = self.store.save(run, expected).await?;
        match saved.status {
            RunStatus::Running => Ok(StepOutcome::Advanced),
            status => {
                match &saved.failure {
                    Some(failure) if status == RunStatus::Failed => tracing::warn!(
                        run_id = %saved.run_id,
                        code = %failure.code,
                        node_id = ?failure.node_id,
                        reason = %failure.reason,
                        "run failed"
                    ),
                    _ => tracing::info!(run_id = %saved.run_id, status = %status, node_id = %saved.current_node_id, "run stopped"),
                }
                Ok(StepOutcome::Stopped(status))
            }
        }
    }
}

/// Record a node outcome for the current visit and bind its output variable.
fn record_outcome(run: &mut ExecutionRun, node: Option<&ValidNode>, value: Value, now: DateTime<Utc>) {
    let node_id = run.current_node_id.clone();
    if let Some(var) = node.and_then(|n| n.config.output_var()) {
        run.variables.insert(var.to_string(), value.clone());
    }
    run.record_result(&node_id, value, now);
}

fn complete(run: &mut ExecutionRun, node_id: &str, outcome: Option<String>, now: DateTime<Utc>) {
    run.status = RunStatus::Completed;
    run.clear_wait();
    run.pending_effect_idempotency_key = None;
    run.record_result(node_id, json!({ "outcome": outcome }), now);
    if let Some(outcome) = outcome {
        run.variables.insert("outcome".to_string(), Value::String(outcome));
    }
}
