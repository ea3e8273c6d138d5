use crate::{
    cli::args::{
        DeliverArgs, GraphFileArgs, OutputFormat, PollArgs, ResumeArgs, RunIdArgs, StatusArgs,
        TriggerArgs, ValidateArgs,
    },
    cli::context::{self, CliContext},
    cli::Args,
    core::flow::{dot::graph_to_dot, ExecutionRun, FlowGraph, PublishError, ResumeTrigger},
    Result,
};
use anyhow::anyhow;
use serde_json::json;
use uuid::Uuid;

pub fn validate(args: &ValidateArgs) -> Result<()> {
    let graph = FlowGraph::load_from_file(&args.graph.path)?;
    match crate::core::flow::validate::validate(&graph) {
        Ok(valid) => {
            match args.format {
                OutputFormat::Text => println!(
                    "{} v{} is valid ({} nodes, {} edges, digest {})",
                    valid.id(),
                    valid.version(),
                    graph.nodes.len(),
                    graph.edges.len(),
                    &valid.digest()[..12]
                ),
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "graph_id": valid.id(),
                        "version": valid.version(),
                        "valid": true,
                        "digest": valid.digest(),
                        "errors": [],
                    }))?
                ),
            }
            Ok(())
        }
        Err(errors) => {
            match args.format {
                OutputFormat::Text => {
                    for error in &errors {
                        println!("{}", error);
                    }
                }
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "graph_id": graph.id,
                        "version": graph.version,
                        "valid": false,
                        "errors": errors,
                    }))?
                ),
            }
            Err(anyhow!(
                "graph {} v{} failed validation with {} error(s)",
                graph.id,
                graph.version,
                errors.len()
            ))
        }
    }
}

pub async fn publish(args: &Args, file: &GraphFileArgs) -> Result<()> {
    let graph = FlowGraph::load_from_file(&file.path)?;
    let ctx = context::build(args)?;
    match ctx.engine.catalog().publish(graph).await {
        Ok(valid) => {
            tracing::info!(graph_id = %valid.id(), version = valid.version(), "graph published");
            println!("Published {} v{}", valid.id(), valid.version());
            Ok(())
        }
        Err(PublishError::Invalid(errors)) => {
            for error in &errors {
                println!("{}", error);
            }
            Err(anyhow!("publish rejected: {} validation error(s)", errors.len()))
        }
        Err(err) => Err(anyhow!("publish rejected: {}", err)),
    }
}

pub fn dot(args: &GraphFileArgs) -> Result<()> {
    let graph = FlowGraph::load_from_file(&args.path)?;
    println!("{}", graph_to_dot(&graph));
    Ok(())
}

pub async fn trigger(args: &Args, trigger: &TriggerArgs) -> Result<()> {
    let payload = trigger.payload.value()?;
    let ctx = context::build(args)?;
    let run_id = ctx
        .engine
        .trigger_version(&trigger.graph_id, trigger.version, payload)
        .await?;
    print_run_summary(&ctx, run_id).await
}

pub async fn resume(args: &Args, resume: &ResumeArgs) -> Result<()> {
    let payload = resume.payload.value()?;
    let ctx = context::build(args)?;
    ctx.engine.resume_run(resume.run_id, payload).await?;
    print_run_summary(&ctx, resume.run_id).await
}

pub async fn deliver(args: &Args, deliver: &DeliverArgs) -> Result<()> {
    let payload = deliver.payload.value()?;
    let ctx = context::build(args)?;
    let resumed = ctx.engine.deliver_event(&deliver.key, payload).await?;
    if resumed.is_empty() {
        println!("No runs waiting on '{}'", deliver.key);
    }
    for run_id in resumed {
        print_run_summary(&ctx, run_id).await?;
    }
    Ok(())
}

pub async fn wake(args: &Args) -> Result<()> {
    let ctx = context::build(args)?;
    let woken = ResumeTrigger::new(ctx.engine.clone()).tick().await?;
    println!("Woke {} run(s)", woken.len());
    for run_id in woken {
        print_run_summary(&ctx, run_id).await?;
    }
    Ok(())
}

pub async fn poll(args: &Args, poll: &PollArgs) -> Result<()> {
    let ctx = context::build(args)?;
    let interval = poll.interval.unwrap_or_else(|| ctx.config.poll_interval());
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });
    ResumeTrigger::new(ctx.engine.clone())
        .run(interval, shutdown_rx)
        .await;
    Ok(())
}

pub async fn cancel(args: &Args, run: &RunIdArgs) -> Result<()> {
    let ctx = context::build(args)?;
    let status = ctx.engine.cancel_run(run.run_id).await?;
    println!("Run {}: {}", run.run_id, status);
    Ok(())
}

pub async fn status(args: &Args, status: &StatusArgs) -> Result<()> {
    let ctx = context::build(args)?;
    let runs = match status.run_id {
        Some(run_id) => vec![ctx.engine.load_run(run_id).await?],
        None => ctx.engine.list_runs().await?,
    };
    match status.format {
        OutputFormat::Json if status.run_id.is_some() => {
            println!("{}", serde_json::to_string_pretty(&runs[0])?)
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&runs)?),
        OutputFormat::Text if runs.is_empty() => println!("No runs found"),
        OutputFormat::Text => {
            for run in &runs {
                print_run(run);
            }
        }
    }
    Ok(())
}

pub async fn history(args: &Args, run: &RunIdArgs) -> Result<()> {
    let ctx = context::build(args)?;
    for entry in ctx.engine.run_history(run.run_id).await? {
        let failure = entry
            .failure
            .as_ref()
            .map(|f| format!(" [{}] {}", f.code, f.reason))
            .unwrap_or_default();
        let pending = entry
            .pending_effect_idempotency_key
            .as_deref()
            .map(|key| format!(" pending={}", key))
            .unwrap_or_default();
        println!(
            "v{:<4} {} {:<10} {}{}{}",
            entry.version,
            entry.recorded_at.to_rfc3339(),
            entry.status.to_string(),
            entry.current_node_id,
            pending,
            failure
        );
    }
    Ok(())
}

async fn print_run_summary(ctx: &CliContext, run_id: Uuid) -> Result<()> {
    let run = ctx.engine.load_run(run_id).await?;
    print_run(&run);
    let effects = ctx.outbox.entries()?.len();
    if effects > 0 {
        println!("  outbox: {} effect(s) in {}", effects, ctx.outbox.log_path().display());
    }
    Ok(())
}

fn print_run(run: &ExecutionRun) {
    println!(
        "Run {} ({} v{}, tenant {}): {} at {}",
        run.run_id, run.graph_id, run.graph_version, run.tenant_id, run.status, run.current_node_id
    );
    if let Some(until) = run.suspended_until {
        println!("  waiting until {}", until.to_rfc3339());
    }
    if let Some(key) = &run.external_event_key {
        println!("  waiting for event '{}'", key);
    }
    if let Some(failure) = &run.failure {
        println!("  failed: [{}] {}", failure.code, failure.reason);
    }
    println!("  steps: {}", run.total_steps);
}
