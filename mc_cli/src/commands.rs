use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use serde::Serialize;
use tracing::{info, warn};

use mc_core::{AssistantConfig, CommandRuntime, HistoryView, SeedLogReader, SubmitOptions};
use mc_schema::{JobId, LocatorQuery, QueryKind, SeedFacts};

use crate::QueryArgs;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Jobs from earlier invocations are only visible when `history.log_path`
/// points at a durable log.
fn build_runtime(config: &AssistantConfig) -> Result<CommandRuntime> {
    let history = config
        .history()
        .open_store()
        .wrap_err("failed to open job history")?;
    let runtime = CommandRuntime::builder(config.adapter().build())
        .history(Arc::new(history))
        .settings(config.runtime().settings())
        .build()?;
    Ok(runtime)
}

pub async fn submit(
    config: &AssistantConfig,
    command: &str,
    timeout_ms: Option<u64>,
    max_attempts: Option<u32>,
    wait_ms: u64,
) -> Result<()> {
    let runtime = build_runtime(config)?;
    let mut retry = runtime.settings().retry;
    if let Some(max_attempts) = max_attempts {
        retry.max_attempts = max_attempts;
    }
    let options = SubmitOptions {
        retry: Some(retry),
        timeout: timeout_ms.map(Duration::from_millis),
    };
    let job_id = runtime.submit_command(command, options)?;
    info!(target: "mc_assist::cli", job = %job_id, "cli.submitted");
    let job = runtime
        .wait_for_terminal(job_id, Duration::from_millis(wait_ms))
        .await?;
    print_json(&job)
}

/// Inspection commands only read the log, so a runtime running in another
/// process keeps ownership of its unfinished jobs.
fn open_view(config: &AssistantConfig) -> Result<HistoryView> {
    config
        .history()
        .open_view(config.runtime().max_attempts)
        .wrap_err("failed to read job history")
}

pub fn get_job(config: &AssistantConfig, job_id: JobId) -> Result<()> {
    let view = open_view(config)?;
    print_json(&view.get_job(job_id)?)
}

pub fn list_jobs(config: &AssistantConfig, limit: usize) -> Result<()> {
    let view = open_view(config)?;
    print_json(&view.list_recent_jobs(limit)?)
}

pub fn history(config: &AssistantConfig, limit: usize) -> Result<()> {
    let view = open_view(config)?;
    print_json(&view.history().recent(limit))
}

fn load_seed_facts(config: &AssistantConfig, log: Option<PathBuf>) -> Result<SeedFacts> {
    let parser = config.seed().parser()?;
    let reader = log.map(SeedLogReader::new).or_else(|| config.seed().reader());
    let text = match reader {
        Some(reader) => reader.tail(config.seed().tail_lines)?,
        None => {
            warn!(
                target: "mc_assist::cli",
                "seed_log.unconfigured=treating_seed_as_unknown"
            );
            String::new()
        }
    };
    Ok(parser.parse(&text))
}

pub fn seed_status(config: &AssistantConfig, log: Option<PathBuf>) -> Result<()> {
    print_json(&load_seed_facts(config, log)?)
}

pub fn missing(config: &AssistantConfig, kind: QueryKind, log: Option<PathBuf>) -> Result<()> {
    let facts = load_seed_facts(config, log)?;
    let backend = config.locator().build()?;
    let missing = config
        .seed()
        .engine()
        .missing_for(&facts, kind, &backend.readiness(kind));
    let messages: Vec<String> = missing.iter().map(ToString::to_string).collect();
    print_json(&serde_json::json!({
        "kind": kind,
        "ready": missing.is_empty(),
        "missing": missing,
        "messages": messages,
    }))
}

pub async fn nearest(config: &AssistantConfig, kind: QueryKind, args: QueryArgs) -> Result<()> {
    let facts = load_seed_facts(config, args.log)?;
    let backend = config.locator().build()?;
    let version = args
        .version
        .unwrap_or_else(|| config.locator().minecraft_version.clone());
    let query =
        LocatorQuery::new(kind, args.target, args.x, args.z, args.dimension).with_version(version);

    match config
        .seed()
        .resolver()
        .resolve(query, &facts, backend.as_ref())
        .await
    {
        Ok(resolution) => print_json(&resolution),
        Err(err) => {
            if let Some(diagnostic) = err.diagnostic() {
                eprintln!("{diagnostic}");
            }
            Err(err).wrap_err_with(|| format!("{} query failed", backend.name()))
        }
    }
}
