mod observer;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use moderator_contracts::{now_utc_iso, parse_debug_batch, EventWriter, RunEvent, RunSummary};
use moderator_engine::{classify_items, AssistantConfig, OpenAiAssistant, PublicBucket, WorkItem};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::observer::{emit_or_warn, ConsoleObserver};

#[derive(Debug, Parser)]
#[command(
    name = "moderator",
    version,
    about = "Classify public bucket images with an OpenAI assistant"
)]
struct Cli {
    /// Public bucket to scan.
    #[arg(long, env = "INPUT_BUCKET")]
    bucket: Option<String>,
    /// Only keys under this prefix; stripped from item ids.
    #[arg(long, env = "INPUT_PREFIX", default_value = "")]
    prefix: String,
    #[arg(long, env = "OUTPUT_PREFIX", default_value = "output/")]
    output_prefix: String,
    /// Defaults to the input bucket.
    #[arg(long, env = "OUTPUT_BUCKET")]
    output_bucket: Option<String>,
    /// S3-compatible endpoint, addressed path-style.
    #[arg(long, env = "S3_ENDPOINT")]
    s3_endpoint: Option<String>,
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
    /// Parse comma-separated raw replies and print the table; no network.
    #[arg(long, value_name = "RAW_REPLIES")]
    debug: Option<String>,
    #[arg(long)]
    no_upload: bool,
    #[arg(long)]
    verbose: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("moderator error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Some(raw) = non_empty(cli.debug.as_deref()) {
        return run_debug(raw);
    }
    let Some(bucket) = non_empty(cli.bucket.as_deref()) else {
        println!("Either --bucket or --debug must be supplied.");
        return Ok(0);
    };
    run_batch(&cli, bucket)
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("tracing subscriber already set");
    }
}

fn run_debug(raw: &str) -> Result<i32> {
    let table = parse_debug_batch(raw);
    print!("{}", table.to_csv_string()?);
    Ok(0)
}

fn run_batch(cli: &Cli, bucket_name: &str) -> Result<i32> {
    let config = AssistantConfig::from_env().context("assistant is not configured")?;
    let assistant = OpenAiAssistant::new(config);
    let input = open_bucket(bucket_name, cli.s3_endpoint.as_deref());

    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let run_id = Uuid::new_v4().to_string();
    let events = EventWriter::new(cli.out_dir.join(format!("events_{stamp}.jsonl")), &run_id);
    let started_at = now_utc_iso();
    info!(bucket = bucket_name, prefix = %cli.prefix, run_id = %run_id, "starting run");
    emit_or_warn(
        &events,
        &RunEvent::RunStarted {
            bucket: bucket_name.to_string(),
            prefix: cli.prefix.clone(),
        },
    );

    let keys = input
        .list_keys(&cli.prefix)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed listing bucket {bucket_name}"))?;
    info!(count = keys.len(), "listed objects");
    let items = keys
        .iter()
        .map(|key| work_item(&input, &cli.prefix, key));

    let mut observer = ConsoleObserver::stdout(events.clone());
    let outcome = classify_items(&assistant, items, &mut observer);

    let files = output::write_results(&outcome.table, &cli.out_dir, &stamp)?;
    let summary = RunSummary {
        run_id,
        started_at,
        finished_at: now_utc_iso(),
        processed: outcome.table.len() as u64,
        skipped: outcome.skipped as u64,
        skipped_items: outcome.skipped_items,
        alerts: outcome.alerts as u64,
        notifications: outcome.notifications as u64,
        outputs: files.names(),
    };
    println!("{}", summary.render());
    emit_or_warn(&events, &RunEvent::RunFinished { summary });

    if !cli.no_upload {
        let target = match non_empty(cli.output_bucket.as_deref()) {
            Some(name) => open_bucket(name, cli.s3_endpoint.as_deref()),
            None => input,
        };
        output::upload_results(&target, &files.json, &cli.output_prefix, &events);
    }
    Ok(0)
}

fn open_bucket(name: &str, endpoint: Option<&str>) -> PublicBucket {
    match non_empty(endpoint) {
        Some(endpoint) => PublicBucket::with_endpoint(
            name,
            format!("{}/{name}", endpoint.trim_end_matches('/')),
        ),
        None => PublicBucket::new(name),
    }
}

/// Item ids drop the listing prefix; the URL always addresses the full key.
fn work_item(bucket: &PublicBucket, prefix: &str, key: &str) -> WorkItem {
    let id = key.strip_prefix(prefix).unwrap_or(key);
    WorkItem::new(id, bucket.object_url(key))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}
