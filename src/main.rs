//! CLI entry point for trialscan.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info, warn};
use trialscan_core::config::{self, PipelineConfig, load_file_config, parse_delimiter};
use trialscan_core::{
    CancellationToken, Job, build_client, read_table_from_path, write_rows_to_path,
};

mod cli;

use cli::{Args, CommonArgs};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(130),
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

/// Runs one job. Returns `Ok(false)` when the run was cancelled.
async fn run(args: Args) -> Result<bool> {
    let (job, common) = args.command.into_job();
    let config = resolve_config(&job, &common)?;
    info!(job = %job, input = %common.input.display(), "trialscan starting");

    let table = read_table_from_path(&common.input, config.input_delimiter)
        .with_context(|| format!("reading {}", common.input.display()))?;
    let key_columns = job.key_columns();
    table
        .require_columns(key_columns.iter().map(String::as_str))
        .context("input does not match the selected job")?;
    info!(records = table.records.len(), "loaded input");

    let cancel = CancellationToken::new();
    let client = build_client(&config)?.with_cancellation(cancel.clone());
    let pipeline = job.build_pipeline(&config, &client)?;

    let cancel_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("interrupt received; finishing in-flight requests (press Ctrl+C again to abort)");
        cancel_signal.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            error!("second interrupt received; aborting without writing output");
            std::process::exit(130);
        }
    });

    let report = pipeline.run(table.records, cancel.clone()).await?;

    write_rows_to_path(
        &common.output,
        pipeline.key_columns(),
        &report.rows,
        config.delimiter,
    )
    .with_context(|| format!("writing {}", common.output.display()))?;

    let stats = client.stats();
    info!(
        records = report.summary.records,
        found = report.summary.found,
        not_found = report.summary.not_found,
        errors = report.summary.errors,
        cancelled = report.summary.cancelled,
        requests = stats.requests(),
        retries = stats.retries(),
        failed_requests = stats.failures(),
        unreadable_responses = stats.unreadable(),
        "run complete"
    );

    if report.cancelled {
        warn!(
            cancelled = report.summary.cancelled,
            "Run was cancelled; unstarted records are marked cancelled."
        );
    }
    Ok(!report.cancelled)
}

/// Layers defaults, config file, environment and CLI flags, then validates.
fn resolve_config(job: &Job, common: &CommonArgs) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::default();

    let (path, optional) = match &common.config {
        Some(path) => (Some(path.clone()), false),
        None => (config::resolve_default_config_path(), true),
    };
    if let Some(path) = path
        && let Some(file) = load_file_config(&path, optional)?
    {
        debug!(path = %path.display(), "loaded config file");
        config.apply_file(file);
    }

    config.apply_env();

    if let Some(email) = &common.email {
        config.email = Some(email.clone());
    }
    if let Some(tool) = &common.tool {
        config.tool.clone_from(tool);
    }
    if let Some(api_key) = &common.api_key {
        config.api_key = Some(api_key.clone());
    }
    if let Some(concurrency) = common.concurrency {
        config.concurrency = usize::from(concurrency);
    }
    if let Some(max_attempts) = common.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(delimiter) = &common.delimiter {
        config.delimiter = parse_delimiter(delimiter)
            .map_err(anyhow::Error::msg)
            .context("invalid --delimiter")?;
    }
    if let Some(delimiter) = &common.input_delimiter {
        config.input_delimiter = parse_delimiter(delimiter)
            .map_err(anyhow::Error::msg)
            .context("invalid --input-delimiter")?;
    }

    config.validate(job.needs_contact())?;
    Ok(config)
}
