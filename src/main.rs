//! CLI entry point for the blobfetch tool.

use std::io::{self, IsTerminal, Read};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use blobfetch_core::fetch::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, EngineError, FetchConfig, FetchEngine, ProgressSink,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod output;
mod progress;
mod template;

use cli::Args;
use output::ProcessExit;
use progress::BarSink;
use template::{UrlTemplate, parse_content_ids};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(exit) => ExitCode::from(exit.code()),
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ProcessExit> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    init_tracing(&args);
    debug!(?args, "CLI arguments parsed");

    let file_config = app_config::load_default_file_config()?;
    debug!(?file_config, "file configuration loaded");

    // Read input: from positional args or stdin
    let input_text = if !args.ids.is_empty() {
        args.ids.join("\n")
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read content ids from stdin")?;
        buffer
    } else {
        String::new()
    };

    let ids = parse_content_ids(&input_text);
    if ids.is_empty() {
        info!("No content ids provided. Pass them as arguments or pipe them via stdin.");
        return Ok(ProcessExit::Success);
    }

    let template = args
        .url_template
        .as_deref()
        .or(file_config.url_template.as_deref())
        .ok_or_else(|| {
            anyhow!("No URL template: pass --url-template or set url_template in the config file")
        })
        .and_then(UrlTemplate::parse)?;

    let defaults = FetchConfig::default();
    let config = FetchConfig {
        base_concurrency: args
            .concurrency
            .or(file_config.concurrency)
            .map_or(DEFAULT_CONCURRENCY, usize::from),
        max_retries: args
            .max_retries
            .or(file_config.max_retries)
            .map_or(DEFAULT_MAX_RETRIES, u32::from),
        connect_timeout_secs: file_config
            .connect_timeout_secs
            .unwrap_or(defaults.connect_timeout_secs),
        read_timeout_secs: file_config
            .read_timeout_secs
            .unwrap_or(defaults.read_timeout_secs),
        ..defaults
    };

    let sink = Arc::new(BarSink::new(ids.len(), args.quiet || args.json));
    let engine = FetchEngine::new(config)?.with_sink(Arc::clone(&sink) as Arc<dyn ProgressSink>);

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after in-flight requests are abandoned");
            signal.cancel();
        }
    });

    info!(items = ids.len(), "fetching");
    let outcome = engine
        .run(ids, |cid| template.expand(cid), &cancel)
        .await;
    sink.finish();

    let report = match outcome {
        Ok(report) => report,
        Err(EngineError::Cancelled(report)) => {
            warn!(settled = report.settled(), total = report.len(), "run interrupted");
            *report
        }
        Err(error) => return Err(error.into()),
    };

    if let Some(output_dir) = args.output_dir.as_ref().or(file_config.output_dir.as_ref()) {
        let written = output::write_payloads(&report, output_dir).await?;
        info!(written, output_dir = %output_dir.display(), "payloads written");
    }

    if args.json {
        println!("{}", output::render_json_summary(&report)?);
    } else if !args.quiet {
        println!("{}", output::render_text_summary(&report));
    }

    Ok(output::determine_exit_outcome(&report))
}

fn init_tracing(args: &Args) {
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

    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .try_init();
}
