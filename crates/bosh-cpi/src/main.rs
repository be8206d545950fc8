mod cloud;
mod dispatch;
mod protocol;

use anyhow::{Context, Result};
use bosh_cpi_cloud::{CancellationFlag, CpiError};
use clap::{Parser, Subcommand};
use protocol::{CpiRequest, CpiResponse, Failure};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{Instrument, error, info_span, warn};

#[derive(Parser)]
#[command(name = "cpi")]
#[command(about = "BOSH external CPI for QingCloud and HwCloud", long_about = None)]
#[command(
    after_help = "Without a subcommand, one JSON request is read from stdin and the response written to stdout."
)]
struct Cli {
    /// CPI options file (YAML or JSON)
    #[arg(short, long, global = true, env = "BOSH_CPI_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the CPI methods this binary answers
    Info,
    /// Load and validate the options file
    Validate,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries the response, logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(false)
        .init();

    match cli.command {
        Some(Commands::Version) => {
            println!("bosh-cpi {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Info) => {
            for method in dispatch::METHODS {
                println!("{method}");
            }
            Ok(())
        }
        Some(Commands::Validate) => validate(cli.config.as_deref()),
        None => serve(cli.config.as_deref()).await,
    }
}

fn validate(path: Option<&std::path::Path>) -> Result<()> {
    let path = bosh_cpi_config::find_config_file(path)?;
    let config = bosh_cpi_config::load_config(&path)
        .with_context(|| format!("invalid options file {}", path.display()))?;
    let common = config.cloud.common();

    println!("✓ {}", path.display());
    println!("  plugin: {}", config.cloud.plugin());
    println!("  registry: {}", config.registry.endpoint);
    println!(
        "  polling: every {}s, timeout {}s",
        common.wait_resource_poll_interval, common.state_timeout
    );
    Ok(())
}

/// Answer one request from stdin
async fn serve(config_path: Option<&std::path::Path>) -> Result<()> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("failed to read request")?;

    let response = match serde_json::from_str::<CpiRequest>(&input) {
        Ok(request) => {
            let span = info_span!(
                "cpi",
                method = %request.method,
                request_id = %request_id(&request.context)
            );
            handle(config_path, &request).instrument(span).await
        }
        Err(e) => {
            error!("Malformed request: {}", e);
            CpiResponse::failure(&Failure::Cpi(CpiError::InvalidArgument(format!(
                "malformed request: {e}"
            ))))
        }
    };

    let mut output = serde_json::to_vec(&response)?;
    output.push(b'\n');
    let mut stdout = tokio::io::stdout();
    stdout.write_all(&output).await?;
    stdout.flush().await?;
    Ok(())
}

async fn handle(config_path: Option<&std::path::Path>, request: &CpiRequest) -> CpiResponse {
    if !dispatch::METHODS.contains(&request.method.as_str()) {
        return CpiResponse::failure(&Failure::NotImplemented(request.method.clone()));
    }

    let config = match bosh_cpi_config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            return CpiResponse::failure(&Failure::Cpi(CpiError::InvalidArgument(
                e.to_string(),
            )));
        }
    };

    let cancel = CancellationFlag::new();
    watch_signals(cancel.clone());

    let manager = match cloud::manager(&config, Arc::new(cancel)) {
        Ok(manager) => manager,
        Err(e) => {
            error!("Failed to initialize: {:#}", e);
            return CpiResponse::failure(&Failure::Cpi(CpiError::CloudError(format!("{e:#}"))));
        }
    };

    match dispatch::dispatch(&manager, request).await {
        Ok(result) => CpiResponse::success(result),
        Err(failure) => {
            error!("{} failed: {:?}", request.method, failure);
            CpiResponse::failure(&failure)
        }
    }
}

fn request_id(context: &Value) -> String {
    context
        .get("request_id")
        .and_then(Value::as_str)
        .unwrap_or("-")
        .to_string()
}

/// Flip the cancellation flag on Ctrl-C or SIGTERM
fn watch_signals(cancel: CancellationFlag) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("Cannot watch SIGTERM: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        warn!("Interrupted, cancelling the current task");
        cancel.cancel();
    });
}
