//! SafeGuard daemon
//!
//! Runs the core over in-memory stores with the retention reaper in the
//! background. Requests are read from stdin as JSON lines of the form
//! `{"principal": {...}, "request": {...}}`; one JSON response line is written
//! to stdout per request. Ctrl-C stops the daemon.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;

use safeguard::telemetry::init_tracing;
use safeguard::{
    EngineResponse, EngineRuntime, Principal, SafeguardConfig, SafeguardEngine, SafeguardIR,
    TracingGateway,
};

#[derive(Parser, Debug)]
#[command(name = "safeguard-daemon")]
#[command(about = "SafeGuard core daemon", long_about = None)]
struct Cli {
    /// JSON config file; built-in defaults when omitted
    #[arg(short, long, env = "SAFEGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Default log level for this crate (RUST_LOG overrides)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Deserialize)]
struct RequestLine {
    principal: Principal,
    request: SafeguardIR,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ResponseLine {
    Ok {
        request_id: Option<uuid::Uuid>,
        response: EngineResponse,
    },
    Error {
        request_id: Option<uuid::Uuid>,
        error: String,
        retryable: bool,
    },
}

fn handle_line(runtime: &EngineRuntime, line: &str) -> ResponseLine {
    let parsed: RequestLine = match serde_json::from_str(line) {
        Ok(p) => p,
        Err(e) => {
            return ResponseLine::Error {
                request_id: None,
                error: format!("malformed request: {e}"),
                retryable: false,
            }
        }
    };
    let request_id = Some(parsed.request.request_id);
    match runtime.execute(parsed.principal, parsed.request) {
        Ok(response) => ResponseLine::Ok { request_id, response },
        Err(e) => ResponseLine::Error {
            request_id,
            retryable: e.is_retryable(),
            error: e.to_string(),
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = match &cli.config {
        Some(path) => SafeguardConfig::from_path(path)?,
        None => SafeguardConfig::default(),
    };
    config.validate()?;

    let engine = SafeguardEngine::in_memory(Arc::new(TracingGateway), config.clone());
    let reaper = engine.reaper().spawn(config.reaper_interval())?;
    let runtime = Arc::new(EngineRuntime::new(engine, &config.runtime)?);

    tracing::info!(
        retention_secs = config.retention_window_secs,
        reaper_interval_secs = config.reaper_interval_secs,
        "safeguard daemon ready"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::info!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let rt = Arc::clone(&runtime);
                let out = tokio::task::spawn_blocking(move || handle_line(&rt, &line)).await?;
                let mut encoded = serde_json::to_vec(&out)?;
                encoded.push(b'\n');
                stdout.write_all(&encoded).await?;
                stdout.flush().await?;
            }
        }
    }

    reaper.shutdown();
    Ok(())
}
