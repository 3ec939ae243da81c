//! `chatbridge` binary entrypoint.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chatbridge_config::load_config;
use chatbridge_gateway::{build_relay, GatewayServer};
use chatbridge_telemetry::{init_subscriber, TelemetryConfig};
use clap::Parser;

/// OpenAI-compatible gateway for the akash chat service
#[derive(Parser, Debug)]
#[command(name = "chatbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: chatbridge.{jsonc,json,yml,yaml} discovery)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Log filter directive, e.g. `debug` or `chatbridge_upstream=trace,info`
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let resolved = load_config(cli.config.as_deref())?;
    let mut config = resolved.config;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    init_subscriber(&TelemetryConfig {
        level: cli.log_level.unwrap_or_else(|| config.logging.level.clone()),
        json_output: cli.log_json || config.logging.json_output,
    })
    .context("failed to install tracing subscriber")?;

    match &resolved.path {
        Some(path) => tracing::info!(path = %path.display(), "loaded configuration"),
        None => tracing::info!("no configuration file found, using defaults"),
    }

    let relay = Arc::new(build_relay(&config)?);
    let refresher = relay.credentials().spawn_background_refresh();

    let server = GatewayServer::new(relay).with_api_key(config.server.api_key.clone());
    let result = server
        .start(&config.server.host, config.server.port, shutdown_signal())
        .await;

    refresher.abort();
    result.context("gateway server failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
