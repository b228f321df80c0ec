//! # ripple
//!
//! Broadcast relay binary: loads settings, starts logging and metrics, then
//! serves the relay until Ctrl-C.

#![deny(unsafe_code)]

mod telemetry;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ripple_server::config::ServerConfig;
use ripple_server::metrics::install_recorder;
use ripple_server::server::RippleServer;
use ripple_settings::{LogLevel, RippleSettings};

/// Ripple broadcast relay.
#[derive(Parser, Debug)]
#[command(name = "ripple", about = "WebSocket broadcast relay")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `$RIPPLE_HOME/settings.json` or `~/.ripple/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level: trace, debug, info, warn or error (overrides settings).
    #[arg(long, value_parser = parse_log_level)]
    log_level: Option<LogLevel>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

fn parse_log_level(val: &str) -> std::result::Result<LogLevel, String> {
    LogLevel::parse(val).ok_or_else(|| format!("unknown log level '{val}'"))
}

impl Cli {
    /// Apply command-line flags on top of loaded settings.
    fn apply(&self, settings: &mut RippleSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level;
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }

    fn settings_path(&self) -> PathBuf {
        self.settings
            .clone()
            .unwrap_or_else(ripple_settings::settings_path)
    }
}

fn load(cli: &Cli) -> Result<RippleSettings> {
    let loaded = match cli.settings {
        Some(ref path) => ripple_settings::load_settings_from_path(path),
        None => ripple_settings::load_settings(),
    };
    let mut settings = loaded.with_context(|| {
        format!("Failed to load settings from {}", cli.settings_path().display())
    })?;
    cli.apply(&mut settings);
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    telemetry::init_subscriber(&settings.logging);
    let metrics_handle = install_recorder().context("Failed to install metrics recorder")?;

    let config = ServerConfig::from_settings(&settings.server);
    let server = RippleServer::new(config).with_metrics(metrics_handle);

    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;

    tracing::info!(
        "{} {} listening on ws://{addr} (chat page at http://{addr}/chat)",
        settings.name,
        settings.version
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let _ = server.shutdown().graceful_shutdown(handle, None).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
