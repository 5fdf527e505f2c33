use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use parley_server::{DuplicateIdPolicy, RelayConfig};
use parley_telemetry::TelemetryConfig;
use tracing::Level;

/// Real-time translation relay: rooms of participants sharing one
/// translation stream over WebSocket.
#[derive(Debug, Parser)]
#[command(name = "parley", version)]
struct Cli {
    /// JSON config file, merged over the defaults.
    #[arg(long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Translations replayed to new joiners.
    #[arg(long)]
    history_limit: Option<usize>,
    /// Do not send a translation back to its author.
    #[arg(long)]
    no_echo: bool,
    /// `replace` or `reject`.
    #[arg(long)]
    duplicate_ids: Option<DuplicateIdPolicy>,
    #[arg(long, default_value = "info")]
    log_level: Level,
    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn apply(&self, config: &mut RelayConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(limit) = self.history_limit {
            config.history_limit = limit;
        }
        if self.no_echo {
            config.echo_translations = false;
        }
        if let Some(policy) = self.duplicate_ids {
            config.duplicate_ids = policy;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    parley_telemetry::init_telemetry(&TelemetryConfig {
        log_level: cli.log_level,
        json: cli.log_json,
        ..Default::default()
    })?;

    let mut config = parley_server::load_config(cli.config.as_deref())
        .context("failed to load configuration")?;
    cli.apply(&mut config);

    let translator = parley_translate::from_env();
    let handle = parley_server::start(config, translator)
        .await
        .context("failed to start relay server")?;
    tracing::info!(port = handle.port, "parley ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_config() {
        let cli = Cli::parse_from([
            "parley",
            "--port",
            "4000",
            "--history-limit",
            "5",
            "--no-echo",
            "--duplicate-ids",
            "reject",
        ]);
        let mut config = RelayConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.port, 4000);
        assert_eq!(config.history_limit, 5);
        assert!(!config.echo_translations);
        assert_eq!(config.duplicate_ids, DuplicateIdPolicy::Reject);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn defaults_leave_config_alone() {
        let cli = Cli::parse_from(["parley"]);
        let mut config = RelayConfig::default();
        cli.apply(&mut config);
        assert!(config.echo_translations);
        assert_eq!(cli.log_level, Level::INFO);
    }
}
