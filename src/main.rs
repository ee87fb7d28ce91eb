//! airstream - play local media on AirPlay receivers
//!
//! # Usage
//!
//! ```bash
//! airstream "Living Room" ~/Music/StairwayToHeaven.mp3
//! airstream --list --json
//! ```

use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use airstream::cli::{Cli, ExitCode, Output};
use airstream::commands;
use airstream::config::Config;
use airstream::discovery::{DeviceRegistry, MdnsEventSource, AIRPLAY_SERVICE_TYPE};
use airstream::logging;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    run(cli).await.into()
}

async fn run(cli: Cli) -> ExitCode {
    let output = Output::new(&cli);

    let config = match &cli.config {
        Some(path) => match Config::load_from(path) {
            Ok(config) => config,
            Err(e) => return output.fail(format!("{:#}", e), ExitCode::InvalidArgs),
        },
        None => Config::load(),
    };

    let wait = cli
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.discovery_timeout());

    let source = match MdnsEventSource::browse(AIRPLAY_SERVICE_TYPE) {
        Ok(source) => source,
        Err(e) => return output.fail(e.to_string(), ExitCode::NetworkError),
    };
    let registry = DeviceRegistry::spawn(source);

    let code = if cli.list {
        commands::list_cmd(&registry, wait, &output).await
    } else {
        match cli.play_request(config.default_device().as_deref()) {
            Some((device, paths)) => {
                let cancel = CancellationToken::new();
                watch_ctrl_c(cancel.clone());
                commands::play_cmd(&device, &paths, &registry, &config, wait, cancel, &output)
                    .await
            }
            None => commands::usage_error(&registry, wait, &output).await,
        }
    };

    registry.shutdown().await;
    code
}

/// Cancel `token` on Ctrl-C so the current session tears down cleanly
fn watch_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                debug!("Interrupted, cancelling playback");
                token.cancel();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });
}
