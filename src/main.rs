// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Edge mapper daemon.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use edge_mapper::app::Mapper;
use edge_mapper::config::Config;
use edge_mapper::driver::DriverRegistry;

#[derive(Parser, Debug)]
#[command(author, version, about = "Keeps edge devices in sync with their digital twins", long_about = None)]
struct Args {
    /// Configuration file.
    #[arg(short, long, env = "EDGE_MAPPER_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// Enable debug logging when `RUST_LOG` is not set.
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(args: &Args) {
    let fallback = if args.verbose {
        "edge_mapper=debug"
    } else {
        "edge_mapper=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[cfg(unix)]
async fn terminate_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn terminate_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let sinks = edge_mapper::sink::build(&config.sinks, &config.db_methods)
        .context("building telemetry sinks")?;

    tracing::info!(
        mapper = %config.common.name,
        version = %config.common.version,
        protocol = %config.common.protocol,
        "Starting edge mapper"
    );

    let mapper = Mapper::new(config, DriverRegistry::with_builtin(), sinks);
    if let Err(e) = mapper.start().await {
        mapper.shutdown().await;
        return Err(e).context("starting mapper");
    }

    terminate_signal().await.context("waiting for shutdown signal")?;
    tracing::info!("Shutdown requested");

    tokio::select! {
        () = mapper.shutdown() => {}
        _ = terminate_signal() => {
            tracing::warn!("Second signal received, exiting immediately");
            std::process::exit(130);
        }
    }

    Ok(())
}
