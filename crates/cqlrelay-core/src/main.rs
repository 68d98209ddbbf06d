// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! cqlrelay - CQL Database Proxy
//!
//! The proxy is responsible for:
//! - Multiplexing client order connections onto shared cluster sessions
//! - Server-side cursors and batches
//! - Cluster schema caching and reconnection under failure
//!
//! Schema bootstrap runs before any client traffic is accepted; the
//! control plane is told the process is ready only once it completes.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cqlrelay_core::config::Config;
use cqlrelay_core::driver::{ConnectOptions, driver_from_config};
use cqlrelay_core::runtime::ProxyRuntime;
use cqlrelay_core::schema_init::{LocalLock, SchemaInitializer, load_definitions};

#[derive(Parser, Debug)]
#[command(name = "cqlrelay", version, about = "CQL database proxy")]
struct Cli {
    /// Configuration file in .env format
    #[arg(short = 'c', long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(long)]
    debug: bool,

    /// Append logs to this file instead of stderr
    #[arg(short = 'l', long, value_name = "PATH")]
    logfile: Option<PathBuf>,

    /// Disable logging entirely
    #[arg(short = 'n', long)]
    nolog: bool,
}

fn init_tracing(cli: &Cli) -> Result<()> {
    if cli.nolog {
        return Ok(());
    }
    let default_directive = if cli.debug {
        "cqlrelay_core=debug,cqlrelay_protocol=debug"
    } else {
        "cqlrelay_core=info"
    };
    let filter = EnvFilter::from_default_env().add_directive(
        default_directive
            .parse()
            .unwrap_or_else(|_| "info".parse().unwrap()),
    );
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &cli.logfile {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open logfile {}", path.display()))?;
            builder.with_writer(file).with_ansi(false).init();
        }
        None => builder.init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The supervisor treats a non-zero exit as restart-worthy.
            eprintln!("cqlrelay: fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Load the .env-style config file (explicit path wins).
    match &cli.config {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("cannot read config file {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    init_tracing(&cli)?;

    info!("Starting cqlrelay");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        anyhow::Error::from(e)
    })?;

    info!(
        listen = %config.listen_addr,
        control = %config.control_addr,
        hosts = ?config.cassandra_hosts,
        port = config.cassandra_port,
        ssl = config.use_ssl,
        "Configuration loaded"
    );

    let driver = driver_from_config(&config).context("cluster driver")?;

    // Ensure the managed schema exists before accepting any traffic.
    let definitions = load_definitions(&config.schema_paths)?;
    if definitions.is_empty() {
        info!("no table definitions found, skipping schema bootstrap");
    } else {
        info!(tables = definitions.len(), "running schema bootstrap");
        let mut initializer = SchemaInitializer::new(
            driver.clone(),
            ConnectOptions::from_config(&config),
            config.keyspace.clone(),
            config.replication_factor,
            definitions,
            Arc::new(LocalLock::new()),
        );
        initializer.run().await?;
    }

    let runtime = ProxyRuntime::builder()
        .config(config)
        .driver(driver)
        .start()
        .await?;

    // Ready to serve: from here on a database-ready transition is
    // announced on the control plane.
    runtime.control().mark_process_ready();
    info!("cqlrelay initialized successfully");

    tokio::select! {
        _ = runtime.wait_for_shutdown() => {
            info!("stop requested via control plane");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for interrupt")?;
            info!("interrupt received, shutting down");
        }
    }

    runtime.shutdown().await?;
    info!("Shutdown complete");
    Ok(())
}
