// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Control-plane TCP server.
//!
//! Speaks a newline-delimited text protocol with the process supervisor
//! and other control peers. Inbound commands query database status,
//! request shutdown or acknowledge lifecycle events; outbound lines are
//! the `NOCASSANDRA`/`CASSANDRAREADY` announcements broadcast by the
//! reconnection machine plus `REGISTER`/`UNREGISTER` bracketing each
//! peer connection.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::client_server::ServerError;
use crate::control::{ControlPlane, DbStatus};

/// Commands answered by the control server, for `HELP`.
const COMMANDS: &str = "CASSANDRASTATUS,HELP,LOG,QUITTING,READY,RELOADCONFIG,STOP";

/// Run the control server until shutdown.
#[instrument(skip(listener, control, shutdown))]
pub async fn run_control_server(
    listener: TcpListener,
    control: Arc<ControlPlane>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let addr = listener.local_addr()?;
    info!(%addr, "control server running");

    let mut peers: JoinSet<()> = JoinSet::new();

    loop {
        while peers.try_join_next().is_some() {}

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "control peer connected");
                        let control = control.clone();
                        let peer_shutdown = shutdown.clone();
                        peers.spawn(async move {
                            handle_control_peer(stream, control, peer_shutdown).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept control connection");
                    }
                }
            }
        }
    }

    while peers.join_next().await.is_some() {}
    info!("control server stopped");
    Ok(())
}

async fn handle_control_peer(
    stream: tokio::net::TcpStream,
    control: Arc<ControlPlane>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut announcements = control.register_peer();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // Bracket the peer's view of this process.
    if send_line(&mut write_half, "REGISTER cqlrelay").await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = send_line(&mut write_half, "UNREGISTER cqlrelay").await;
                    break;
                }
            }
            announcement = announcements.recv() => {
                match announcement {
                    Some(line) => {
                        if send_line(&mut write_half, &line).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if let Some(reply) = handle_command(line.trim(), &control) {
                            if send_line(&mut write_half, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("control peer disconnected");
                        break;
                    }
                    Err(e) => {
                        debug!(error = %e, "control peer read failed");
                        break;
                    }
                }
            }
        }
    }
}

async fn send_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Handle one inbound control command; `Some` is the reply line.
fn handle_command(line: &str, control: &ControlPlane) -> Option<String> {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or("");
    match command {
        "" => None,
        "CASSANDRASTATUS" => Some(
            match control.db_status() {
                DbStatus::Ready => "CASSANDRAREADY",
                DbStatus::Down => "NOCASSANDRA",
            }
            .to_string(),
        ),
        "READY" => {
            debug!("control plane confirmed registration");
            None
        }
        "HELP" => Some(format!("COMMANDS {COMMANDS}")),
        "STOP" | "QUITTING" => {
            control.request_shutdown();
            None
        }
        "LOG" => {
            info!("log rotation requested");
            None
        }
        "RELOADCONFIG" => {
            warn!("configuration reload requires a restart");
            None
        }
        other => Some(format!("UNKNOWN {other}")),
    }
}
