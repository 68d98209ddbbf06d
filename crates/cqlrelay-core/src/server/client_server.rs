// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client acceptor and worker pool.
//!
//! Accepts order connections and runs one [`ConnectionWorker`] task per
//! socket. Finished workers are reaped opportunistically before each
//! accept, never on a timer, so lifecycle bookkeeping can't stall the
//! accept loop. On shutdown every worker observes the same signal,
//! abandons its pending read and exits; the pool then drains.

use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::worker::{ConnectionWorker, ProxyState};

/// Errors that can occur in the TCP servers
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind error: {0}")]
    Bind(#[from] std::io::Error),
}

/// Build a TCP listener with the configured accept backlog.
///
/// The backlog is the "max pending connections" knob: sockets the kernel
/// holds while every worker slot is busy accepting.
pub fn bind_listener(bind_addr: SocketAddr, backlog: u32) -> Result<TcpListener, ServerError> {
    let domain = if bind_addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&bind_addr.into())?;
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;
    socket.set_nonblocking(true)?;
    let std_listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(std_listener)?)
}

/// Run the client server until shutdown.
///
/// `max_connections` caps concurrent workers (0 = unlimited); excess
/// connections wait on the semaphore inside their own task so the accept
/// loop never blocks.
#[instrument(skip(listener, state, shutdown))]
pub async fn run_client_server(
    listener: TcpListener,
    state: Arc<ProxyState>,
    mut shutdown: watch::Receiver<bool>,
    max_connections: u32,
) -> Result<(), ServerError> {
    let addr = listener.local_addr()?;
    info!(%addr, max_connections, "client server running");

    let semaphore = if max_connections > 0 {
        Some(Arc::new(Semaphore::new(max_connections as usize)))
    } else {
        None
    };

    let mut workers: JoinSet<()> = JoinSet::new();

    loop {
        // Opportunistic reaping before handling the next connection.
        while workers.try_join_next().is_some() {}

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        debug!(%peer, "accepted client connection");
                        let state = state.clone();
                        let worker_shutdown = shutdown.clone();
                        let semaphore = semaphore.clone();
                        workers.spawn(async move {
                            let _permit = match semaphore {
                                Some(sem) => match sem.acquire_owned().await {
                                    Ok(permit) => Some(permit),
                                    Err(_) => {
                                        warn!("semaphore closed, dropping connection");
                                        return;
                                    }
                                },
                                None => None,
                            };
                            ConnectionWorker::new(stream, state).run(worker_shutdown).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                    }
                }
            }
        }
    }

    // Workers exit on their own once they observe the shutdown signal.
    debug!(live = workers.len(), "draining workers");
    while workers.join_next().await.is_some() {}
    info!("client server stopped");
    Ok(())
}
