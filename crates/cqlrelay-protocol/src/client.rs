// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TCP client for talking to a running cqlrelay proxy.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::frame::{FrameError, FramedStream};
use crate::order::Order;
use crate::result::OrderResult;

/// Errors that can occur in the proxy client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("connection timed out after {0}ms")]
    Timeout(u64),
}

/// Configuration for the proxy client.
#[derive(Debug, Clone)]
pub struct ProxyClientConfig {
    /// Proxy address to connect to.
    pub server_addr: SocketAddr,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for ProxyClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:4042".parse().unwrap(),
            connect_timeout_ms: 10_000,
        }
    }
}

/// Client for the cqlrelay order protocol.
///
/// One client maps to one proxy connection; orders sent through it are a
/// strict request/response sequence, which is exactly the per-connection
/// ordering the proxy guarantees. The connection is established lazily on
/// first use and re-established after a transport failure.
pub struct ProxyClient {
    config: ProxyClientConfig,
    connection: Mutex<Option<FramedStream<TcpStream>>>,
}

impl ProxyClient {
    /// Create a client; no connection is opened yet.
    pub fn new(config: ProxyClientConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    /// Client for a proxy at the given address with default timeouts.
    pub fn connect_to(server_addr: SocketAddr) -> Self {
        Self::new(ProxyClientConfig {
            server_addr,
            ..Default::default()
        })
    }

    async fn open_stream(&self) -> Result<FramedStream<TcpStream>, ClientError> {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        debug!(addr = %self.config.server_addr, "connecting to proxy");
        let stream = tokio::time::timeout(timeout, TcpStream::connect(self.config.server_addr))
            .await
            .map_err(|_| ClientError::Timeout(self.config.connect_timeout_ms))??;
        stream.set_nodelay(true)?;
        Ok(FramedStream::new(stream))
    }

    /// Send one order and return its result.
    ///
    /// Blocking orders wait for the proxy's result frame; non-blocking
    /// orders return a successful empty result once written. On a
    /// transport failure the cached connection is dropped so the next
    /// call reconnects.
    #[instrument(skip(self, order), fields(kind = ?order.kind))]
    pub async fn send_order(&self, order: &Order) -> Result<OrderResult, ClientError> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.open_stream().await?);
        }
        let stream = guard.as_mut().expect("connection just established");
        match stream.send_order(order).await {
            Ok(result) => Ok(result),
            Err(e) => {
                // The channel is gone or desynchronized; start fresh next time.
                *guard = None;
                Err(e.into())
            }
        }
    }

    /// Whether a connection is currently cached.
    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// Drop the connection; the next order reconnects.
    pub async fn close(&self) {
        self.connection.lock().await.take();
    }
}
