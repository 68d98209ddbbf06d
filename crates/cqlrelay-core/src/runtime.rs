// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for cqlrelay.
//!
//! This module provides [`ProxyRuntime`] which wires the reconnection
//! machine, the client server and the control server together. The
//! standalone binary uses it, and products embedding the proxy into an
//! existing tokio application can drive it directly with their own
//! cluster driver.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cqlrelay_core::config::Config;
//! use cqlrelay_core::driver::MemoryDriver;
//! use cqlrelay_core::runtime::ProxyRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let runtime = ProxyRuntime::builder()
//!         .config(config)
//!         .driver(Arc::new(MemoryDriver::new()))
//!         .start()
//!         .await?;
//!
//!     runtime.wait_for_shutdown().await;
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::control::{ControlPlane, DbStatus};
use crate::driver::{ClusterDriver, ConnectOptions};
use crate::reconnect::Reconnector;
use crate::schema_cache::ClusterSchemaCache;
use crate::server::{ServerError, bind_listener, run_client_server, run_control_server};
use crate::worker::ProxyState;

/// Builder for creating a [`ProxyRuntime`].
#[derive(Default)]
pub struct ProxyRuntimeBuilder {
    config: Option<Config>,
    driver: Option<Arc<dyn ClusterDriver>>,
}

impl std::fmt::Debug for ProxyRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyRuntimeBuilder")
            .field("config", &self.config)
            .field("driver", &self.driver.as_ref().map(|_| "..."))
            .finish()
    }
}

impl ProxyRuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration (required).
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the cluster driver (required).
    pub fn driver(mut self, driver: Arc<dyn ClusterDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Bind the listeners and start every component.
    pub async fn start(self) -> Result<ProxyRuntime> {
        let config = self.config.context("ProxyRuntimeBuilder requires a config")?;
        let driver = self.driver.context("ProxyRuntimeBuilder requires a driver")?;

        let control = Arc::new(ControlPlane::new());
        let connect_opts = ConnectOptions::from_config(&config);
        let schema_cache = Arc::new(ClusterSchemaCache::new());

        let (session_tx, session_rx) = watch::channel(None);
        let (reconnect_tx, reconnect_rx) = mpsc::channel(64);

        let state = Arc::new(ProxyState {
            driver: driver.clone(),
            connect_opts: connect_opts.clone(),
            session_rx,
            schema_cache,
            reconnect_tx,
        });

        let reconnector = Reconnector::new(
            driver,
            connect_opts,
            session_tx,
            reconnect_rx,
            control.clone(),
        );
        let reconnect_task = tokio::spawn(reconnector.run(control.subscribe_shutdown()));

        // Bind before spawning so a bad address is a startup error, and
        // tests binding port 0 can learn the real one.
        let client_listener = bind_listener(config.listen_addr, config.max_pending_connections)?;
        let client_addr = client_listener.local_addr().map_err(ServerError::Bind)?;
        let client_task = tokio::spawn(run_client_server(
            client_listener,
            state.clone(),
            control.subscribe_shutdown(),
            config.max_connections,
        ));

        let control_listener = bind_listener(config.control_addr, 16)?;
        let control_addr = control_listener.local_addr().map_err(ServerError::Bind)?;
        let control_task = tokio::spawn(run_control_server(
            control_listener,
            control.clone(),
            control.subscribe_shutdown(),
        ));

        info!(%client_addr, %control_addr, "cqlrelay runtime started");

        Ok(ProxyRuntime {
            control,
            state,
            client_addr,
            control_addr,
            reconnect_task,
            client_task,
            control_task,
        })
    }
}

/// A running proxy: reconnector plus both servers.
pub struct ProxyRuntime {
    control: Arc<ControlPlane>,
    state: Arc<ProxyState>,
    client_addr: SocketAddr,
    control_addr: SocketAddr,
    reconnect_task: JoinHandle<()>,
    client_task: JoinHandle<std::result::Result<(), ServerError>>,
    control_task: JoinHandle<std::result::Result<(), ServerError>>,
}

impl ProxyRuntime {
    pub fn builder() -> ProxyRuntimeBuilder {
        ProxyRuntimeBuilder::new()
    }

    /// The bound client listen address.
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// The bound control-plane address.
    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    /// Shared control-plane state.
    pub fn control(&self) -> Arc<ControlPlane> {
        self.control.clone()
    }

    /// Shared worker state (driver, session, schema cache).
    pub fn state(&self) -> Arc<ProxyState> {
        self.state.clone()
    }

    /// Wait until the database link is up.
    pub async fn wait_for_db_ready(&self) {
        let mut status = self.control.subscribe_status();
        while *status.borrow() != DbStatus::Ready {
            if status.changed().await.is_err() {
                return;
            }
        }
    }

    /// Wait until shutdown has been requested (control-plane `STOP` or
    /// a direct [`ControlPlane::request_shutdown`] call).
    pub async fn wait_for_shutdown(&self) {
        let mut shutdown = self.control.subscribe_shutdown();
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stop every component and wait for them to drain.
    pub async fn shutdown(self) -> Result<()> {
        info!("shutting down cqlrelay runtime");
        self.control.broadcast("QUITTING");
        self.control.request_shutdown();

        if let Err(e) = self.reconnect_task.await {
            error!(error = %e, "reconnector task panicked");
        }
        match self.client_task.await {
            Ok(result) => result.context("client server failed")?,
            Err(e) => error!(error = %e, "client server task panicked"),
        }
        match self.control_task.await {
            Ok(result) => result.context("control server failed")?,
            Err(e) => error!(error = %e, "control server task panicked"),
        }
        info!("cqlrelay runtime stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;

    fn test_config() -> Config {
        Config {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            control_addr: "127.0.0.1:0".parse().unwrap(),
            cassandra_hosts: vec!["localhost".to_string()],
            cassandra_port: 9042,
            use_ssl: false,
            max_pending_connections: 16,
            max_connections: 0,
            schema_paths: Vec::new(),
            keyspace: "cqlrelay".to_string(),
            replication_factor: 1,
            driver: "memory".to_string(),
        }
    }

    #[tokio::test]
    async fn test_builder_requires_config_and_driver() {
        assert!(ProxyRuntime::builder().start().await.is_err());
        assert!(
            ProxyRuntime::builder()
                .config(test_config())
                .start()
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_runtime_start_and_shutdown() {
        let runtime = ProxyRuntime::builder()
            .config(test_config())
            .driver(Arc::new(MemoryDriver::new()))
            .start()
            .await
            .unwrap();

        assert!(runtime.client_addr().port() > 0);
        assert!(runtime.control_addr().port() > 0);
        runtime.wait_for_db_ready().await;

        runtime.control().request_shutdown();
        runtime.shutdown().await.unwrap();
    }
}
