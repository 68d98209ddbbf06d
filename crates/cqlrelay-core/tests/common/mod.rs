// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared harness for end-to-end proxy tests.

use std::sync::Arc;

use cqlrelay_core::config::Config;
use cqlrelay_core::driver::MemoryDriver;
use cqlrelay_core::driver::memory::MemoryCluster;
use cqlrelay_core::runtime::ProxyRuntime;

/// A proxy bound to loopback ports with the in-process driver.
pub struct TestProxy {
    pub runtime: ProxyRuntime,
    pub cluster: Arc<MemoryCluster>,
}

pub fn test_config() -> Config {
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

/// Start a proxy, mark it ready, and wait for the database link.
pub async fn start_proxy() -> TestProxy {
    let driver = MemoryDriver::new();
    let cluster = driver.cluster();
    let runtime = ProxyRuntime::builder()
        .config(test_config())
        .driver(Arc::new(driver))
        .start()
        .await
        .expect("proxy start");
    runtime.control().mark_process_ready();
    runtime.wait_for_db_ready().await;
    TestProxy { runtime, cluster }
}
