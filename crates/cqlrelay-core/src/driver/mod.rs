// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster driver interfaces and backends.
//!
//! The actual cluster driver is an external collaborator; this module
//! defines the seam the proxy talks through. A session executes opaque
//! CQL text with bound blob parameters and returns rows as column blobs.
//! Sessions are created with a fixed request timeout — changing the
//! timeout means connecting a new session, which is exactly what the
//! worker does for per-statement timeouts.

pub mod memory;

pub use self::memory::MemoryDriver;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cqlrelay_protocol::order::{Consistency, Order};
use thiserror::Error;

use crate::config::Config;

/// Errors reported by a cluster driver.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    /// No cluster host could be reached. This is the session-fatal
    /// class: the shared session must be considered lost.
    #[error("no hosts available: {0}")]
    NoHostsAvailable(String),

    /// The statement itself failed; the session is still usable.
    #[error("statement failed: {0}")]
    Statement(String),

    /// Establishing a session failed.
    #[error("connect failed: {0}")]
    Connect(String),
}

impl DriverError {
    /// Whether this error invalidates the whole session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, DriverError::NoHostsAvailable(_))
    }
}

/// Options for establishing a session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub hosts: Vec<String>,
    pub port: u16,
    pub use_ssl: bool,
    /// Per-request timeout baked into the session at connect time.
    pub request_timeout: Option<Duration>,
}

impl ConnectOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            hosts: config.cassandra_hosts.clone(),
            port: config.cassandra_port,
            use_ssl: config.use_ssl,
            request_timeout: None,
        }
    }

    /// The same cluster with a different fixed request timeout.
    pub fn with_request_timeout(&self, timeout: Duration) -> Self {
        Self {
            request_timeout: Some(timeout),
            ..self.clone()
        }
    }
}

/// One row: column values as opaque blobs.
pub type Row = Vec<Vec<u8>>;

/// One statement ready for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub cql: String,
    pub parameters: Vec<Vec<u8>>,
    pub consistency: Consistency,
    pub timestamp: Option<i64>,
    pub paging_size: Option<i32>,
}

impl QuerySpec {
    /// Lift the statement attributes out of an order.
    pub fn from_order(order: &Order) -> Self {
        Self {
            cql: order.cql.clone(),
            parameters: order.parameters.clone(),
            consistency: order.consistency,
            timestamp: order.timestamp,
            paging_size: order.paging_size,
        }
    }

    /// Bare statement with no attributes, used by the schema initializer.
    pub fn statement(cql: impl Into<String>) -> Self {
        Self {
            cql: cql.into(),
            parameters: Vec::new(),
            consistency: Consistency::Default,
            timestamp: None,
            paging_size: None,
        }
    }
}

/// A live paged query owned by one cursor.
#[async_trait]
pub trait PagedRows: Send {
    /// Fetch the next page of rows. An empty page means the cursor is
    /// exhausted.
    async fn next_page(&mut self) -> Result<Vec<Row>, DriverError>;
}

/// A connected driver session.
///
/// Cheap to share (`Arc`); all methods take `&self` and may be called
/// from any worker concurrently.
#[async_trait]
pub trait ClusterSession: Send + Sync {
    /// Execute one statement and collect all resulting rows.
    async fn execute(&self, spec: &QuerySpec) -> Result<Vec<Row>, DriverError>;

    /// Execute one statement with paging; the returned handle fetches
    /// one page at a time.
    async fn execute_paged(&self, spec: &QuerySpec) -> Result<Box<dyn PagedRows>, DriverError>;

    /// Execute a logged batch atomically.
    async fn execute_batch(&self, specs: &[QuerySpec]) -> Result<(), DriverError>;

    /// Describe the cluster schema (keyspaces, tables, columns) as an
    /// opaque encoded blob.
    async fn describe_schema(&self) -> Result<Vec<u8>, DriverError>;
}

/// A cluster driver: a factory for sessions.
#[async_trait]
pub trait ClusterDriver: Send + Sync {
    async fn connect(&self, opts: &ConnectOptions)
    -> Result<Arc<dyn ClusterSession>, DriverError>;
}

/// Resolve the configured driver backend.
///
/// Production deployments bind a real cluster driver through
/// [`crate::runtime::ProxyRuntimeBuilder::driver`]; the in-tree backend
/// serves development and tests.
pub fn driver_from_config(config: &Config) -> Result<Arc<dyn ClusterDriver>, DriverError> {
    match config.driver.as_str() {
        "memory" => Ok(Arc::new(MemoryDriver::new())),
        other => Err(DriverError::Connect(format!(
            "unknown driver backend '{other}'"
        ))),
    }
}
