// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process driver backend.
//!
//! Serves development runs and tests: statements are recorded rather
//! than executed, result pages are canned per CQL text, and failures can
//! be injected to exercise the proxy's error paths. Each connect hands
//! out a distinct session id so tests can verify which session an order
//! actually ran on.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{ClusterDriver, ClusterSession, ConnectOptions, DriverError, PagedRows, QuerySpec, Row};

/// One statement the cluster saw, with the session it ran on.
#[derive(Debug, Clone)]
pub struct AppliedStatement {
    pub cql: String,
    pub parameters: Vec<Vec<u8>>,
    pub session_id: u64,
    pub request_timeout: Option<Duration>,
    pub in_batch: bool,
}

/// Shared cluster state behind every session of one [`MemoryDriver`].
#[derive(Default)]
pub struct MemoryCluster {
    canned: Mutex<HashMap<String, Vec<Vec<Row>>>>,
    applied: Mutex<Vec<AppliedStatement>>,
    schema_blob: Mutex<Option<Vec<u8>>>,
    pending_failures: Mutex<VecDeque<DriverError>>,
    schema_loads: AtomicUsize,
    connect_count: AtomicUsize,
    fail_connects: AtomicUsize,
    next_session_id: AtomicU64,
}

impl MemoryCluster {
    /// Serve `rows` as a single page for the given CQL text.
    pub fn set_rows(&self, cql: impl Into<String>, rows: Vec<Row>) {
        self.set_pages(cql, vec![rows]);
    }

    /// Serve the given pages, in order, for the given CQL text.
    pub fn set_pages(&self, cql: impl Into<String>, pages: Vec<Vec<Row>>) {
        self.canned.lock().unwrap().insert(cql.into(), pages);
    }

    /// Replace the schema description blob.
    pub fn set_schema(&self, blob: Vec<u8>) {
        *self.schema_blob.lock().unwrap() = Some(blob);
    }

    /// Fail the next statement execution with `err`.
    pub fn fail_next_statement(&self, err: DriverError) {
        self.pending_failures.lock().unwrap().push_back(err);
    }

    /// Fail the next `n` connect attempts with `NoHostsAvailable`.
    pub fn fail_connects(&self, n: usize) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Statements applied so far, in order.
    pub fn applied(&self) -> Vec<AppliedStatement> {
        self.applied.lock().unwrap().clone()
    }

    /// How many times the schema description was loaded.
    pub fn schema_loads(&self) -> usize {
        self.schema_loads.load(Ordering::SeqCst)
    }

    /// How many sessions were connected.
    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Option<DriverError> {
        self.pending_failures.lock().unwrap().pop_front()
    }

    fn pages_for(&self, cql: &str) -> Vec<Vec<Row>> {
        self.canned
            .lock()
            .unwrap()
            .get(cql)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, spec: &QuerySpec, session: &MemorySession, in_batch: bool) {
        self.applied.lock().unwrap().push(AppliedStatement {
            cql: spec.cql.clone(),
            parameters: spec.parameters.clone(),
            session_id: session.id,
            request_timeout: session.request_timeout,
            in_batch,
        });
    }
}

/// In-process cluster driver.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    cluster: Arc<MemoryCluster>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared cluster state, for test assertions and canning.
    pub fn cluster(&self) -> Arc<MemoryCluster> {
        self.cluster.clone()
    }
}

#[async_trait]
impl ClusterDriver for MemoryDriver {
    async fn connect(
        &self,
        opts: &ConnectOptions,
    ) -> Result<Arc<dyn ClusterSession>, DriverError> {
        let failing = self
            .cluster
            .fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DriverError::NoHostsAvailable(format!(
                "no contact point reachable among {:?}",
                opts.hosts
            )));
        }
        self.cluster.connect_count.fetch_add(1, Ordering::SeqCst);
        let id = self.cluster.next_session_id.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemorySession {
            cluster: self.cluster.clone(),
            id,
            request_timeout: opts.request_timeout,
        }))
    }
}

struct MemorySession {
    cluster: Arc<MemoryCluster>,
    id: u64,
    request_timeout: Option<Duration>,
}

#[async_trait]
impl ClusterSession for MemorySession {
    async fn execute(&self, spec: &QuerySpec) -> Result<Vec<Row>, DriverError> {
        if let Some(err) = self.cluster.take_failure() {
            return Err(err);
        }
        self.cluster.record(spec, self, false);
        Ok(self
            .cluster
            .pages_for(&spec.cql)
            .into_iter()
            .flatten()
            .collect())
    }

    async fn execute_paged(&self, spec: &QuerySpec) -> Result<Box<dyn PagedRows>, DriverError> {
        if let Some(err) = self.cluster.take_failure() {
            return Err(err);
        }
        self.cluster.record(spec, self, false);
        Ok(Box::new(MemoryPages {
            pages: self.cluster.pages_for(&spec.cql).into(),
        }))
    }

    async fn execute_batch(&self, specs: &[QuerySpec]) -> Result<(), DriverError> {
        if let Some(err) = self.cluster.take_failure() {
            return Err(err);
        }
        for spec in specs {
            self.cluster.record(spec, self, true);
        }
        Ok(())
    }

    async fn describe_schema(&self) -> Result<Vec<u8>, DriverError> {
        if let Some(err) = self.cluster.take_failure() {
            return Err(err);
        }
        self.cluster.schema_loads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .cluster
            .schema_blob
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| br#"{"keyspaces":[]}"#.to_vec()))
    }
}

struct MemoryPages {
    pages: VecDeque<Vec<Row>>,
}

#[async_trait]
impl PagedRows for MemoryPages {
    async fn next_page(&mut self) -> Result<Vec<Row>, DriverError> {
        Ok(self.pages.pop_front().unwrap_or_default())
    }
}
