// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-connection order processing.
//!
//! One worker owns one client connection. It loops reading orders,
//! executes each against the shared cluster session (or a dedicated
//! session for per-statement timeouts), and writes results back. Orders
//! on one connection are processed strictly in arrival order; cursors
//! and batches live in worker-local handle tables and never cross
//! connections.
//!
//! Failure policy: a statement-level error produces a failed result and
//! the connection stays open; a session-fatal driver error ("no hosts
//! available") notifies the reconnection machine and closes this
//! connection; a protocol error or client hang-up closes the connection
//! silently.

use std::sync::Arc;
use std::time::Duration;

use cqlrelay_protocol::frame::{FrameError, FramedStream};
use cqlrelay_protocol::order::{Order, OrderKind};
use cqlrelay_protocol::result::OrderResult;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::driver::{ClusterDriver, ClusterSession, ConnectOptions, PagedRows, QuerySpec, Row};
use crate::error::ProxyError;
use crate::handles::{HandleError, HandleTable};
use crate::reconnect::SharedSession;
use crate::schema_cache::ClusterSchemaCache;

/// State shared by every connection worker.
pub struct ProxyState {
    pub driver: Arc<dyn ClusterDriver>,
    pub connect_opts: ConnectOptions,
    pub session_rx: watch::Receiver<Option<SharedSession>>,
    pub schema_cache: Arc<ClusterSchemaCache>,
    pub reconnect_tx: mpsc::Sender<u64>,
}

/// A live paged query: created by `Declare`, advanced by `Fetch`,
/// destroyed by `Close`.
struct Cursor {
    pages: Box<dyn PagedRows>,
    #[allow(dead_code)] // recorded per the declare order, informational
    column_count: u8,
}

/// A pending multi-statement transaction.
#[derive(Default)]
struct Batch {
    statements: Vec<QuerySpec>,
}

/// The shared session is gone; the worker must stop.
struct SessionLost {
    generation: u64,
}

/// One worker per accepted client connection.
pub struct ConnectionWorker<S> {
    stream: FramedStream<S>,
    state: Arc<ProxyState>,
    cursors: HandleTable<Cursor>,
    batches: HandleTable<Batch>,
    /// Generation of the shared session this worker last executed on.
    generation: u64,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ConnectionWorker<S> {
    pub fn new(stream: S, state: Arc<ProxyState>) -> Self {
        Self {
            stream: FramedStream::new(stream),
            state,
            cursors: HandleTable::new(),
            batches: HandleTable::new(),
            generation: 0,
        }
    }

    /// Process orders until the client hangs up, a fatal error occurs,
    /// or shutdown is signalled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let order = tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped shutdown channel counts as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("worker stopping on shutdown signal");
                        break;
                    }
                    continue;
                }
                read = self.stream.read_order() => match read {
                    Ok(order) => order,
                    Err(FrameError::ConnectionClosed) => {
                        debug!("client closed connection");
                        break;
                    }
                    Err(e) => {
                        debug!(error = %e, "protocol error, closing connection");
                        break;
                    }
                }
            };

            let blocking = order.blocking;
            let clear_description = order.clear_cluster_description;
            let outcome = self.dispatch(order).await;

            // Schema-affecting DDL may have partially succeeded, so the
            // cache is cleared regardless of the statement's outcome.
            if clear_description {
                self.state.schema_cache.invalidate().await;
            }

            match outcome {
                Ok(result) => {
                    if blocking {
                        if let Err(e) = self.stream.write_result(&result).await {
                            debug!(error = %e, "failed to write result, closing connection");
                            break;
                        }
                    } else if !result.succeeded {
                        debug!("non-blocking order failed, no result channel to report on");
                    }
                }
                Err(SessionLost { generation }) => {
                    warn!(
                        generation,
                        "session-fatal error, requesting reconnect and closing connection"
                    );
                    let _ = self.state.reconnect_tx.try_send(generation);
                    break;
                }
            }
        }
    }

    /// Execute one order. Statement-level failures become failed
    /// results; only session-fatal errors abort the worker.
    async fn dispatch(&mut self, order: Order) -> Result<OrderResult, SessionLost> {
        match self.try_dispatch(order).await {
            Ok(result) => Ok(result),
            Err(err) if err.is_session_fatal() => Err(SessionLost {
                generation: self.generation,
            }),
            Err(err) => {
                debug!(error = %err, code = err.error_code(), "order failed");
                Ok(OrderResult::error(err.error_code()))
            }
        }
    }

    async fn try_dispatch(&mut self, order: Order) -> Result<OrderResult, ProxyError> {
        // Batches must run on the stable shared session; a dedicated
        // timeout session can never host one.
        if order.timeout_ms.filter(|ms| *ms > 0).is_some() && order.batch_index.is_some() {
            return Err(ProxyError::DedicatedTimeoutInBatch);
        }

        match order.kind {
            OrderKind::Success | OrderKind::BatchAdd => self.execute_or_append(order).await,
            OrderKind::Rows => self.execute_rows(order).await,
            OrderKind::Declare => self.declare_cursor(order).await,
            OrderKind::Fetch => self.fetch_cursor(order).await,
            OrderKind::Close => self.close_cursor(&order),
            OrderKind::Describe => self.describe(&order).await,
            OrderKind::BatchDeclare => self.declare_batch(),
            OrderKind::BatchCommit => self.commit_batch(order).await,
            OrderKind::BatchRollback => self.rollback_batch(&order),
        }
    }

    /// The session this order runs on.
    ///
    /// An order with a positive statement timeout gets a brand-new
    /// session configured with that timeout (session timeouts are fixed
    /// at connect time); it is dropped when the order completes.
    async fn session_for(&mut self, order: &Order) -> Result<Arc<dyn ClusterSession>, ProxyError> {
        if let Some(ms) = order.timeout_ms.filter(|ms| *ms > 0) {
            let opts = self
                .state
                .connect_opts
                .with_request_timeout(Duration::from_millis(ms as u64));
            debug!(timeout_ms = ms, "opening dedicated session");
            return self.state.driver.connect(&opts).await.map_err(Into::into);
        }
        let shared = self
            .state
            .session_rx
            .borrow()
            .clone()
            .ok_or(ProxyError::NoSession)?;
        self.generation = shared.generation;
        Ok(shared.session)
    }

    async fn execute_or_append(&mut self, order: Order) -> Result<OrderResult, ProxyError> {
        if let Some(index) = order.batch_index {
            let spec = QuerySpec::from_order(&order);
            let batch = self.batches.get_mut(index).map_err(batch_error)?;
            batch.statements.push(spec);
            return Ok(OrderResult::ok());
        }
        let session = self.session_for(&order).await?;
        let spec = QuerySpec::from_order(&order);
        session.execute(&spec).await?;
        Ok(OrderResult::ok())
    }

    async fn execute_rows(&mut self, order: Order) -> Result<OrderResult, ProxyError> {
        let session = self.session_for(&order).await?;
        let spec = QuerySpec::from_order(&order);
        let rows = session.execute(&spec).await?;
        let mut result = OrderResult::ok();
        push_rows(&mut result, rows);
        Ok(result)
    }

    async fn declare_cursor(&mut self, order: Order) -> Result<OrderResult, ProxyError> {
        let session = self.session_for(&order).await?;
        let spec = QuerySpec::from_order(&order);
        let mut pages = session.execute_paged(&spec).await?;
        // Return whatever the driver already buffered along with the
        // new handle, saving the client one fetch round trip.
        let buffered = pages.next_page().await?;
        let index = self
            .cursors
            .insert(Cursor {
                pages,
                column_count: order.column_count,
            })
            .map_err(|_| ProxyError::HandleOverflow { what: "cursor" })?;
        let mut result = OrderResult::ok();
        result.push_handle(index as u32);
        push_rows(&mut result, buffered);
        Ok(result)
    }

    async fn fetch_cursor(&mut self, order: Order) -> Result<OrderResult, ProxyError> {
        let index = order
            .cursor_index
            .ok_or(ProxyError::MissingHandle { what: "cursor" })?;
        let cursor = self.cursors.get_mut(index).map_err(cursor_error)?;
        // An empty page means the cursor is exhausted; the client is
        // expected to close it.
        let rows = cursor.pages.next_page().await?;
        let mut result = OrderResult::ok();
        push_rows(&mut result, rows);
        Ok(result)
    }

    fn close_cursor(&mut self, order: &Order) -> Result<OrderResult, ProxyError> {
        let index = order
            .cursor_index
            .ok_or(ProxyError::MissingHandle { what: "cursor" })?;
        self.cursors.close(index).map_err(cursor_error)?;
        // The reply carries no data but the client blocks on it.
        Ok(OrderResult::ok())
    }

    async fn describe(&mut self, order: &Order) -> Result<OrderResult, ProxyError> {
        let session = self.session_for(order).await?;
        let blob = self.state.schema_cache.describe(&session).await?;
        Ok(OrderResult::with_blobs(vec![blob.to_vec()]))
    }

    fn declare_batch(&mut self) -> Result<OrderResult, ProxyError> {
        let index = self
            .batches
            .insert(Batch::default())
            .map_err(|_| ProxyError::HandleOverflow { what: "batch" })?;
        let mut result = OrderResult::ok();
        result.push_handle(index as u32);
        Ok(result)
    }

    async fn commit_batch(&mut self, order: Order) -> Result<OrderResult, ProxyError> {
        let index = order
            .batch_index
            .ok_or(ProxyError::MissingHandle { what: "batch" })?;
        let batch = self.batches.close(index).map_err(batch_error)?;
        let session = self.session_for(&order).await?;
        session.execute_batch(&batch.statements).await?;
        Ok(OrderResult::ok())
    }

    fn rollback_batch(&mut self, order: &Order) -> Result<OrderResult, ProxyError> {
        let index = order
            .batch_index
            .ok_or(ProxyError::MissingHandle { what: "batch" })?;
        let batch = self.batches.close(index).map_err(batch_error)?;
        debug!(discarded = batch.statements.len(), "batch rolled back");
        Ok(OrderResult::ok())
    }
}

/// Flatten rows into result blobs, one blob per column, rows in order.
fn push_rows(result: &mut OrderResult, rows: Vec<Row>) {
    for row in rows {
        for column in row {
            result.blobs.push(column);
        }
    }
}

fn cursor_error(err: HandleError) -> ProxyError {
    match err {
        HandleError::NotFound(index) => ProxyError::CursorNotFound { index },
        HandleError::Overflow => ProxyError::HandleOverflow { what: "cursor" },
    }
}

fn batch_error(err: HandleError) -> ProxyError {
    match err {
        HandleError::NotFound(index) => ProxyError::BatchNotFound { index },
        HandleError::Overflow => ProxyError::HandleOverflow { what: "batch" },
    }
}
