// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process-wide cache of the cluster schema description.
//!
//! One cache, many readers, rare writers: every connection worker holds
//! an `Arc` to the same instance. The blob is loaded lazily on the first
//! describe after the cache empties and cleared whenever an order flags
//! a possible schema mutation.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::debug;

use crate::driver::ClusterSession;
use crate::error::{ProxyError, Result};

/// Lock-guarded schema description blob.
#[derive(Default)]
pub struct ClusterSchemaCache {
    blob: Mutex<Option<Bytes>>,
}

impl ClusterSchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached description, loading it from the driver if the
    /// cache is empty.
    ///
    /// The emptiness check happens under the lock, so concurrent callers
    /// during an empty episode trigger exactly one driver load; the rest
    /// wait on the lock and get the stored blob.
    pub async fn describe(&self, session: &Arc<dyn ClusterSession>) -> Result<Bytes> {
        let mut guard = self.blob.lock().await;
        if let Some(blob) = guard.as_ref() {
            return Ok(blob.clone());
        }
        debug!("cluster description cache empty, loading from driver");
        let loaded = session
            .describe_schema()
            .await
            .map_err(ProxyError::from)?;
        let blob = Bytes::from(loaded);
        *guard = Some(blob.clone());
        Ok(blob)
    }

    /// Clear the cached blob. Idempotent.
    pub async fn invalidate(&self) {
        if self.blob.lock().await.take().is_some() {
            debug!("cluster description cache invalidated");
        }
    }

    /// Whether a blob is currently cached.
    pub async fn is_empty(&self) -> bool {
        self.blob.lock().await.is_none()
    }
}
