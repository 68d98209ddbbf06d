// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! cqlrelay - CQL Database Proxy
//!
//! This crate multiplexes many short-lived client processes onto a small
//! number of long-lived cluster driver sessions. Clients speak the
//! compact binary order protocol from `cqlrelay-protocol`; the proxy
//! executes each order against the shared cluster session and streams
//! results back.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Client Processes                           │
//! │        (request handlers using cqlrelay-protocol)           │
//! └─────────────────────────────────────────────────────────────┘
//!            │ orders (TCP, port 4042)
//!            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Client Server ── one ConnectionWorker task per socket      │
//! │    cursors/batches: worker-local handle tables              │
//! │    schema cache: one per process, shared                    │
//! └─────────────────────────────────────────────────────────────┘
//!     │ shared session (watch)          ▲ reconnect triggers
//!     ▼                                 │
//! ┌──────────────────────┐    ┌─────────────────────────────────┐
//! │  Cluster Driver      │◄───│  Reconnector (backoff machine)  │
//! │  (external cluster)  │    └─────────────────────────────────┘
//! └──────────────────────┘              │ announcements
//!                                       ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Control Server (TCP, port 4043)                            │
//! │  CASSANDRASTATUS / STOP / NOCASSANDRA / CASSANDRAREADY ...  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Order processing
//!
//! | Kind | Action |
//! |------|--------|
//! | `Success` / `BatchAdd` | execute one statement, or append it to an open batch |
//! | `Rows` | execute and return the resulting rows' columns |
//! | `Declare` | open a cursor, return its handle plus buffered rows |
//! | `Fetch` | advance a cursor one page; an empty page means exhausted |
//! | `Close` | free a cursor slot |
//! | `Describe` | return the (cached) cluster schema description |
//! | `BatchDeclare` | open a batch, return its handle |
//! | `BatchCommit` | execute every batched statement, free the slot |
//! | `BatchRollback` | discard the batch, free the slot |
//!
//! Orders on one connection are processed strictly in arrival order.
//! An order with a positive `timeout_ms` runs on a dedicated session
//! created with that timeout; everything else shares the process-wide
//! session owned by the reconnection machine.

pub mod config;
pub mod control;
pub mod driver;
pub mod error;
pub mod handles;
pub mod reconnect;
pub mod runtime;
pub mod schema_cache;
pub mod schema_init;
pub mod server;
pub mod worker;

pub use config::Config;
pub use control::ControlPlane;
pub use error::ProxyError;
pub use runtime::{ProxyRuntime, ProxyRuntimeBuilder};
