// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TCP servers for cqlrelay.
//!
//! Provides two separate server components:
//! - Client Server: accepts order connections and runs one worker per socket
//! - Control Server: accepts control-plane connections (status, stop, log rotation)

pub mod client_server;
pub mod control_server;

pub use client_server::{ServerError, bind_listener, run_client_server};
pub use control_server::run_control_server;
