// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire protocol layer for cqlrelay.
//!
//! This crate defines the binary protocol spoken between clients and the
//! cqlrelay proxy:
//!
//! - [`order::Order`] — one client request (a CQL statement plus execution
//!   attributes), encoded as a compact payload with bitflag-selected
//!   optional fields.
//! - [`result::OrderResult`] — one proxy response, a flat sequence of
//!   binary blobs whose meaning depends on the originating order kind.
//! - [`frame`] — self-delimited frames (`CQLP` / `SUCS` / `ERRO` tag plus
//!   a big-endian length prefix) over any async byte stream, and
//!   [`frame::FramedStream`] for the synchronous request/response exchange.
//! - [`client::ProxyClient`] — the TCP client used by request handlers to
//!   talk to a running proxy.
//!
//! All integers on the wire are big-endian. Strings are UTF-8 with a
//! 2-byte length prefix; binary blobs carry a 4-byte length prefix.

pub mod client;
pub mod codec;
pub mod frame;
pub mod order;
pub mod result;

pub use client::{ProxyClient, ProxyClientConfig};
pub use codec::CodecError;
pub use frame::{FrameError, FramedStream};
pub use order::{Consistency, Order, OrderKind};
pub use result::OrderResult;
