// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for cqlrelay-core.
//!
//! Provides a unified error type that maps to wire error results.

#![allow(dead_code)] // Variants and methods used in tests and for future expansion

use std::fmt;

use crate::driver::DriverError;

/// Result type using ProxyError
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Proxy errors that can occur during order processing.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ProxyError {
    /// Cursor handle does not name an open cursor.
    CursorNotFound {
        /// The handle the client sent.
        index: u16,
    },

    /// Batch handle does not name an open batch.
    BatchNotFound {
        /// The handle the client sent.
        index: u16,
    },

    /// A connection has exhausted its handle space.
    HandleOverflow {
        /// Which table overflowed ("cursor" or "batch").
        what: &'static str,
    },

    /// A per-statement timeout was combined with a batch handle.
    ///
    /// Batches must run on the stable shared session; a dedicated
    /// timeout session can never host one.
    DedicatedTimeoutInBatch,

    /// An order required a handle it did not carry.
    MissingHandle {
        /// Which handle field was required.
        what: &'static str,
    },

    /// No database session is currently established.
    NoSession,

    /// The driver reported that no cluster hosts are reachable.
    NoHostsAvailable {
        /// Driver-reported details.
        details: String,
    },

    /// A statement failed at the driver level.
    Statement {
        /// Driver-reported details.
        details: String,
    },

    /// Connecting a dedicated session failed.
    Connect {
        /// Driver-reported details.
        details: String,
    },

    /// A schema definition file could not be loaded.
    SchemaDefinition {
        /// Path of the offending file.
        path: String,
        /// Parse or IO details.
        details: String,
    },

    /// The cluster-wide schema lock could not be acquired.
    LockFailed {
        /// Lock collaborator details.
        details: String,
    },

    /// Schema initialization exhausted its attempt budget.
    InitializationFailed {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

impl ProxyError {
    /// Get the error code string for this error type.
    ///
    /// This is the blob a failed `OrderResult` carries back to the client.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CursorNotFound { .. } => "CURSOR_NOT_FOUND",
            Self::BatchNotFound { .. } => "BATCH_NOT_FOUND",
            Self::HandleOverflow { .. } => "HANDLE_OVERFLOW",
            Self::DedicatedTimeoutInBatch => "TIMEOUT_IN_BATCH",
            Self::MissingHandle { .. } => "MISSING_HANDLE",
            Self::NoSession => "NO_SESSION",
            Self::NoHostsAvailable { .. } => "NO_HOSTS_AVAILABLE",
            Self::Statement { .. } => "STATEMENT_ERROR",
            Self::Connect { .. } => "CONNECT_ERROR",
            Self::SchemaDefinition { .. } => "SCHEMA_DEFINITION_ERROR",
            Self::LockFailed { .. } => "LOCK_FAILED",
            Self::InitializationFailed { .. } => "INITIALIZATION_FAILED",
        }
    }

    /// Whether this error means the shared session is gone and the
    /// process should start reconnecting.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::NoHostsAvailable { .. })
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CursorNotFound { index } => {
                write!(f, "cursor {} is not open", index)
            }
            Self::BatchNotFound { index } => {
                write!(f, "batch {} is not open", index)
            }
            Self::HandleOverflow { what } => {
                write!(f, "too many open {} handles on this connection", what)
            }
            Self::DedicatedTimeoutInBatch => {
                write!(f, "an order with a statement timeout cannot address a batch")
            }
            Self::MissingHandle { what } => {
                write!(f, "order requires a {} handle", what)
            }
            Self::NoSession => {
                write!(f, "no database session established")
            }
            Self::NoHostsAvailable { details } => {
                write!(f, "no cluster hosts available: {}", details)
            }
            Self::Statement { details } => {
                write!(f, "statement failed: {}", details)
            }
            Self::Connect { details } => {
                write!(f, "dedicated session connect failed: {}", details)
            }
            Self::SchemaDefinition { path, details } => {
                write!(f, "schema definition '{}' invalid: {}", path, details)
            }
            Self::LockFailed { details } => {
                write!(f, "schema lock not acquired: {}", details)
            }
            Self::InitializationFailed { attempts } => {
                write!(
                    f,
                    "schema initialization failed after {} attempts",
                    attempts
                )
            }
        }
    }
}

impl std::error::Error for ProxyError {}

impl From<DriverError> for ProxyError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::NoHostsAvailable(details) => ProxyError::NoHostsAvailable { details },
            DriverError::Statement(details) => ProxyError::Statement { details },
            DriverError::Connect(details) => ProxyError::Connect { details },
        }
    }
}
