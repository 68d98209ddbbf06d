// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

/// cqlrelay configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address clients connect to with orders.
    pub listen_addr: SocketAddr,
    /// TCP address for the control plane.
    pub control_addr: SocketAddr,
    /// Cluster contact points.
    pub cassandra_hosts: Vec<String>,
    /// Cluster native-protocol port.
    pub cassandra_port: u16,
    /// Whether to use SSL for the cluster connection.
    pub use_ssl: bool,
    /// Accept backlog for the client listener.
    pub max_pending_connections: u32,
    /// Maximum concurrent client connections (0 = unlimited).
    pub max_connections: u32,
    /// Colon-separated search paths for table schema definitions.
    pub schema_paths: Vec<PathBuf>,
    /// Keyspace the schema initializer maintains.
    pub keyspace: String,
    /// Replication factor for keyspace creation.
    pub replication_factor: u32,
    /// Cluster driver backend name.
    pub driver: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional and default to a local development
    /// setup:
    /// - `CQLRELAY_LISTEN_ADDR`: client listen address (default: 0.0.0.0:4042)
    /// - `CQLRELAY_CONTROL_ADDR`: control-plane address (default: 127.0.0.1:4043)
    /// - `CQLRELAY_CASSANDRA_HOSTS`: comma-separated contact points (default: localhost)
    /// - `CQLRELAY_CASSANDRA_PORT`: cluster port (default: 9042)
    /// - `CQLRELAY_CASSANDRA_SSL`: "true"/"false" (default: false)
    /// - `CQLRELAY_MAX_PENDING_CONNECTIONS`: accept backlog (default: 128)
    /// - `CQLRELAY_MAX_CONNECTIONS`: concurrent connection cap, 0 unlimited (default: 0)
    /// - `CQLRELAY_SCHEMA_PATHS`: colon-separated definition directories
    /// - `CQLRELAY_KEYSPACE`: managed keyspace (default: cqlrelay)
    /// - `CQLRELAY_REPLICATION_FACTOR`: keyspace replication (default: 1)
    /// - `CQLRELAY_DRIVER`: driver backend (default: memory)
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen_addr: SocketAddr = std::env::var("CQLRELAY_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:4042".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("CQLRELAY_LISTEN_ADDR", "must be a socket address")
            })?;

        let control_addr: SocketAddr = std::env::var("CQLRELAY_CONTROL_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:4043".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("CQLRELAY_CONTROL_ADDR", "must be a socket address")
            })?;

        let cassandra_hosts: Vec<String> = std::env::var("CQLRELAY_CASSANDRA_HOSTS")
            .unwrap_or_else(|_| "localhost".to_string())
            .split(',')
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();
        if cassandra_hosts.is_empty() {
            return Err(ConfigError::Invalid(
                "CQLRELAY_CASSANDRA_HOSTS",
                "must name at least one host",
            ));
        }

        let cassandra_port: u16 = std::env::var("CQLRELAY_CASSANDRA_PORT")
            .unwrap_or_else(|_| "9042".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("CQLRELAY_CASSANDRA_PORT", "must be a valid port number")
            })?;

        let use_ssl = match std::env::var("CQLRELAY_CASSANDRA_SSL")
            .unwrap_or_else(|_| "false".to_string())
            .as_str()
        {
            "true" | "1" | "on" => true,
            "false" | "0" | "off" => false,
            _ => {
                return Err(ConfigError::Invalid(
                    "CQLRELAY_CASSANDRA_SSL",
                    "must be true or false",
                ));
            }
        };

        let max_pending_connections: u32 = std::env::var("CQLRELAY_MAX_PENDING_CONNECTIONS")
            .unwrap_or_else(|_| "128".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "CQLRELAY_MAX_PENDING_CONNECTIONS",
                    "must be a positive integer",
                )
            })?;

        let max_connections: u32 = std::env::var("CQLRELAY_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("CQLRELAY_MAX_CONNECTIONS", "must be a non-negative integer")
            })?;

        let schema_paths: Vec<PathBuf> = std::env::var("CQLRELAY_SCHEMA_PATHS")
            .unwrap_or_default()
            .split(':')
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect();

        let keyspace =
            std::env::var("CQLRELAY_KEYSPACE").unwrap_or_else(|_| "cqlrelay".to_string());

        let replication_factor: u32 = std::env::var("CQLRELAY_REPLICATION_FACTOR")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "CQLRELAY_REPLICATION_FACTOR",
                    "must be a positive integer",
                )
            })?;
        if replication_factor == 0 {
            return Err(ConfigError::Invalid(
                "CQLRELAY_REPLICATION_FACTOR",
                "must be a positive integer",
            ));
        }

        let driver = std::env::var("CQLRELAY_DRIVER").unwrap_or_else(|_| "memory".to_string());

        Ok(Self {
            listen_addr,
            control_addr,
            cassandra_hosts,
            cassandra_port,
            use_ssl,
            max_pending_connections,
            max_connections,
            schema_paths,
            keyspace,
            replication_factor,
            driver,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
