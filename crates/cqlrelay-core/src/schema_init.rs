// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! One-shot schema bootstrap.
//!
//! Before the proxy accepts client traffic it ensures the managed
//! keyspace, its tables and their secondary indexes exist. Declarative
//! table definitions come from JSON files on the configured search
//! paths; what is missing is computed against the cluster's system
//! catalog; creation runs under a cluster-wide distributed lock so two
//! proxy instances never race on DDL. The whole sequence retries with
//! the standard backoff, bounded at roughly a day of attempts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::driver::{ClusterDriver, ConnectOptions, QuerySpec, Row};
use crate::error::{ProxyError, Result};
use crate::reconnect::Backoff;

/// Statement timeout for the dedicated bootstrap session. DDL and
/// catalog scans can be slow on a busy cluster.
pub const EXTENDED_TIMEOUT: Duration = Duration::from_secs(300);

/// Retry budget, roughly a day at the backoff ceiling.
pub const MAX_ATTEMPTS: u32 = 2_000;

pub const SYSTEM_KEYSPACES_QUERY: &str = "SELECT keyspace_name FROM system_schema.keyspaces";
pub const SYSTEM_TABLES_QUERY: &str =
    "SELECT table_name FROM system_schema.tables WHERE keyspace_name = ?";
pub const SYSTEM_INDEXES_QUERY: &str =
    "SELECT index_name FROM system_schema.indexes WHERE keyspace_name = ?";

/// How a table is accessed, selecting its storage parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessModel {
    /// Append-heavy, time-ordered, expired rather than updated.
    Log,
    /// High insert/delete churn.
    Queue,
    /// Read-mostly durable data.
    Content,
    /// Like `Content`: session rows follow the same pattern.
    Session,
    /// Like `Content`: bulk data rows.
    Data,
    #[default]
    Generic,
}

/// Storage parameters applied at table creation.
#[derive(Debug, Clone, PartialEq)]
pub struct TableParams {
    pub compaction_strategy: &'static str,
    pub compression: &'static str,
    pub gc_grace_seconds: u32,
    pub read_repair_chance: f64,
    pub memtable_flush_period_ms: u32,
    pub bloom_filter_fp_chance: f64,
}

/// Pure lookup from access model to storage parameters.
pub fn params_for(model: AccessModel) -> TableParams {
    match model {
        AccessModel::Log => TableParams {
            compaction_strategy: "TimeWindowCompactionStrategy",
            compression: "LZ4Compressor",
            gc_grace_seconds: 3_600,
            read_repair_chance: 0.0,
            memtable_flush_period_ms: 3_600_000,
            bloom_filter_fp_chance: 0.1,
        },
        AccessModel::Queue => TableParams {
            compaction_strategy: "LeveledCompactionStrategy",
            compression: "LZ4Compressor",
            gc_grace_seconds: 3_600,
            read_repair_chance: 0.0,
            memtable_flush_period_ms: 60_000,
            bloom_filter_fp_chance: 0.01,
        },
        AccessModel::Content | AccessModel::Session | AccessModel::Data => TableParams {
            compaction_strategy: "SizeTieredCompactionStrategy",
            compression: "LZ4Compressor",
            gc_grace_seconds: 864_000,
            read_repair_chance: 0.1,
            memtable_flush_period_ms: 0,
            bloom_filter_fp_chance: 0.01,
        },
        AccessModel::Generic => TableParams {
            compaction_strategy: "SizeTieredCompactionStrategy",
            compression: "LZ4Compressor",
            gc_grace_seconds: 864_000,
            read_repair_chance: 0.1,
            memtable_flush_period_ms: 0,
            bloom_filter_fp_chance: 0.1,
        },
    }
}

/// One declarative table definition, loaded from JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    #[serde(default)]
    pub model: AccessModel,
    /// True for tables flagged for removal.
    #[serde(default)]
    pub drop: bool,
    /// Columns to build secondary indexes on.
    #[serde(default)]
    pub secondary_indexes: Vec<String>,
}

impl TableDefinition {
    /// Deterministic name for the index on `column`.
    pub fn index_name(&self, column: &str) -> String {
        format!("{}_{}_idx", self.name, column)
    }
}

/// Load definitions from every `*.json` file on the search paths.
///
/// Files within a directory are read in name order so bootstrap DDL is
/// deterministic across instances.
pub fn load_definitions(paths: &[PathBuf]) -> Result<Vec<TableDefinition>> {
    let mut definitions = Vec::new();
    for dir in paths {
        let entries = std::fs::read_dir(dir).map_err(|e| ProxyError::SchemaDefinition {
            path: dir.display().to_string(),
            details: e.to_string(),
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        for file in files {
            let raw = std::fs::read_to_string(&file).map_err(|e| ProxyError::SchemaDefinition {
                path: file.display().to_string(),
                details: e.to_string(),
            })?;
            let parsed: Vec<TableDefinition> =
                serde_json::from_str(&raw).map_err(|e| ProxyError::SchemaDefinition {
                    path: file.display().to_string(),
                    details: e.to_string(),
                })?;
            definitions.extend(parsed);
        }
    }
    Ok(definitions)
}

/// Guard for a held distributed lock; released on drop.
pub struct LockGuard {
    _inner: Box<dyn Send>,
}

impl LockGuard {
    pub fn new(inner: impl Send + 'static) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

/// Cluster-wide mutex, an external collaborator.
///
/// Held only across the create-keyspace/tables/indexes sequence, never
/// across the retry loop.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    async fn acquire(&self) -> Result<LockGuard>;
}

/// Process-local lock implementation for development and tests.
#[derive(Default)]
pub struct LocalLock {
    inner: Arc<tokio::sync::Mutex<()>>,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for LocalLock {
    async fn acquire(&self) -> Result<LockGuard> {
        let guard = self.inner.clone().lock_owned().await;
        Ok(LockGuard::new(guard))
    }
}

/// CQL to create the managed keyspace.
pub fn create_keyspace_cql(keyspace: &str, replication_factor: u32) -> String {
    format!(
        "CREATE KEYSPACE IF NOT EXISTS {keyspace} \
         WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {replication_factor}}} \
         AND durable_writes = true"
    )
}

/// CQL to create one table with its model's storage parameters.
pub fn create_table_cql(keyspace: &str, def: &TableDefinition) -> String {
    let params = params_for(def.model);
    format!(
        "CREATE TABLE IF NOT EXISTS {keyspace}.{table} \
         (key BLOB, column1 BLOB, value BLOB, PRIMARY KEY (key, column1)) \
         WITH compaction = {{'class': '{compaction}'}} \
         AND compression = {{'sstable_compression': '{compression}'}} \
         AND gc_grace_seconds = {gc} \
         AND read_repair_chance = {read_repair} \
         AND memtable_flush_period_in_ms = {flush} \
         AND bloom_filter_fp_chance = {bloom}",
        table = def.name,
        compaction = params.compaction_strategy,
        compression = params.compression,
        gc = params.gc_grace_seconds,
        read_repair = params.read_repair_chance,
        flush = params.memtable_flush_period_ms,
        bloom = params.bloom_filter_fp_chance,
    )
}

/// CQL to create one secondary index.
pub fn create_index_cql(keyspace: &str, def: &TableDefinition, column: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {index} ON {keyspace}.{table} ({column})",
        index = def.index_name(column),
        table = def.name,
    )
}

/// CQL to drop a table flagged for removal.
pub fn drop_table_cql(keyspace: &str, def: &TableDefinition) -> String {
    format!("DROP TABLE IF EXISTS {keyspace}.{table}", table = def.name)
}

/// The one-shot bootstrap sequence.
pub struct SchemaInitializer {
    driver: Arc<dyn ClusterDriver>,
    opts: ConnectOptions,
    keyspace: String,
    replication_factor: u32,
    definitions: Vec<TableDefinition>,
    lock: Arc<dyn DistributedLock>,
    backoff: Backoff,
    max_attempts: u32,
}

impl SchemaInitializer {
    pub fn new(
        driver: Arc<dyn ClusterDriver>,
        opts: ConnectOptions,
        keyspace: impl Into<String>,
        replication_factor: u32,
        definitions: Vec<TableDefinition>,
        lock: Arc<dyn DistributedLock>,
    ) -> Self {
        Self {
            driver,
            opts,
            keyspace: keyspace.into(),
            replication_factor,
            definitions,
            lock,
            backoff: Backoff::default(),
            max_attempts: MAX_ATTEMPTS,
        }
    }

    /// Override the attempt budget (tests).
    pub fn with_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Run to completion or exhaust the attempt budget.
    #[instrument(skip(self), fields(keyspace = %self.keyspace))]
    pub async fn run(&mut self) -> Result<()> {
        if self.definitions.is_empty() {
            debug!("no table definitions configured, skipping schema bootstrap");
            return Ok(());
        }
        for attempt in 1..=self.max_attempts {
            match self.try_once().await {
                Ok(()) => {
                    info!(attempt, "schema initialization complete");
                    return Ok(());
                }
                Err(e) => {
                    let delay = self.backoff.delay();
                    warn!(
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "schema initialization attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(ProxyError::InitializationFailed {
            attempts: self.max_attempts,
        })
    }

    async fn try_once(&self) -> Result<()> {
        let session = self
            .driver
            .connect(&self.opts.with_request_timeout(EXTENDED_TIMEOUT))
            .await
            .map_err(ProxyError::from)?;

        let keyspaces = first_columns(
            session
                .execute(&QuerySpec::statement(SYSTEM_KEYSPACES_QUERY))
                .await?,
        );
        let keyspace_missing = !keyspaces.contains(&self.keyspace);

        let existing_tables = first_columns(
            session
                .execute(&self.catalog_query(SYSTEM_TABLES_QUERY))
                .await?,
        );
        let existing_indexes = first_columns(
            session
                .execute(&self.catalog_query(SYSTEM_INDEXES_QUERY))
                .await?,
        );

        let missing_tables: Vec<&TableDefinition> = self
            .definitions
            .iter()
            .filter(|def| !def.drop && !existing_tables.contains(&def.name))
            .collect();
        let obsolete_tables: Vec<&TableDefinition> = self
            .definitions
            .iter()
            .filter(|def| def.drop && existing_tables.contains(&def.name))
            .collect();
        let missing_indexes: Vec<(&TableDefinition, &String)> = self
            .definitions
            .iter()
            .filter(|def| !def.drop)
            .flat_map(|def| def.secondary_indexes.iter().map(move |col| (def, col)))
            .filter(|(def, col)| !existing_indexes.contains(&def.index_name(col)))
            .collect();

        if !keyspace_missing
            && missing_tables.is_empty()
            && obsolete_tables.is_empty()
            && missing_indexes.is_empty()
        {
            debug!("cluster schema already up to date");
            return Ok(());
        }

        info!(
            keyspace_missing,
            tables = missing_tables.len(),
            indexes = missing_indexes.len(),
            drops = obsolete_tables.len(),
            "schema changes required, acquiring cluster lock"
        );
        // Held only across the create sequence; other instances block
        // here instead of racing the same DDL.
        let _guard = self.lock.acquire().await?;

        if keyspace_missing {
            session
                .execute(&QuerySpec::statement(create_keyspace_cql(
                    &self.keyspace,
                    self.replication_factor,
                )))
                .await?;
        }
        for def in &missing_tables {
            session
                .execute(&QuerySpec::statement(create_table_cql(&self.keyspace, def)))
                .await?;
        }
        for (def, column) in &missing_indexes {
            session
                .execute(&QuerySpec::statement(create_index_cql(
                    &self.keyspace,
                    def,
                    column,
                )))
                .await?;
        }
        for def in &obsolete_tables {
            session
                .execute(&QuerySpec::statement(drop_table_cql(&self.keyspace, def)))
                .await?;
        }
        Ok(())
    }

    fn catalog_query(&self, cql: &str) -> QuerySpec {
        QuerySpec {
            parameters: vec![self.keyspace.as_bytes().to_vec()],
            ..QuerySpec::statement(cql)
        }
    }
}

/// First column of each row, decoded as UTF-8 names.
fn first_columns(rows: Vec<Row>) -> Vec<String> {
    rows.into_iter()
        .filter_map(|row| row.into_iter().next())
        .filter_map(|blob| String::from_utf8(blob).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;
    use crate::driver::memory::MemoryCluster;

    fn opts() -> ConnectOptions {
        ConnectOptions {
            hosts: vec!["localhost".to_string()],
            port: 9042,
            use_ssl: false,
            request_timeout: None,
        }
    }

    fn definition(name: &str, model: AccessModel) -> TableDefinition {
        TableDefinition {
            name: name.to_string(),
            model,
            drop: false,
            secondary_indexes: Vec::new(),
        }
    }

    fn name_rows(names: &[&str]) -> Vec<Row> {
        names
            .iter()
            .map(|n| vec![n.as_bytes().to_vec()])
            .collect()
    }

    fn can_catalog(cluster: &MemoryCluster, keyspaces: &[&str], tables: &[&str], indexes: &[&str]) {
        cluster.set_rows(SYSTEM_KEYSPACES_QUERY, name_rows(keyspaces));
        cluster.set_rows(SYSTEM_TABLES_QUERY, name_rows(tables));
        cluster.set_rows(SYSTEM_INDEXES_QUERY, name_rows(indexes));
    }

    #[test]
    fn test_params_lookup_is_total_and_distinct() {
        let log = params_for(AccessModel::Log);
        let queue = params_for(AccessModel::Queue);
        let content = params_for(AccessModel::Content);
        let generic = params_for(AccessModel::Generic);

        assert_eq!(log.compaction_strategy, "TimeWindowCompactionStrategy");
        assert_eq!(queue.compaction_strategy, "LeveledCompactionStrategy");
        assert_ne!(log, queue);
        assert_ne!(content, generic);
        // Content, session and data rows share one access pattern.
        assert_eq!(content, params_for(AccessModel::Session));
        assert_eq!(content, params_for(AccessModel::Data));
    }

    #[test]
    fn test_create_table_cql_carries_model_params() {
        let def = definition("audit_log", AccessModel::Log);
        let cql = create_table_cql("ks", &def);
        assert!(cql.contains("CREATE TABLE IF NOT EXISTS ks.audit_log"));
        assert!(cql.contains("TimeWindowCompactionStrategy"));
        assert!(cql.contains("gc_grace_seconds = 3600"));
        assert!(cql.contains("bloom_filter_fp_chance = 0.1"));
    }

    #[test]
    fn test_index_cql_uses_deterministic_name() {
        let mut def = definition("sessions", AccessModel::Session);
        def.secondary_indexes.push("user_id".to_string());
        assert_eq!(
            create_index_cql("ks", &def, "user_id"),
            "CREATE INDEX IF NOT EXISTS sessions_user_id_idx ON ks.sessions (user_id)"
        );
    }

    #[test]
    fn test_load_definitions_from_search_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("10-content.json"),
            r#"[{"name": "pages", "model": "content", "secondary_indexes": ["site"]}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("20-log.json"),
            r#"[{"name": "audit", "model": "log"}, {"name": "legacy", "drop": true}]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "not json").unwrap();

        let defs = load_definitions(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(defs.len(), 3);
        // Name-ordered within the directory.
        assert_eq!(defs[0].name, "pages");
        assert_eq!(defs[0].model, AccessModel::Content);
        assert_eq!(defs[0].secondary_indexes, vec!["site".to_string()]);
        assert_eq!(defs[1].name, "audit");
        assert_eq!(defs[1].model, AccessModel::Log);
        assert!(defs[2].drop);
    }

    #[test]
    fn test_load_definitions_bad_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
        let err = load_definitions(&[dir.path().to_path_buf()]).unwrap_err();
        assert_eq!(err.error_code(), "SCHEMA_DEFINITION_ERROR");
    }

    #[test]
    fn test_load_definitions_missing_dir_is_error() {
        let err = load_definitions(&[PathBuf::from("/nonexistent/cqlrelay")]).unwrap_err();
        assert_eq!(err.error_code(), "SCHEMA_DEFINITION_ERROR");
    }

    #[tokio::test]
    async fn test_bootstrap_creates_missing_schema() {
        let driver = MemoryDriver::new();
        let cluster = driver.cluster();
        can_catalog(&cluster, &["system"], &[], &[]);

        let mut def = definition("pages", AccessModel::Content);
        def.secondary_indexes.push("site".to_string());
        let mut init = SchemaInitializer::new(
            Arc::new(driver),
            opts(),
            "ks",
            2,
            vec![def, definition("audit", AccessModel::Log)],
            Arc::new(LocalLock::new()),
        );
        init.run().await.unwrap();

        let ddl: Vec<String> = cluster
            .applied()
            .iter()
            .filter(|s| !s.cql.starts_with("SELECT"))
            .map(|s| s.cql.clone())
            .collect();
        assert_eq!(ddl.len(), 4);
        assert!(ddl[0].starts_with("CREATE KEYSPACE IF NOT EXISTS ks"));
        assert!(ddl[0].contains("'replication_factor': 2"));
        assert!(ddl[1].contains("CREATE TABLE IF NOT EXISTS ks.pages"));
        assert!(ddl[2].contains("CREATE TABLE IF NOT EXISTS ks.audit"));
        assert!(ddl[3].contains("CREATE INDEX IF NOT EXISTS pages_site_idx"));

        // The bootstrap session carries the extended timeout.
        assert!(
            cluster
                .applied()
                .iter()
                .all(|s| s.request_timeout == Some(EXTENDED_TIMEOUT))
        );
    }

    #[tokio::test]
    async fn test_bootstrap_noop_when_schema_current() {
        let driver = MemoryDriver::new();
        let cluster = driver.cluster();
        can_catalog(
            &cluster,
            &["ks"],
            &["pages"],
            &["pages_site_idx"],
        );

        let mut def = definition("pages", AccessModel::Content);
        def.secondary_indexes.push("site".to_string());
        let mut init = SchemaInitializer::new(
            Arc::new(driver),
            opts(),
            "ks",
            1,
            vec![def],
            Arc::new(LocalLock::new()),
        );
        init.run().await.unwrap();

        assert!(
            cluster
                .applied()
                .iter()
                .all(|s| s.cql.starts_with("SELECT")),
            "no DDL when nothing is missing"
        );
    }

    #[tokio::test]
    async fn test_bootstrap_drops_flagged_tables() {
        let driver = MemoryDriver::new();
        let cluster = driver.cluster();
        can_catalog(&cluster, &["ks"], &["legacy"], &[]);

        let mut legacy = definition("legacy", AccessModel::Generic);
        legacy.drop = true;
        let mut init = SchemaInitializer::new(
            Arc::new(driver),
            opts(),
            "ks",
            1,
            vec![legacy],
            Arc::new(LocalLock::new()),
        );
        init.run().await.unwrap();

        let ddl: Vec<String> = cluster
            .applied()
            .iter()
            .filter(|s| !s.cql.starts_with("SELECT"))
            .map(|s| s.cql.clone())
            .collect();
        assert_eq!(ddl, vec!["DROP TABLE IF EXISTS ks.legacy".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_retries_transient_failures() {
        let driver = MemoryDriver::new();
        let cluster = driver.cluster();
        cluster.fail_connects(2);
        can_catalog(&cluster, &["ks"], &["t"], &[]);

        let mut init = SchemaInitializer::new(
            Arc::new(driver),
            opts(),
            "ks",
            1,
            vec![definition("t", AccessModel::Generic)],
            Arc::new(LocalLock::new()),
        )
        .with_attempts(5);
        init.run().await.unwrap();
        assert_eq!(cluster.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_attempt_budget_exhausted() {
        let driver = MemoryDriver::new();
        driver.cluster().fail_connects(10);

        let mut init = SchemaInitializer::new(
            Arc::new(driver),
            opts(),
            "ks",
            1,
            vec![definition("t", AccessModel::Generic)],
            Arc::new(LocalLock::new()),
        )
        .with_attempts(3);
        let err = init.run().await.unwrap_err();
        assert!(matches!(
            err,
            ProxyError::InitializationFailed { attempts: 3 }
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_skips_without_definitions() {
        let driver = MemoryDriver::new();
        let cluster = driver.cluster();
        let mut init = SchemaInitializer::new(
            Arc::new(driver),
            opts(),
            "ks",
            1,
            Vec::new(),
            Arc::new(LocalLock::new()),
        );
        init.run().await.unwrap();
        assert_eq!(cluster.connect_count(), 0);
    }
}
