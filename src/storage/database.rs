// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded database handle backed by redb (pure Rust, ACID).

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use redb::{Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition};

use super::transaction::TransactionManager;
use crate::crypto::CryptoError;

// =============================================================================
// Table Definitions
// =============================================================================

/// Store-level metadata: key → u64.
pub(crate) const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Encrypted credentials: `{org_id}/{resource_id}/{kind}` → JSON bytes.
pub(crate) const CREDENTIALS: TableDefinition<&str, &[u8]> = TableDefinition::new("credentials");

/// Append-only audit trail: 40-byte composite key → JSON bytes.
pub(crate) const AUDIT_RECORDS: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("audit_records");

const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Current on-disk schema version.
pub const SCHEMA_VERSION: u64 = 1;

/// Upper bound for opening the database and running migrations.
const MIGRATION_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("redb database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    Redb(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid audit record: {0}")]
    InvalidAuditRecord(String),

    #[error("audit record {0} already exists; the audit trail is append-only")]
    AppendOnlyViolation(String),

    #[error("schema version {found} is not supported (expected {expected})")]
    SchemaMismatch { found: u64, expected: u64 },

    #[error("transaction deadline exceeded")]
    DeadlineExceeded,

    #[error("transaction abandoned by its caller")]
    Cancelled,

    #[error("{source}; rollback also failed: {rollback}")]
    RollbackFailed {
        source: Box<StorageError>,
        rollback: redb::StorageError,
    },

    #[error("storage worker failed: {0}")]
    Worker(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// Store
// =============================================================================

/// Shared handle to the embedded database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) the database at `path` and bring its schema up to date.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        let store = Self { db: Arc::new(db) };
        store.migrate()?;

        tracing::info!(path = %path.display(), schema_version = SCHEMA_VERSION, "Database ready");
        Ok(store)
    }

    pub(crate) fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Begin a read-only snapshot of committed state.
    pub fn begin_read(&self) -> StorageResult<ReadTransaction> {
        Ok(self.db.begin_read()?)
    }

    /// Read the stored schema version.
    pub fn schema_version(&self) -> StorageResult<u64> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(META)?;
        let version = table
            .get(SCHEMA_VERSION_KEY)?
            .map(|v| v.value())
            .ok_or_else(|| StorageError::NotFound("schema version".to_string()))?;
        Ok(version)
    }

    /// Run a read against this store on the blocking pool.
    pub async fn read_async<T, F>(&self, read: F) -> StorageResult<T>
    where
        F: FnOnce(&Store) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || read(&store))
            .await
            .map_err(|e| StorageError::Worker(e.to_string()))?
    }

    /// Verify the database answers a read within `timeout`.
    pub async fn health_check(&self, timeout: Duration) -> StorageResult<()> {
        let probe = self.read_async(|store| store.schema_version().map(|_| ()));

        match tokio::time::timeout(timeout, probe).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::DeadlineExceeded),
        }
    }

    /// Create all tables and stamp the schema version.
    ///
    /// Idempotent; refuses to run against a newer schema.
    fn migrate(&self) -> StorageResult<()> {
        let deadline = Instant::now() + MIGRATION_TIMEOUT;

        TransactionManager::new(self).run(Some(deadline), |scope| {
            let txn = scope.txn();
            let mut meta = txn.open_table(META)?;
            let _ = txn.open_table(CREDENTIALS)?;
            let _ = txn.open_table(AUDIT_RECORDS)?;

            let found = meta.get(SCHEMA_VERSION_KEY)?.map(|v| v.value());
            match found {
                Some(version) if version > SCHEMA_VERSION => Err(StorageError::SchemaMismatch {
                    found: version,
                    expected: SCHEMA_VERSION,
                }),
                Some(version) if version == SCHEMA_VERSION => Ok(()),
                previous => {
                    meta.insert(SCHEMA_VERSION_KEY, SCHEMA_VERSION)?;
                    tracing::info!(
                        from = ?previous,
                        to = SCHEMA_VERSION,
                        "Migrated database schema"
                    );
                    Ok(())
                }
            }
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
