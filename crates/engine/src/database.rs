//! Database struct and open logic.
//!
//! `Database` is the embeddable entry point orchestrating the store, the
//! transaction manager, and the optional consensus register:
//!
//! 1. Validate the configuration
//! 2. Open the log and replay it (recovery)
//! 3. Build the vector index when a dimension is configured
//! 4. Build the CASPaxos register when a node id is configured
//!
//! ## Statement API vs transaction API
//!
//! Single-statement calls (`get`, `set`, `delete`, `insert_vector`,
//! `get_vector`) wrap an implicit transaction that begins, executes, and
//! commits — the auto-commit path. The explicit API (`begin` /
//! `read_in` / `write_in` / `delete_in` / `commit` / `rollback`) hands the
//! transaction boundary to the caller. `search` is read-only and takes no
//! transaction at all.

use crate::store::KvStore;
use crate::transaction::TransactionManager;
use crate::vector::{HnswConfig, SearchHit};
use ember_consensus::{CasRegister, ConsensusError};
use ember_core::{DatabaseConfig, EngineMode, Result, TxnId, Value};
use std::sync::Arc;
use tracing::info;

/// The embeddable database engine.
#[derive(Debug)]
pub struct Database {
    config: DatabaseConfig,
    store: Arc<KvStore>,
    txns: TransactionManager,
    register: Option<CasRegister>,
}

impl Database {
    /// Open a database with the given configuration, replaying the log.
    ///
    /// Fatal errors (unopenable log, mode mismatch against an existing
    /// log, corruption beyond the truncated-tail policy) surface here;
    /// the caller should treat them as startup failures.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        config.validate()?;

        let mode = config.mode();
        let store = Arc::new(KvStore::open(
            &config.log_path,
            mode,
            config.metric,
            HnswConfig::default(),
        )?);

        let register = config
            .node_id
            .map(|node_id| CasRegister::new(node_id, config.replicas.clone()));

        info!(
            log = %config.log_path.display(),
            %mode,
            consensus = register.is_some(),
            "database open"
        );

        Ok(Database {
            txns: TransactionManager::new(Arc::clone(&store)),
            store,
            register,
            config,
        })
    }

    /// The mode this instance runs in.
    pub fn mode(&self) -> EngineMode {
        self.store.mode()
    }

    /// The configuration the instance was opened with.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Auto-commit statement API
    // ------------------------------------------------------------------

    /// Read a text value (auto-commit).
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.auto_commit(|txn| {
            Ok(self
                .txns
                .read(txn, key)?
                .and_then(|v| v.as_text().map(str::to_string)))
        })
    }

    /// Write a text value (auto-commit).
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.auto_commit(|txn| self.txns.write(txn, key, Value::text(value)))
    }

    /// Delete a key (auto-commit). `NotFound` when absent.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.auto_commit(|txn| self.txns.remove(txn, key))
    }

    /// Insert a vector (auto-commit). The vector must match the
    /// configured dimension.
    pub fn insert_vector(&self, key: &str, vector: Vec<f32>) -> Result<()> {
        self.auto_commit(|txn| self.txns.write(txn, key, Value::Vector(vector)))
    }

    /// Read a vector (auto-commit).
    pub fn get_vector(&self, key: &str) -> Result<Option<Vec<f32>>> {
        self.auto_commit(|txn| {
            Ok(self
                .txns
                .read(txn, key)?
                .and_then(|v| v.as_vector().map(<[f32]>::to_vec)))
        })
    }

    /// k-nearest-neighbor search. Read-only; no transaction, no locks.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.txns.search(query, k)
    }

    // ------------------------------------------------------------------
    // Explicit transaction API
    // ------------------------------------------------------------------

    /// Begin an explicit transaction.
    pub fn begin(&self) -> TxnId {
        self.txns.begin()
    }

    /// Read a key inside a transaction (read-your-writes).
    pub fn read_in(&self, txn: TxnId, key: &str) -> Result<Option<Value>> {
        self.txns.read(txn, key)
    }

    /// Buffer a write inside a transaction.
    pub fn write_in(&self, txn: TxnId, key: &str, value: impl Into<Value>) -> Result<()> {
        self.txns.write(txn, key, value.into())
    }

    /// Buffer a delete inside a transaction.
    pub fn delete_in(&self, txn: TxnId, key: &str) -> Result<()> {
        self.txns.remove(txn, key)
    }

    /// Commit a transaction: apply its writes, fsync, release locks.
    pub fn commit(&self, txn: TxnId) -> Result<()> {
        self.txns.commit(txn)
    }

    /// Roll back a transaction: discard its writes, release locks.
    pub fn rollback(&self, txn: TxnId) -> Result<()> {
        self.txns.rollback(txn)
    }

    // ------------------------------------------------------------------
    // Consensus API (separate namespace)
    // ------------------------------------------------------------------

    /// Compare-and-swap on the consensus register. `expected = None`
    /// writes unconditionally.
    pub fn cas(
        &self,
        key: &str,
        expected: Option<&str>,
        new_value: &str,
    ) -> std::result::Result<(), ConsensusError> {
        self.register()?.cas(key, expected, new_value)
    }

    /// Local read of the consensus register.
    pub fn consensus_get(&self, key: &str) -> std::result::Result<Option<String>, ConsensusError> {
        Ok(self.register()?.get(key))
    }

    /// Unconditional consensus write.
    pub fn consensus_set(&self, key: &str, value: &str) -> std::result::Result<(), ConsensusError> {
        self.register()?.set(key, value)
    }

    /// Conditional consensus delete (empty-string tombstone).
    pub fn consensus_delete(
        &self,
        key: &str,
        expected: Option<&str>,
    ) -> std::result::Result<(), ConsensusError> {
        self.register()?.delete(key, expected)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Checkpoint hook: fsync the log. No truncation or compaction.
    pub fn checkpoint(&self) -> Result<()> {
        self.store.checkpoint()
    }

    /// Force the log to disk.
    pub fn flush(&self) -> Result<()> {
        self.store.sync()
    }

    fn register(&self) -> std::result::Result<&CasRegister, ConsensusError> {
        self.register.as_ref().ok_or(ConsensusError::Disabled)
    }

    /// Run one statement inside an implicit transaction: commit on
    /// success, roll back on error.
    fn auto_commit<T>(&self, f: impl FnOnce(TxnId) -> Result<T>) -> Result<T> {
        let txn = self.txns.begin();
        match f(txn) {
            Ok(value) => {
                self.txns.commit(txn)?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.txns.rollback(txn);
                Err(e)
            }
        }
    }
}
