//! Transaction manager: strict two-phase locking over the KV store.
//!
//! Writes are buffered in a per-transaction write set and hit the store
//! (and therefore the log) only at commit. Locks are acquired as
//! operations arrive — shared for reads, exclusive for writes — and held
//! until commit or rollback, which gives conflict-serializable execution.
//! Readers of other keys never observe a write that later aborts.
//!
//! ## Commit sequence
//!
//! 1. Take the transaction out of the active table.
//! 2. Apply the write set to the store in order (one log record each).
//! 3. Append COMMIT and fsync — the durability point.
//! 4. Release all locks.
//!
//! A crash before step 3 leaves records without a COMMIT; recovery
//! discards them, which is what makes the apply loop atomic.

use crate::lock::{LockManager, LockMode};
use crate::store::KvStore;
use crate::vector::SearchHit;
use ember_core::{EmberError, EngineMode, Result, TxnId, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Transaction lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Accepting operations.
    Active,
    /// Durably applied.
    Committed,
    /// Discarded without touching the store.
    Aborted,
}

/// A buffered write.
#[derive(Debug, Clone)]
enum WriteOp {
    Put(Value),
    Delete,
}

/// Per-transaction state: an ordered, deduplicated write set. The read
/// set is implicit in the shared locks held.
#[derive(Debug)]
struct Transaction {
    state: TxnState,
    write_set: Vec<(String, WriteOp)>,
}

impl Transaction {
    fn new() -> Self {
        Transaction {
            state: TxnState::Active,
            write_set: Vec::new(),
        }
    }

    /// Record an operation, replacing any earlier one for the same key so
    /// the write set stays duplicate-free and ordered by first touch.
    fn stage(&mut self, key: &str, op: WriteOp) {
        match self.write_set.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = op,
            None => self.write_set.push((key.to_string(), op)),
        }
    }

    fn staged(&self, key: &str) -> Option<&WriteOp> {
        self.write_set
            .iter()
            .find_map(|(k, op)| (k == key).then_some(op))
    }
}

/// The transaction manager.
#[derive(Debug)]
pub struct TransactionManager {
    store: Arc<KvStore>,
    locks: LockManager,
    /// Monotone id allocator; the first transaction gets id 1.
    next_txn_id: AtomicU64,
    active: Mutex<HashMap<TxnId, Transaction>>,
}

impl TransactionManager {
    /// Create a manager over the given store.
    pub fn new(store: Arc<KvStore>) -> Self {
        TransactionManager {
            store,
            locks: LockManager::new(),
            next_txn_id: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a transaction, allocating a fresh id.
    pub fn begin(&self) -> TxnId {
        let txn = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        self.active.lock().insert(txn, Transaction::new());
        debug!(txn, "transaction begun");
        txn
    }

    /// Whether the id names an active transaction.
    pub fn is_active(&self, txn: TxnId) -> bool {
        self.active.lock().contains_key(&txn)
    }

    /// Read a key under a shared lock, held to commit/abort.
    ///
    /// The transaction's own write set wins over the store
    /// (read-your-writes): a buffered value is returned directly and a
    /// buffered delete reads as absent.
    pub fn read(&self, txn: TxnId, key: &str) -> Result<Option<Value>> {
        self.ensure_active(txn)?;
        self.locks.acquire(txn, key, LockMode::Shared)?;

        {
            let active = self.active.lock();
            let t = active
                .get(&txn)
                .ok_or(EmberError::TransactionNotActive(txn))?;
            if let Some(op) = t.staged(key) {
                return Ok(match op {
                    WriteOp::Put(value) => Some(value.clone()),
                    WriteOp::Delete => None,
                });
            }
        }

        match self.store.mode() {
            EngineMode::Text => Ok(self.store.get(key)?.map(Value::Text)),
            EngineMode::Vector { .. } => Ok(self.store.get_vector(key)?.map(Value::Vector)),
        }
    }

    /// Buffer a write under an exclusive lock, held to commit/abort.
    ///
    /// The payload is checked against the engine mode here, not at
    /// commit: a wrong-mode or wrong-dimension value is a constraint
    /// violation reported immediately, and the transaction stays active.
    pub fn write(&self, txn: TxnId, key: &str, value: Value) -> Result<()> {
        self.ensure_active(txn)?;
        self.store.check_payload(&value)?;
        self.locks.acquire(txn, key, LockMode::Exclusive)?;

        let mut active = self.active.lock();
        let t = active
            .get_mut(&txn)
            .ok_or(EmberError::TransactionNotActive(txn))?;
        t.stage(key, WriteOp::Put(value));
        Ok(())
    }

    /// Buffer a delete under an exclusive lock.
    ///
    /// Deleting a key that is neither stored nor buffered is a
    /// precondition failure reported immediately; the transaction stays
    /// active.
    pub fn remove(&self, txn: TxnId, key: &str) -> Result<()> {
        self.ensure_active(txn)?;
        self.locks.acquire(txn, key, LockMode::Exclusive)?;

        let mut active = self.active.lock();
        let t = active
            .get_mut(&txn)
            .ok_or(EmberError::TransactionNotActive(txn))?;

        match t.staged(key) {
            Some(WriteOp::Put(_)) => {}
            Some(WriteOp::Delete) | None => {
                if !self.store.contains(key) {
                    return Err(EmberError::NotFound {
                        key: key.to_string(),
                    });
                }
            }
        }
        t.stage(key, WriteOp::Delete);
        Ok(())
    }

    /// Commit: apply the write set in order, make it durable, release all
    /// locks. On any store error the COMMIT record is never written, so
    /// recovery discards the partial transaction; locks are released and
    /// the error propagates.
    pub fn commit(&self, txn: TxnId) -> Result<()> {
        let mut t = self
            .active
            .lock()
            .remove(&txn)
            .ok_or(EmberError::TransactionNotActive(txn))?;

        let result = self.apply(txn, &t);
        t.state = match &result {
            Ok(()) => TxnState::Committed,
            Err(_) => TxnState::Aborted,
        };
        self.locks.release_all(txn);

        debug!(
            txn,
            state = ?t.state,
            writes = t.write_set.len(),
            "transaction finished"
        );
        result
    }

    /// Roll back: discard the write set without touching the store or the
    /// log, release all locks.
    pub fn rollback(&self, txn: TxnId) -> Result<()> {
        let mut t = self
            .active
            .lock()
            .remove(&txn)
            .ok_or(EmberError::TransactionNotActive(txn))?;
        t.state = TxnState::Aborted;
        self.locks.release_all(txn);
        debug!(txn, state = ?t.state, "transaction rolled back");
        Ok(())
    }

    /// k-NN search. Read-only: needs no transaction and takes no locks.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.store.search(query, k)
    }

    fn apply(&self, txn: TxnId, t: &Transaction) -> Result<()> {
        // Read-only transactions have nothing to make durable; skip the
        // COMMIT record and its fsync.
        if t.write_set.is_empty() {
            return Ok(());
        }

        for (key, op) in &t.write_set {
            match op {
                WriteOp::Put(value) => self.store.put(txn, key, value.clone())?,
                WriteOp::Delete => self.store.remove(txn, key)?,
            }
        }
        self.store.commit(txn)
    }

    fn ensure_active(&self, txn: TxnId) -> Result<()> {
        if self.is_active(txn) {
            Ok(())
        } else {
            Err(EmberError::TransactionNotActive(txn))
        }
    }
}
