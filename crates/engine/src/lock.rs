//! Two-phase locking: per-key shared/exclusive lock queues.
//!
//! One coarse mutex guards the whole lock table; each key carries its own
//! condition variable for wakeups. Waiting is FIFO-fair with writer
//! preference: a new request never jumps the queue, and pending shared
//! requests are granted back-to-back only until the first pending
//! exclusive request.
//!
//! There is no deadlock detection. Callers must acquire locks in a
//! consistent order (or keep to single-writer-per-key patterns); this is a
//! stated precondition of the engine, not a latent bug.

use ember_core::{EmberError, Result, TxnId};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Lock compatibility modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Compatible with other shared holders.
    Shared,
    /// Incompatible with every other lock.
    Exclusive,
}

/// Per-key lock state.
#[derive(Debug)]
struct LockState {
    shared: HashSet<TxnId>,
    exclusive: Option<TxnId>,
    /// Pending requests in arrival order.
    waiters: VecDeque<(TxnId, LockMode)>,
    /// Wakes this key's waiters; always used with the table mutex.
    wakeup: Arc<Condvar>,
}

impl LockState {
    fn new() -> Self {
        LockState {
            shared: HashSet::new(),
            exclusive: None,
            waiters: VecDeque::new(),
            wakeup: Arc::new(Condvar::new()),
        }
    }

    /// Whether `txn` currently holds a lock satisfying `mode`.
    fn holds(&self, txn: TxnId, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => self.exclusive == Some(txn) || self.shared.contains(&txn),
            LockMode::Exclusive => self.exclusive == Some(txn),
        }
    }

    /// Whether a brand-new request can be granted without queuing: nothing
    /// incompatible is held and nobody is already waiting (FIFO fairness).
    fn can_grant_now(&self, mode: LockMode) -> bool {
        if !self.waiters.is_empty() {
            return false;
        }
        match mode {
            LockMode::Shared => self.exclusive.is_none(),
            LockMode::Exclusive => self.exclusive.is_none() && self.shared.is_empty(),
        }
    }

    fn install(&mut self, txn: TxnId, mode: LockMode) {
        match mode {
            LockMode::Shared => {
                self.shared.insert(txn);
            }
            LockMode::Exclusive => {
                self.exclusive = Some(txn);
            }
        }
    }

    /// Grant pending requests in FIFO order. A head exclusive request is
    /// granted only once no holders remain, and granting stops after it;
    /// shared requests are granted back-to-back while no exclusive holder
    /// exists. Notifies waiters when anything was granted.
    fn grant_waiters(&mut self) {
        let mut granted = false;

        while let Some(&(txn, mode)) = self.waiters.front() {
            match mode {
                LockMode::Exclusive => {
                    if self.exclusive.is_none() && self.shared.is_empty() {
                        self.waiters.pop_front();
                        self.exclusive = Some(txn);
                        granted = true;
                    }
                    break;
                }
                LockMode::Shared => {
                    if self.exclusive.is_none() {
                        self.waiters.pop_front();
                        self.shared.insert(txn);
                        granted = true;
                    } else {
                        break;
                    }
                }
            }
        }

        if granted {
            self.wakeup.notify_all();
        }
    }

    fn is_idle(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_none() && self.waiters.is_empty()
    }
}

#[derive(Default)]
#[derive(Debug)]
struct LockTable {
    locks: HashMap<String, LockState>,
    /// Reverse map for release_all.
    by_txn: HashMap<TxnId, HashSet<String>>,
}

/// The lock manager.
#[derive(Debug)]
pub struct LockManager {
    table: Mutex<LockTable>,
}

impl LockManager {
    /// Create an empty lock manager.
    pub fn new() -> Self {
        LockManager {
            table: Mutex::new(LockTable::default()),
        }
    }

    /// Acquire a lock, blocking until compatible.
    ///
    /// Reentrant: a transaction already holding a compatible-or-stronger
    /// lock on the key returns immediately. A shared holder requesting
    /// exclusive gets `LockUpgrade` — upgrades are unsupported; writers
    /// acquire exclusive locks directly.
    pub fn acquire(&self, txn: TxnId, key: &str, mode: LockMode) -> Result<()> {
        let mut table = self.table.lock();

        let state = table
            .locks
            .entry(key.to_string())
            .or_insert_with(LockState::new);

        if state.holds(txn, mode) {
            return Ok(());
        }
        if mode == LockMode::Exclusive && state.shared.contains(&txn) {
            return Err(EmberError::LockUpgrade {
                key: key.to_string(),
            });
        }

        if state.can_grant_now(mode) {
            state.install(txn, mode);
        } else {
            state.waiters.push_back((txn, mode));
            let wakeup = state.wakeup.clone();
            loop {
                wakeup.wait(&mut table);
                // Our waiter entry pins the key's state in the table.
                let state = table.locks.get(key).expect("lock state vanished");
                if state.holds(txn, mode) {
                    break;
                }
            }
        }

        table.by_txn.entry(txn).or_default().insert(key.to_string());
        Ok(())
    }

    /// Release one lock held by `txn` on `key`, waking compatible waiters.
    /// Returns false when the transaction held nothing on the key.
    pub fn release(&self, txn: TxnId, key: &str) -> bool {
        let mut table = self.table.lock();
        if let Some(keys) = table.by_txn.get_mut(&txn) {
            keys.remove(key);
        }
        Self::release_one(&mut table, txn, key)
    }

    /// Release every lock held by `txn` (commit or abort).
    pub fn release_all(&self, txn: TxnId) {
        let mut table = self.table.lock();
        let Some(keys) = table.by_txn.remove(&txn) else {
            return;
        };
        for key in keys {
            Self::release_one(&mut table, txn, &key);
        }
    }

    fn release_one(table: &mut LockTable, txn: TxnId, key: &str) -> bool {
        let Some(state) = table.locks.get_mut(key) else {
            return false;
        };

        let held = state.shared.remove(&txn) || state.exclusive == Some(txn);
        if state.exclusive == Some(txn) {
            state.exclusive = None;
        }

        state.grant_waiters();
        if state.is_idle() {
            table.locks.remove(key);
        }
        held
    }

    /// Keys currently locked by `txn` (test visibility).
    pub fn held_keys(&self, txn: TxnId) -> Vec<String> {
        let table = self.table.lock();
        table
            .by_txn
            .get(&txn)
            .map(|keys| {
                let mut v: Vec<String> = keys.iter().cloned().collect();
                v.sort();
                v
            })
            .unwrap_or_default()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_shared_locks_coexist() {
        let lm = LockManager::new();
        lm.acquire(1, "k", LockMode::Shared).unwrap();
        lm.acquire(2, "k", LockMode::Shared).unwrap();
        lm.acquire(3, "k", LockMode::Shared).unwrap();

        assert_eq!(lm.held_keys(1), vec!["k"]);
        lm.release_all(1);
        lm.release_all(2);
        lm.release_all(3);
    }

    #[test]
    fn test_reentrant_acquire() {
        let lm = LockManager::new();
        lm.acquire(1, "k", LockMode::Exclusive).unwrap();
        // Same transaction, any mode: immediate success.
        lm.acquire(1, "k", LockMode::Exclusive).unwrap();
        lm.acquire(1, "k", LockMode::Shared).unwrap();
        lm.release_all(1);
    }

    #[test]
    fn test_upgrade_rejected() {
        let lm = LockManager::new();
        lm.acquire(1, "k", LockMode::Shared).unwrap();
        let err = lm.acquire(1, "k", LockMode::Exclusive).unwrap_err();
        assert!(matches!(err, EmberError::LockUpgrade { .. }));
        lm.release_all(1);
    }

    #[test]
    fn test_exclusive_blocks_until_release() {
        let lm = Arc::new(LockManager::new());
        lm.acquire(1, "k", LockMode::Exclusive).unwrap();

        let lm2 = Arc::clone(&lm);
        let acquired = Arc::new(AtomicUsize::new(0));
        let acquired2 = Arc::clone(&acquired);
        let handle = thread::spawn(move || {
            lm2.acquire(2, "k", LockMode::Exclusive).unwrap();
            acquired2.store(1, Ordering::SeqCst);
            lm2.release_all(2);
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(acquired.load(Ordering::SeqCst), 0, "lock jumped the holder");

        lm.release_all(1);
        handle.join().unwrap();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pending_writer_blocks_new_readers() {
        let lm = Arc::new(LockManager::new());
        lm.acquire(1, "k", LockMode::Shared).unwrap();

        // Writer queues behind the shared holder.
        let lm_w = Arc::clone(&lm);
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_w = Arc::clone(&order);
        let writer = thread::spawn(move || {
            lm_w.acquire(2, "k", LockMode::Exclusive).unwrap();
            order_w.lock().push("writer");
            lm_w.release_all(2);
        });
        thread::sleep(Duration::from_millis(50));

        // A late reader must not skip past the pending writer.
        let lm_r = Arc::clone(&lm);
        let order_r = Arc::clone(&order);
        let reader = thread::spawn(move || {
            lm_r.acquire(3, "k", LockMode::Shared).unwrap();
            order_r.lock().push("reader");
            lm_r.release_all(3);
        });
        thread::sleep(Duration::from_millis(50));

        lm.release_all(1);
        writer.join().unwrap();
        reader.join().unwrap();

        let order = order.lock();
        assert_eq!(order.as_slice(), ["writer", "reader"]);
    }

    #[test]
    fn test_shared_waiters_granted_back_to_back() {
        let lm = Arc::new(LockManager::new());
        lm.acquire(1, "k", LockMode::Exclusive).unwrap();

        let in_flight = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for txn in 2..6 {
            let lm = Arc::clone(&lm);
            let in_flight = Arc::clone(&in_flight);
            handles.push(thread::spawn(move || {
                lm.acquire(txn, "k", LockMode::Shared).unwrap();
                in_flight.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(30));
                lm.release_all(txn);
            }));
        }
        thread::sleep(Duration::from_millis(50));

        lm.release_all(1);
        handles.into_iter().for_each(|h| h.join().unwrap());
        assert_eq!(in_flight.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_release_all_frees_every_key() {
        let lm = LockManager::new();
        lm.acquire(1, "a", LockMode::Exclusive).unwrap();
        lm.acquire(1, "b", LockMode::Shared).unwrap();
        lm.acquire(1, "c", LockMode::Exclusive).unwrap();
        assert_eq!(lm.held_keys(1).len(), 3);

        lm.release_all(1);
        assert!(lm.held_keys(1).is_empty());

        // Everything immediately grantable again.
        lm.acquire(2, "a", LockMode::Exclusive).unwrap();
        lm.acquire(2, "b", LockMode::Exclusive).unwrap();
        lm.acquire(2, "c", LockMode::Exclusive).unwrap();
        lm.release_all(2);
    }

    #[test]
    fn test_release_returns_held_status() {
        let lm = LockManager::new();
        lm.acquire(1, "k", LockMode::Shared).unwrap();
        assert!(lm.release(1, "k"));
        assert!(!lm.release(1, "k"));
        assert!(!lm.release(9, "never"));
    }

    #[test]
    fn test_fifo_ordering_of_writers() {
        let lm = Arc::new(LockManager::new());
        lm.acquire(1, "k", LockMode::Exclusive).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for txn in 2..5 {
            let lm = Arc::clone(&lm);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                lm.acquire(txn, "k", LockMode::Exclusive).unwrap();
                order.lock().push(txn);
                lm.release_all(txn);
            }));
            // Stagger arrivals so queue order is deterministic.
            thread::sleep(Duration::from_millis(30));
        }

        lm.release_all(1);
        handles.into_iter().for_each(|h| h.join().unwrap());
        assert_eq!(order.lock().as_slice(), [2, 3, 4]);
    }
}
