//! KV store: the append log coupled with the active in-memory index.
//!
//! One store mutex guards the key→offset table and the text cache; the
//! HNSW index carries its own mutex (vector mode only). The log serializes
//! internally. Lock order is store → log / store → index, and searches
//! bypass the store mutex entirely (they take only the index snapshot).
//!
//! Log records are written by `put`/`remove` (the transaction manager
//! calls these at commit time, never at write buffering time) and made
//! durable by `commit`, which appends the COMMIT record and fsyncs.

use crate::vector::{HnswConfig, HnswIndex, SearchHit};
use ember_core::{DistanceMetric, EmberError, EngineMode, Result, TxnId, Value};
use ember_durability::{AppendLog, LogError, LogRecord, RecordError, RecordType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// The key-addressed store.
#[derive(Debug)]
pub struct KvStore {
    log: AppendLog,
    mode: EngineMode,
    /// Present exactly when the engine runs in vector mode.
    hnsw: Option<HnswIndex>,
    inner: Mutex<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    /// Key -> byte offset of its latest INSERT record.
    offsets: HashMap<String, u64>,
    /// Text-mode value cache fronting the log.
    strings: HashMap<String, String>,
}

impl KvStore {
    /// Open the store: open (or create) the log, build the configured
    /// index, and replay the log into memory. Fatal on a log written under
    /// a different mode or on I/O failure.
    pub fn open(
        log_path: &Path,
        mode: EngineMode,
        metric: DistanceMetric,
        hnsw_config: HnswConfig,
    ) -> Result<Self> {
        let log = AppendLog::open(log_path)?;
        let hnsw = mode
            .dimension()
            .map(|dim| HnswIndex::new(dim, metric, hnsw_config));

        let store = KvStore {
            log,
            mode,
            hnsw,
            inner: Mutex::new(StoreInner::default()),
        };
        store.recover()?;
        Ok(store)
    }

    /// The engine mode this store was opened in.
    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// Write a value under `key` for transaction `txn`: append the INSERT
    /// record, then apply it to the in-memory index.
    pub fn put(&self, txn: TxnId, key: &str, value: Value) -> Result<()> {
        self.check_payload(&value)?;

        let mut inner = self.inner.lock();
        let record = LogRecord::new(RecordType::Insert, txn, key, value.clone());
        let offset = self.log.append(&record)?;

        inner.offsets.insert(key.to_string(), offset);
        match value {
            Value::Text(s) => {
                inner.strings.insert(key.to_string(), s);
            }
            Value::Vector(v) => {
                self.index()?.insert(key, v, offset)?;
            }
        }
        Ok(())
    }

    /// Read a text value. Serves from the cache; on a cache miss with a
    /// known offset, reads the INSERT record back from the log and
    /// re-populates the cache.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        if self.mode.is_vector() {
            return Err(self.wrong_mode("text"));
        }

        let mut inner = self.inner.lock();
        if let Some(value) = inner.strings.get(key) {
            return Ok(Some(value.clone()));
        }
        let Some(&offset) = inner.offsets.get(key) else {
            return Ok(None);
        };

        let record = self.log.read_at(offset).map_err(log_error)?;
        match (record.record_type, record.value) {
            (RecordType::Insert, Value::Text(s)) => {
                inner.strings.insert(key.to_string(), s.clone());
                Ok(Some(s))
            }
            _ => Err(EmberError::Corruption(format!(
                "offset table for key {key} points at a non-INSERT record"
            ))),
        }
    }

    /// Read a vector value through the index.
    pub fn get_vector(&self, key: &str) -> Result<Option<Vec<f32>>> {
        Ok(self.index()?.get(key).map(|(v, _)| v))
    }

    /// Whether the key is currently live (any mode).
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().offsets.contains_key(key)
    }

    /// k-NN search. Read-only; takes only the index mutex.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let index = self.index()?;
        if query.len() != index.dimension() {
            return Err(EmberError::DimensionMismatch {
                expected: index.dimension(),
                actual: query.len(),
            });
        }
        Ok(index.search(query, k))
    }

    /// Remove `key` for transaction `txn`: append the DELETE record, drop
    /// the key from the in-memory maps, tombstone the index.
    pub fn remove(&self, txn: TxnId, key: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.offsets.contains_key(key) {
            return Err(EmberError::NotFound {
                key: key.to_string(),
            });
        }

        let record = LogRecord::new(RecordType::Delete, txn, key, self.empty_value());
        self.log.append(&record)?;

        inner.offsets.remove(key);
        inner.strings.remove(key);
        if let Some(hnsw) = &self.hnsw {
            hnsw.remove(key);
        }
        Ok(())
    }

    /// Append the COMMIT record for `txn` and fsync. This is the
    /// durability point: records without a following COMMIT are discarded
    /// by recovery.
    pub fn commit(&self, txn: TxnId) -> Result<()> {
        let record = LogRecord::new(RecordType::Commit, txn, "", self.empty_value());
        self.log.append(&record)?;
        self.log.sync()?;
        Ok(())
    }

    /// Checkpoint hook: fsync only; the log is never truncated.
    pub fn checkpoint(&self) -> Result<()> {
        self.log.checkpoint()?;
        Ok(())
    }

    /// Force the log to disk.
    pub fn sync(&self) -> Result<()> {
        self.log.sync()?;
        Ok(())
    }

    /// Rebuild in-memory state from the log.
    ///
    /// Records are buffered per transaction and applied — in log order,
    /// with their true byte offsets — only when that transaction's COMMIT
    /// is seen. Buffers still open at the end of the scan belong to
    /// transactions whose COMMIT never landed; they are discarded.
    fn recover(&self) -> Result<()> {
        let entries = self.log.scan().map_err(log_error)?;
        let scanned = entries.len();

        // A torn tail is cut off physically so later appends don't end up
        // stranded behind the partial record.
        let valid_end = entries
            .last()
            .map(|(offset, record)| offset + record.encoded_len() as u64)
            .unwrap_or(0);
        if valid_end < self.log.size() {
            warn!(
                valid_end,
                log_size = self.log.size(),
                "truncating torn log tail"
            );
            self.log.truncate_to(valid_end)?;
        }

        let mut uncommitted: HashMap<TxnId, Vec<(u64, LogRecord)>> = HashMap::new();
        let mut applied = 0usize;

        for (offset, record) in entries {
            if record.is_vector() != self.mode.is_vector() {
                return Err(EmberError::ModeMismatch { offset });
            }

            match record.record_type {
                RecordType::Checkpoint => {}
                RecordType::Commit => {
                    if let Some(batch) = uncommitted.remove(&record.txn_id) {
                        for (rec_offset, rec) in batch {
                            self.apply_recovered(rec_offset, rec)?;
                            applied += 1;
                        }
                    }
                }
                RecordType::Insert | RecordType::Delete => {
                    uncommitted
                        .entry(record.txn_id)
                        .or_default()
                        .push((offset, record));
                }
            }
        }

        if !uncommitted.is_empty() {
            let mut txns: Vec<TxnId> = uncommitted.keys().copied().collect();
            txns.sort_unstable();
            warn!(
                ?txns,
                "recovery discarded records of transactions without a COMMIT"
            );
        }

        info!(
            scanned,
            applied,
            mode = %self.mode,
            log_bytes = self.log.size(),
            "recovery complete"
        );
        Ok(())
    }

    /// Apply one committed record during recovery.
    fn apply_recovered(&self, offset: u64, record: LogRecord) -> Result<()> {
        let mut inner = self.inner.lock();
        match record.record_type {
            RecordType::Insert => {
                inner.offsets.insert(record.key.clone(), offset);
                match record.value {
                    Value::Text(s) => {
                        inner.strings.insert(record.key, s);
                    }
                    Value::Vector(v) => {
                        self.index()?.insert(&record.key, v, offset)?;
                    }
                }
            }
            RecordType::Delete => {
                inner.offsets.remove(&record.key);
                inner.strings.remove(&record.key);
                if let Some(hnsw) = &self.hnsw {
                    hnsw.remove(&record.key);
                }
            }
            RecordType::Commit | RecordType::Checkpoint => {}
        }
        Ok(())
    }

    /// Mode check for incoming payloads. The transaction manager calls
    /// this at write-buffering time so constraint violations surface
    /// before commit and leave the transaction active.
    pub(crate) fn check_payload(&self, value: &Value) -> Result<()> {
        match (self.mode, value) {
            (EngineMode::Text, Value::Text(_)) => Ok(()),
            (EngineMode::Vector { dim }, Value::Vector(v)) => {
                if v.len() == dim {
                    Ok(())
                } else {
                    Err(EmberError::DimensionMismatch {
                        expected: dim,
                        actual: v.len(),
                    })
                }
            }
            (EngineMode::Text, Value::Vector(_)) => Err(self.wrong_mode("vector")),
            (EngineMode::Vector { .. }, Value::Text(_)) => Err(self.wrong_mode("text")),
        }
    }

    /// Empty payload tagged with the engine's mode flag, so DELETE and
    /// COMMIT records pass the recovery mode check uniformly.
    fn empty_value(&self) -> Value {
        if self.mode.is_vector() {
            Value::Vector(Vec::new())
        } else {
            Value::Text(String::new())
        }
    }

    fn index(&self) -> Result<&HnswIndex> {
        self.hnsw.as_ref().ok_or_else(|| self.wrong_mode("vector"))
    }

    fn wrong_mode(&self, required: &'static str) -> EmberError {
        EmberError::WrongMode {
            required,
            actual: self.mode.name(),
        }
    }
}

/// Fold log-layer errors into the engine error space.
fn log_error(e: LogError) -> EmberError {
    match e {
        LogError::Io(e) => EmberError::Io(e),
        LogError::ShortRead => EmberError::Corruption("record read ran past end of log".into()),
        LogError::OutOfBounds { offset, size } => {
            EmberError::Corruption(format!("offset {offset} beyond log size {size}"))
        }
        LogError::Corrupt { offset, source } => match source {
            RecordError::InsufficientData => {
                EmberError::Corruption(format!("record at offset {offset} is truncated"))
            }
            other => EmberError::Corruption(format!("record at offset {offset}: {other}")),
        },
    }
}
