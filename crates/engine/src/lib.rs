//! Database engine for ember
//!
//! This crate orchestrates the lower layers into the embeddable engine:
//! - `vector`: distance metrics and the HNSW proximity graph
//! - `lock`: per-key shared/exclusive lock queues (strict 2PL)
//! - `store`: the append log coupled with the active in-memory index
//! - `transaction`: write-set buffering, commit/rollback
//! - `database`: the `Database` facade tying everything together
//!
//! The engine is the only layer that knows about cross-component
//! coordination: lock acquisition order, the commit sequence, and
//! recovery-at-open.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod database;
pub mod lock;
pub mod store;
pub mod transaction;
pub mod vector;

pub use database::Database;
pub use lock::{LockManager, LockMode};
pub use store::KvStore;
pub use transaction::{TransactionManager, TxnState};
pub use vector::{HnswConfig, HnswIndex, SearchHit};

// Re-export the configuration and value types callers need alongside the
// facade.
pub use ember_consensus::{CasRegister, ConsensusError};
pub use ember_core::{
    DatabaseConfig, DistanceMetric, EmberError, EngineMode, Result, TxnId, Value,
};
