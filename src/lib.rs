//! # emberdb
//!
//! An embeddable, single-node database engine serving two access patterns
//! over one durable, key-addressed store:
//!
//! - **Key → string value** with ACID transactions (begin/commit/rollback,
//!   auto-commit for single statements), and
//! - **Key → fixed-dimension float vector** with approximate
//!   nearest-neighbor search over an HNSW graph index.
//!
//! An optional CASPaxos-style register adds linearizable compare-and-swap
//! on a separate namespace, intended for coordination values rather than
//! bulk data.
//!
//! # Quick Start
//!
//! ```no_run
//! use emberdb::{Database, DatabaseConfig};
//!
//! fn main() -> emberdb::Result<()> {
//!     // Text mode: key -> string with transactions.
//!     let db = Database::open(DatabaseConfig::new("./ember.log"))?;
//!
//!     db.set("user:name", "Alice")?;
//!     assert_eq!(db.get("user:name")?, Some("Alice".into()));
//!
//!     // Explicit transactions with read-your-writes.
//!     let txn = db.begin();
//!     db.write_in(txn, "account1", "100")?;
//!     db.write_in(txn, "account2", "200")?;
//!     db.commit(txn)?;
//!
//!     Ok(())
//! }
//! ```
//!
//! Vector mode is selected by configuring a dimension:
//!
//! ```no_run
//! use emberdb::{Database, DatabaseConfig};
//!
//! fn main() -> emberdb::Result<()> {
//!     let db = Database::open(DatabaseConfig::new("./vectors.log").with_dimension(4))?;
//!
//!     db.insert_vector("vec1", vec![1.0, 0.0, 0.0, 0.0])?;
//!     let hits = db.search(&[1.0, 0.1, 0.0, 0.0], 3)?;
//!     assert_eq!(hits[0].key, "vec1");
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The [`Database`] struct is the entry point. Underneath sit four layers:
//! an append-only log (durability and recovery), the HNSW index or a
//! string map (the active in-memory index), a shared/exclusive lock
//! manager (strict two-phase locking), and the transaction manager that
//! buffers write sets until commit. Writes become durable when the COMMIT
//! record is fsynced; recovery replays only transactions whose COMMIT
//! landed.
//!
//! A single instance runs in exactly one mode — text or vector — fixed at
//! open time; reusing a log across modes is a fatal startup fault.

// Re-export the public API from ember-engine
pub use ember_engine::*;
