//! Error types for the ember engine.
//!
//! `EmberError` is the unified error type for all engine operations. Every
//! public operation returns `Result<T, EmberError>`; there is no
//! exception-style control flow. The consensus register keeps its own error
//! type (`ember-consensus`) because it fronts a separate namespace with its
//! own failure modes.
//!
//! Errors split into two classes:
//!
//! - **Recoverable**: precondition failures (`NotFound`, inactive
//!   transaction) and constraint violations (`DimensionMismatch`,
//!   `WrongMode`, `LockUpgrade`). The engine state is unchanged and the
//!   caller may retry with different input.
//! - **Fatal** (`is_fatal()`): I/O faults, log corruption beyond the
//!   tolerated truncated tail, and a log written under a different engine
//!   mode. The in-memory state can no longer be trusted to match the log.

use crate::config::ConfigError;
use crate::types::TxnId;
use std::io;
use thiserror::Error;

/// Convenience alias used throughout the engine crates.
pub type Result<T> = std::result::Result<T, EmberError>;

/// Unified error type for engine operations.
#[derive(Debug, Error)]
pub enum EmberError {
    /// Key is not present in the store.
    #[error("key not found: {key}")]
    NotFound {
        /// The key that was looked up
        key: String,
    },

    /// A vector's length disagrees with the configured dimension.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured engine dimension
        expected: usize,
        /// Length of the offending vector
        actual: usize,
    },

    /// Operation is not available in the engine's configured mode.
    #[error("operation requires {required} mode, engine is in {actual} mode")]
    WrongMode {
        /// Mode the operation needs
        required: &'static str,
        /// Mode the engine was opened in
        actual: &'static str,
    },

    /// Recovery found a record whose payload mode disagrees with the
    /// configured engine mode. Reusing a log across `--dim` changes is a
    /// fatal startup fault.
    #[error("log record at offset {offset} disagrees with the configured engine mode")]
    ModeMismatch {
        /// Byte offset of the offending record
        offset: u64,
    },

    /// The transaction id does not name an active transaction.
    #[error("transaction {0} is not active")]
    TransactionNotActive(TxnId),

    /// A transaction holding a shared lock requested an exclusive lock on
    /// the same key. Upgrades are unsupported; writers acquire exclusive
    /// locks directly.
    #[error("shared-to-exclusive lock upgrade is not supported (key {key})")]
    LockUpgrade {
        /// The contested key
        key: String,
    },

    /// The log contains a malformed record that the truncated-tail policy
    /// does not cover.
    #[error("log corruption: {0}")]
    Corruption(String),

    /// Invalid configuration passed to `Database::open`.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Underlying file I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl EmberError {
    /// True for faults after which the engine must not continue: the
    /// in-memory state may no longer agree with the log.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EmberError::Io(_) | EmberError::ModeMismatch { .. } | EmberError::Corruption(_)
        )
    }
}
