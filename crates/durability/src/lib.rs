//! Durability layer: the append-only log.
//!
//! This crate owns the on-disk record format and the log file itself:
//! - `format`: exact byte layout of records, parse/serialize
//! - `log`: the mutexed append/read/scan/sync surface
//!
//! Higher layers (the KV store) decide *what* to append and *when* to
//! fsync; this crate only guarantees that appended bytes are never
//! overwritten or reordered and that a crash-truncated tail reads back as
//! a clean end-of-log.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod format;
pub mod log;

pub use format::{now_nanos, LogRecord, RecordError, RecordType, RECORD_HEADER_SIZE};
pub use log::{AppendLog, LogError};
