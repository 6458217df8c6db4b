//! Core types and traits for ember
//!
//! This crate defines the foundational types used throughout the system:
//! - TxnId: transaction identifiers
//! - Value: unified string-or-vector payload
//! - EngineMode / DistanceMetric: instance-wide mode selection
//! - DatabaseConfig: open-time configuration
//! - EmberError: the unified error hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod types;
pub mod value;

pub use config::{ConfigError, DatabaseConfig, DEFAULT_LOG_FILE};
pub use error::{EmberError, Result};
pub use types::{DistanceMetric, EngineMode, TxnId};
pub use value::Value;
