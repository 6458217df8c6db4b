//! Foundational types shared by every engine crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction identifier. Allocated monotonically by the transaction
/// manager, starting at 1; id 0 is never issued.
pub type TxnId = u64;

/// Distance metric for vector similarity.
///
/// All engine distances are "lower = closer". See
/// `ember-engine::vector::distance` for the definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// L2 distance: sqrt of the sum of squared component differences.
    Euclidean,
    /// Cosine distance: 1 - cos(a, b). Returns 1.0 when either norm is zero.
    Cosine,
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::Euclidean => write!(f, "euclidean"),
            DistanceMetric::Cosine => write!(f, "cosine"),
        }
    }
}

/// Engine payload mode, fixed at open time.
///
/// A single instance stores either string values or fixed-dimension float
/// vectors, never both. Every log record carries a mode flag so recovery
/// can reject a log written under the other mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineMode {
    /// Key -> opaque string value.
    Text,
    /// Key -> vector of exactly `dim` 32-bit floats.
    Vector {
        /// Configured dimension; every stored vector has this length.
        dim: usize,
    },
}

impl EngineMode {
    /// Whether this mode stores vector payloads.
    pub fn is_vector(&self) -> bool {
        matches!(self, EngineMode::Vector { .. })
    }

    /// The configured dimension, if any.
    pub fn dimension(&self) -> Option<usize> {
        match self {
            EngineMode::Text => None,
            EngineMode::Vector { dim } => Some(*dim),
        }
    }

    /// Short mode name for error messages.
    pub fn name(&self) -> &'static str {
        match self {
            EngineMode::Text => "text",
            EngineMode::Vector { .. } => "vector",
        }
    }
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineMode::Text => write!(f, "text"),
            EngineMode::Vector { dim } => write!(f, "vector(dim={dim})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_accessors() {
        assert!(!EngineMode::Text.is_vector());
        assert_eq!(EngineMode::Text.dimension(), None);
        assert_eq!(EngineMode::Text.name(), "text");

        let v = EngineMode::Vector { dim: 4 };
        assert!(v.is_vector());
        assert_eq!(v.dimension(), Some(4));
        assert_eq!(v.to_string(), "vector(dim=4)");
    }
}
