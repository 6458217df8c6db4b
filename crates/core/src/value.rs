//! Unified value type.
//!
//! The engine runs in exactly one payload mode, but the value enum is
//! shared so the log format, write sets, and the facade can carry either
//! payload uniformly. The variant tags the log record's mode flag.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stored value: an opaque string or a fixed-dimension float vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Opaque string payload (text mode).
    Text(String),
    /// IEEE-754 32-bit float vector payload (vector mode).
    Vector(Vec<f32>),
}

impl Value {
    /// Build a text value.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Build a vector value.
    pub fn vector(v: Vec<f32>) -> Self {
        Value::Vector(v)
    }

    /// Borrow the string payload, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Vector(_) => None,
        }
    }

    /// Borrow the float payload, if this is a vector value.
    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            Value::Text(_) => None,
            Value::Vector(v) => Some(v),
        }
    }

    /// Whether this value carries a vector payload.
    pub fn is_vector(&self) -> bool {
        matches!(self, Value::Vector(_))
    }

    /// Encoded payload length in bytes (string bytes, or 4 per float).
    pub fn payload_len(&self) -> usize {
        match self {
            Value::Text(s) => s.len(),
            Value::Vector(v) => v.len() * 4,
        }
    }
}

impl fmt::Display for Value {
    /// Text prints verbatim; vectors print as `[f1,f2,...]` with six
    /// decimal places, matching the protocol printer.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{s}"),
            Value::Vector(v) => {
                write!(f, "[")?;
                for (i, x) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{x:.6}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Value::Vector(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let t = Value::text("hello");
        assert_eq!(t.as_text(), Some("hello"));
        assert_eq!(t.as_vector(), None);
        assert!(!t.is_vector());
        assert_eq!(t.payload_len(), 5);

        let v = Value::vector(vec![1.0, 2.0]);
        assert_eq!(v.as_vector(), Some(&[1.0f32, 2.0][..]));
        assert!(v.is_vector());
        assert_eq!(v.payload_len(), 8);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::text("abc").to_string(), "abc");
        assert_eq!(
            Value::vector(vec![1.0, 0.0]).to_string(),
            "[1.000000,0.000000]"
        );
    }
}
