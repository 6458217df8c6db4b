//! On-disk log record format.
//!
//! # Record Layout
//!
//! Every record is self-delimiting through its two length fields. All
//! integers are little-endian, unaligned, no padding:
//!
//! ```text
//! ┌─────────┬───────────┬──────────────────┬────────────┬─────────────┬─────┬──────────────┬──────┐
//! │ type u8 │ txn_id u64│ timestamp_ns u64 │ is_vec u8  │ key_len u32 │ key │ data_len u32 │ data │
//! └─────────┴───────────┴──────────────────┴────────────┴─────────────┴─────┴──────────────┴──────┘
//! ```
//!
//! The fixed header is 26 bytes; the total record size is
//! `26 + key_len + data_len`. String payloads are raw bytes; vector
//! payloads are `data_len / 4` IEEE-754 32-bit floats.
//!
//! A record that declares more bytes than the buffer holds parses as
//! `InsufficientData` — the scanner treats that as the truncated tail left
//! by a crash mid-append, not as corruption.

use ember_core::{TxnId, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Fixed header size preceding the key bytes.
pub const RECORD_HEADER_SIZE: usize = 26;

/// Log record type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// A key/value write buffered until its transaction's COMMIT.
    Insert = 1,
    /// A key removal buffered until its transaction's COMMIT.
    Delete = 2,
    /// Marks all earlier records of the same transaction as durable.
    Commit = 3,
    /// Informational marker; recovery ignores it.
    Checkpoint = 4,
}

impl RecordType {
    /// Parse a type tag byte.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(RecordType::Insert),
            2 => Some(RecordType::Delete),
            3 => Some(RecordType::Commit),
            4 => Some(RecordType::Checkpoint),
            _ => None,
        }
    }
}

/// A single log record.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Record type tag.
    pub record_type: RecordType,
    /// Transaction that produced the record.
    pub txn_id: TxnId,
    /// Nanoseconds since the Unix epoch at append time.
    pub timestamp_ns: u64,
    /// The addressed key (empty for COMMIT/CHECKPOINT).
    pub key: String,
    /// Payload; the variant drives the on-disk `is_vector` flag.
    pub value: Value,
}

impl LogRecord {
    /// Create a record stamped with the current time.
    pub fn new(record_type: RecordType, txn_id: TxnId, key: impl Into<String>, value: Value) -> Self {
        LogRecord {
            record_type,
            txn_id,
            timestamp_ns: now_nanos(),
            key: key.into(),
            value,
        }
    }

    /// Create a record with an explicit timestamp.
    pub fn with_timestamp(
        record_type: RecordType,
        txn_id: TxnId,
        timestamp_ns: u64,
        key: impl Into<String>,
        value: Value,
    ) -> Self {
        LogRecord {
            record_type,
            txn_id,
            timestamp_ns,
            key: key.into(),
            value,
        }
    }

    /// Whether the payload is a vector (the on-disk mode flag).
    pub fn is_vector(&self) -> bool {
        self.value.is_vector()
    }

    /// Encoded size in bytes: header + key + payload.
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.key.len() + self.value.payload_len()
    }

    /// Serialize to the on-disk byte layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let key = self.key.as_bytes();
        let data_len = self.value.payload_len();
        let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + key.len() + data_len);

        buf.push(self.record_type as u8);
        buf.extend_from_slice(&self.txn_id.to_le_bytes());
        buf.extend_from_slice(&self.timestamp_ns.to_le_bytes());
        buf.push(self.is_vector() as u8);
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&(data_len as u32).to_le_bytes());
        match &self.value {
            Value::Text(s) => buf.extend_from_slice(s.as_bytes()),
            Value::Vector(v) => {
                for x in v {
                    buf.extend_from_slice(&x.to_le_bytes());
                }
            }
        }

        buf
    }

    /// Deserialize one record from the front of `bytes`.
    ///
    /// Returns `(record, bytes_consumed)` on success. `InsufficientData`
    /// means the buffer ends inside the record (a crash-truncated tail when
    /// reading from the log); any other error means the bytes are not a
    /// record at all.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), RecordError> {
        if bytes.len() < RECORD_HEADER_SIZE {
            return Err(RecordError::InsufficientData);
        }

        let record_type =
            RecordType::from_u8(bytes[0]).ok_or(RecordError::UnknownRecordType(bytes[0]))?;
        let txn_id = u64::from_le_bytes(bytes[1..9].try_into().unwrap());
        let timestamp_ns = u64::from_le_bytes(bytes[9..17].try_into().unwrap());
        let is_vector = match bytes[17] {
            0 => false,
            1 => true,
            flag => return Err(RecordError::InvalidFormat(format!("mode flag {flag}"))),
        };
        let key_len = u32::from_le_bytes(bytes[18..22].try_into().unwrap()) as usize;

        if bytes.len() < 22 + key_len + 4 {
            return Err(RecordError::InsufficientData);
        }
        let key_bytes = &bytes[22..22 + key_len];
        let data_len_at = 22 + key_len;
        let data_len =
            u32::from_le_bytes(bytes[data_len_at..data_len_at + 4].try_into().unwrap()) as usize;

        let data_at = data_len_at + 4;
        if bytes.len() < data_at + data_len {
            return Err(RecordError::InsufficientData);
        }
        let data = &bytes[data_at..data_at + data_len];

        let key = String::from_utf8(key_bytes.to_vec())
            .map_err(|_| RecordError::InvalidFormat("non-utf8 key".to_string()))?;

        let value = if is_vector {
            if data_len % 4 != 0 {
                return Err(RecordError::InvalidFormat(format!(
                    "vector payload length {data_len} is not a multiple of 4"
                )));
            }
            let floats = data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
                .collect();
            Value::Vector(floats)
        } else {
            let text = String::from_utf8(data.to_vec())
                .map_err(|_| RecordError::InvalidFormat("non-utf8 string payload".to_string()))?;
            Value::Text(text)
        };

        let record = LogRecord {
            record_type,
            txn_id,
            timestamp_ns,
            key,
            value,
        };
        Ok((record, data_at + data_len))
    }
}

/// Record parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The buffer ends inside the record. Expected at a crash-truncated
    /// log tail.
    #[error("insufficient data to parse record")]
    InsufficientData,

    /// The type tag byte is not a known record type.
    #[error("unknown record type: {0}")]
    UnknownRecordType(u8),

    /// The bytes are structurally not a record.
    #[error("invalid record format: {0}")]
    InvalidFormat(String),
}

/// Nanoseconds since the Unix epoch.
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_record_roundtrip() {
        let record = LogRecord::with_timestamp(
            RecordType::Insert,
            42,
            1_234_567_890,
            "account1",
            Value::text("100"),
        );

        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), 26 + 8 + 3);
        assert_eq!(record.encoded_len(), bytes.len());

        let (parsed, consumed) = LogRecord::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_vector_record_roundtrip() {
        let record = LogRecord::with_timestamp(
            RecordType::Insert,
            7,
            99,
            "vec1",
            Value::vector(vec![1.0, 0.0, 0.5, -2.25]),
        );

        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), 26 + 4 + 16);
        assert!(record.is_vector());

        let (parsed, consumed) = LogRecord::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_commit_record_empty_payload() {
        let record = LogRecord::with_timestamp(RecordType::Commit, 3, 0, "", Value::text(""));
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), RECORD_HEADER_SIZE);

        let (parsed, _) = LogRecord::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.record_type, RecordType::Commit);
        assert!(parsed.key.is_empty());
    }

    #[test]
    fn test_byte_layout_is_stable() {
        let record =
            LogRecord::with_timestamp(RecordType::Insert, 0x0102, 0x0304, "k", Value::text("v"));
        let bytes = record.to_bytes();

        assert_eq!(bytes[0], 1); // INSERT
        assert_eq!(&bytes[1..9], &0x0102u64.to_le_bytes());
        assert_eq!(&bytes[9..17], &0x0304u64.to_le_bytes());
        assert_eq!(bytes[17], 0); // string payload
        assert_eq!(&bytes[18..22], &1u32.to_le_bytes());
        assert_eq!(bytes[22], b'k');
        assert_eq!(&bytes[23..27], &1u32.to_le_bytes());
        assert_eq!(bytes[27], b'v');
    }

    #[test]
    fn test_truncated_tail_is_insufficient_data() {
        let record =
            LogRecord::with_timestamp(RecordType::Insert, 1, 2, "key", Value::text("value"));
        let bytes = record.to_bytes();

        // Every strict prefix must parse as InsufficientData, never panic.
        for cut in 0..bytes.len() {
            let result = LogRecord::from_bytes(&bytes[..cut]);
            assert_eq!(result, Err(RecordError::InsufficientData), "cut at {cut}");
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut bytes = LogRecord::with_timestamp(RecordType::Insert, 1, 2, "k", Value::text("v"))
            .to_bytes();
        bytes[0] = 99;
        assert_eq!(
            LogRecord::from_bytes(&bytes),
            Err(RecordError::UnknownRecordType(99))
        );
    }

    #[test]
    fn test_declared_length_beyond_buffer() {
        let mut bytes =
            LogRecord::with_timestamp(RecordType::Insert, 1, 2, "k", Value::text("v")).to_bytes();
        // Inflate data_len beyond the remaining bytes.
        let data_len_at = 22 + 1;
        bytes[data_len_at..data_len_at + 4].copy_from_slice(&1000u32.to_le_bytes());
        assert_eq!(
            LogRecord::from_bytes(&bytes),
            Err(RecordError::InsufficientData)
        );
    }

    #[test]
    fn test_records_in_sequence() {
        let records = vec![
            LogRecord::with_timestamp(RecordType::Insert, 1, 100, "a", Value::text("1")),
            LogRecord::with_timestamp(RecordType::Delete, 1, 200, "b", Value::text("")),
            LogRecord::with_timestamp(RecordType::Commit, 1, 300, "", Value::text("")),
        ];

        let mut all = Vec::new();
        for r in &records {
            all.extend_from_slice(&r.to_bytes());
        }

        let mut offset = 0;
        for expected in &records {
            let (parsed, consumed) = LogRecord::from_bytes(&all[offset..]).unwrap();
            assert_eq!(&parsed, expected);
            offset += consumed;
        }
        assert_eq!(offset, all.len());
    }
}
