//! Append-only log file.
//!
//! The log is a single flat file of length-prefixed records (see
//! [`crate::format`]). Records are only ever appended; nothing is
//! overwritten or reordered. All operations serialize on one mutex around
//! the file handle and the write cursor.
//!
//! Durability is two-staged: `append` pushes the full record to the OS
//! before returning, and `sync` (fsync) is caller-driven — the store calls
//! it once per COMMIT record, which is the durability point.

use crate::format::{LogRecord, RecordError, RECORD_HEADER_SIZE};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Append-only record log.
#[derive(Debug)]
pub struct AppendLog {
    path: PathBuf,
    inner: Mutex<LogInner>,
}

#[derive(Debug)]
struct LogInner {
    file: File,
    /// Monotone write cursor; equals the file length.
    offset: u64,
}

impl AppendLog {
    /// Open the log at `path`, creating it when absent. The write cursor
    /// starts at the current end of the file.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let offset = file.seek(SeekFrom::End(0))?;

        Ok(AppendLog {
            path,
            inner: Mutex::new(LogInner { file, offset }),
        })
    }

    /// Append a record, returning the byte offset at which it begins.
    ///
    /// The record reaches the OS before this returns; durability to disk
    /// requires a subsequent [`sync`](Self::sync).
    pub fn append(&self, record: &LogRecord) -> io::Result<u64> {
        let bytes = record.to_bytes();
        let mut inner = self.inner.lock();

        let start = inner.offset;
        inner.file.seek(SeekFrom::Start(start))?;
        inner.file.write_all(&bytes)?;
        inner.file.flush()?;
        inner.offset += bytes.len() as u64;

        Ok(start)
    }

    /// Read the single record beginning at `offset`.
    pub fn read_at(&self, offset: u64) -> Result<LogRecord, LogError> {
        let mut inner = self.inner.lock();
        if offset >= inner.offset {
            return Err(LogError::OutOfBounds {
                offset,
                size: inner.offset,
            });
        }

        inner.file.seek(SeekFrom::Start(offset))?;
        read_record_from(&mut inner.file, offset)
    }

    /// Scan the whole log in order, pairing every record with its starting
    /// byte offset.
    ///
    /// A partial record at the tail — a crash mid-append — silently ends
    /// the scan: everything from the first short record onward is treated
    /// as if it were never written. Any other malformed record is real
    /// corruption and fails the scan.
    pub fn scan(&self) -> Result<Vec<(u64, LogRecord)>, LogError> {
        let mut inner = self.inner.lock();
        inner.file.seek(SeekFrom::Start(0))?;

        let mut buf = Vec::new();
        inner.file.read_to_end(&mut buf)?;

        let mut records = Vec::new();
        let mut pos = 0usize;
        while pos < buf.len() {
            match LogRecord::from_bytes(&buf[pos..]) {
                Ok((record, consumed)) => {
                    records.push((pos as u64, record));
                    pos += consumed;
                }
                Err(RecordError::InsufficientData) => {
                    warn!(
                        offset = pos,
                        trailing_bytes = buf.len() - pos,
                        "log scan stopped at truncated tail"
                    );
                    break;
                }
                Err(e) => {
                    return Err(LogError::Corrupt {
                        offset: pos as u64,
                        source: e,
                    });
                }
            }
        }

        Ok(records)
    }

    /// Force all appended records to disk (fsync).
    pub fn sync(&self) -> io::Result<()> {
        self.inner.lock().file.sync_all()
    }

    /// Cut the file back to `offset`, removing a torn tail found by
    /// [`scan`](Self::scan). Recovery-only: the offset must be the end of
    /// the last complete record, so no committed bytes are ever removed.
    /// Without this, appends after a torn tail would sit behind the
    /// partial record and be unreachable to the next scan.
    pub fn truncate_to(&self, offset: u64) -> io::Result<()> {
        let mut inner = self.inner.lock();
        inner.file.set_len(offset)?;
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.sync_all()?;
        inner.offset = offset;
        Ok(())
    }

    /// Checkpoint hook. Currently fsync only; the log is never truncated
    /// or compacted.
    pub fn checkpoint(&self) -> io::Result<()> {
        self.sync()
    }

    /// Current log size in bytes (the next append offset).
    pub fn size(&self) -> u64 {
        self.inner.lock().offset
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read exactly one record from the file's current position.
fn read_record_from(file: &mut File, offset: u64) -> Result<LogRecord, LogError> {
    let mut header = [0u8; RECORD_HEADER_SIZE];
    file.read_exact(&mut header).map_err(eof_as_short_read)?;

    let key_len = u32::from_le_bytes(header[18..22].try_into().unwrap()) as usize;

    let mut rest = vec![0u8; key_len + 4];
    file.read_exact(&mut rest).map_err(eof_as_short_read)?;
    let data_len =
        u32::from_le_bytes(rest[key_len..key_len + 4].try_into().unwrap()) as usize;

    let mut data = vec![0u8; data_len];
    file.read_exact(&mut data).map_err(eof_as_short_read)?;

    let mut bytes = Vec::with_capacity(RECORD_HEADER_SIZE + key_len + 4 + data_len);
    bytes.extend_from_slice(&header);
    bytes.extend_from_slice(&rest);
    bytes.extend_from_slice(&data);

    let (record, _) =
        LogRecord::from_bytes(&bytes).map_err(|source| LogError::Corrupt { offset, source })?;
    Ok(record)
}

fn eof_as_short_read(e: io::Error) -> LogError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        LogError::ShortRead
    } else {
        LogError::Io(e)
    }
}

/// Log access errors.
#[derive(Debug, Error)]
pub enum LogError {
    /// Underlying file I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A positioned read ran off the end of the file.
    #[error("record read ran past end of log")]
    ShortRead,

    /// The given offset is not inside the log.
    #[error("offset {offset} is beyond log size {size}")]
    OutOfBounds {
        /// Requested offset
        offset: u64,
        /// Current log size
        size: u64,
    },

    /// A record failed to parse for a reason truncation does not explain.
    #[error("corrupt record at offset {offset}: {source}")]
    Corrupt {
        /// Byte offset of the bad record
        offset: u64,
        /// Underlying parse failure
        source: RecordError,
    },
}
