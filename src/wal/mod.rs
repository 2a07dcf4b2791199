//! # Write-Ahead Log Module
//!
//! An append-only log of the logical operations applied to the active
//! memtable. Every `put` and `del` is written here *before* the memtable is
//! mutated, so a crash can always be replayed back to the last acknowledged
//! operation.
//!
//! ## On-disk layout
//!
//! ```text
//! for each record:
//!   bytes method      -- "put" or "del"
//!   u8    0x00
//!   u64   key         -- little-endian
//!   u64   length      -- value byte length, 0 for del
//!   bytes value       -- length bytes, empty for del
//!   u8    0x00
//! ```
//!
//! ## Lifecycle
//!
//! The active log lives at `<dir>/wal`. At rotation the engine renames it to
//! `<dir>/immwal` (deleting any stale one first), transferring ownership to
//! the immutable memtable; the background flush deletes `immwal` once the
//! level-0 SSTable is durably written.
//!
//! ## Replay
//!
//! [`WalIter`] streams records without loading the file into memory. A torn
//! tail — a record cut short by a crash mid-append — ends the replay with a
//! warning rather than an error: everything before it was acknowledged and
//! is recovered, everything after it never was.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, error, trace, warn};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// File name of the active log inside the store directory.
pub const WAL_FILE: &str = "wal";

/// File name of the immutable memtable's log.
pub const IMMWAL_FILE: &str = "immwal";

const METHOD_PUT: &[u8] = b"put";
const METHOD_DEL: &[u8] = b"del";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The log contains bytes that cannot be decoded as a record.
    #[error("corrupt WAL record: {0}")]
    Corrupt(String),
}

// ------------------------------------------------------------------------------------------------
// Record type
// ------------------------------------------------------------------------------------------------

/// A logical operation recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Insert or update a key.
    Put { key: u64, value: Vec<u8> },

    /// Delete a key.
    Del { key: u64 },
}

// ------------------------------------------------------------------------------------------------
// WAL Core
// ------------------------------------------------------------------------------------------------

/// Handle to an append-only log file.
///
/// Appends are buffered into a single `write_all` per record so a record is
/// either wholly in the OS page cache or not at all from this process's
/// point of view. The file is fsynced when the handle rotates out of the
/// active slot and on drop, not per record.
#[derive(Debug)]
pub struct Wal {
    file: File,
    path: PathBuf,
}

impl Wal {
    /// Opens (or creates) the log at `path` for appending.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "WAL opened");
        Ok(Self { file, path })
    }

    /// Appends a single record.
    pub fn append(&mut self, record: &WalRecord) -> Result<(), WalError> {
        let mut buf = Vec::with_capacity(32);
        match record {
            WalRecord::Put { key, value } => {
                buf.extend_from_slice(METHOD_PUT);
                buf.push(0);
                buf.extend_from_slice(&key.to_le_bytes());
                buf.extend_from_slice(&(value.len() as u64).to_le_bytes());
                buf.extend_from_slice(value);
                buf.push(0);
            }
            WalRecord::Del { key } => {
                buf.extend_from_slice(METHOD_DEL);
                buf.push(0);
                buf.extend_from_slice(&key.to_le_bytes());
                buf.extend_from_slice(&0u64.to_le_bytes());
                buf.push(0);
            }
        }
        self.file.write_all(&buf)?;
        trace!(len = buf.len(), "WAL record appended");
        Ok(())
    }

    /// Flushes the log to stable storage.
    pub fn sync(&self) -> Result<(), WalError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a streaming replay over the log at `path`.
    ///
    /// Returns `Ok(None)` when the file does not exist — an empty log and a
    /// missing log recover identically.
    pub fn replay<P: AsRef<Path>>(path: P) -> Result<Option<WalIter>, WalError> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "WAL replay started");
        Ok(Some(WalIter {
            reader: BufReader::new(file),
            offset: 0,
            done: false,
        }))
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Err(e) = self.file.sync_all() {
            error!(path = %self.path.display(), error = %e, "WAL sync failed on drop");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// WalIter
// ------------------------------------------------------------------------------------------------

/// Streaming replay iterator.
///
/// Yields decoded [`WalRecord`]s in append order. A clean end-of-file or a
/// torn trailing record terminates the stream; structurally invalid bytes
/// (an unknown method name, a missing terminator with data still following)
/// surface as [`WalError::Corrupt`].
pub struct WalIter {
    reader: BufReader<File>,
    offset: u64,
    done: bool,
}

impl WalIter {
    /// Reads one record, distinguishing "no more records" (`Ok(None)`) from
    /// a decode failure.
    fn read_record(&mut self) -> Result<Option<WalRecord>, WalError> {
        // Method name, 0x00-terminated.
        let mut method = Vec::with_capacity(4);
        let n = self.reader.read_until(0, &mut method)?;
        if n == 0 {
            return Ok(None);
        }
        if method.last() != Some(&0) {
            warn!(offset = self.offset, "WAL ends inside a method name");
            return Ok(None);
        }
        method.pop();

        let mut word = [0u8; 8];
        if read_exact_or_eof(&mut self.reader, &mut word)?.is_none() {
            warn!(offset = self.offset, "WAL ends inside a key");
            return Ok(None);
        }
        let key = u64::from_le_bytes(word);

        if read_exact_or_eof(&mut self.reader, &mut word)?.is_none() {
            warn!(offset = self.offset, "WAL ends inside a length");
            return Ok(None);
        }
        let length = u64::from_le_bytes(word) as usize;

        let mut value = vec![0u8; length];
        if read_exact_or_eof(&mut self.reader, &mut value)?.is_none() {
            warn!(offset = self.offset, length, "WAL ends inside a value");
            return Ok(None);
        }

        let mut terminator = [0u8; 1];
        if read_exact_or_eof(&mut self.reader, &mut terminator)?.is_none() {
            warn!(offset = self.offset, "WAL ends before record terminator");
            return Ok(None);
        }
        if terminator[0] != 0 {
            return Err(WalError::Corrupt(format!(
                "record at offset {} not 0x00-terminated",
                self.offset
            )));
        }

        self.offset += (method.len() + 1 + 8 + 8 + length + 1) as u64;

        match method.as_slice() {
            METHOD_PUT => Ok(Some(WalRecord::Put { key, value })),
            METHOD_DEL => {
                if length != 0 {
                    return Err(WalError::Corrupt(format!(
                        "del record for key {key} carries a value"
                    )));
                }
                Ok(Some(WalRecord::Del { key }))
            }
            other => Err(WalError::Corrupt(format!(
                "unknown method {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

impl Iterator for WalIter {
    type Item = Result<WalRecord, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// `read_exact` that reports a clean or mid-buffer EOF as `None` instead of
/// an error, so replay can treat torn tails as end-of-log.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<Option<()>, WalError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(Some(())),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}
