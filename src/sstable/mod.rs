//! # Sorted Table Module
//!
//! The immutable on-disk run format. An SSTable is written once — by a
//! memtable flush or by compaction — and never modified afterwards.
//!
//! ## On-disk layout
//!
//! Little-endian, host-native 8-byte unsigned integers, no padding:
//!
//! ```text
//! Body:
//!   for each record in ascending-key order:
//!     u64 key
//!     bytes value
//!     u8  0x00
//! Footer (same order):
//!   for each record:
//!     u64 key
//!     u64 offset        -- byte offset of `u64 key` in the body
//!   u64 n               -- number of records
//! ```
//!
//! The trailing count plus the fixed-width footer let the in-memory index
//! be rebuilt from the end of the file without scanning the body.
//!
//! Tombstones are written like any other record with an empty value; the
//! deleted bit travels in the in-memory index, not in the file.
//!
//! ## Reading
//!
//! Tables are immutable, so readers simply map the file ([`memmap2`]) and
//! slice into it. A value is the byte run from `offset + 8` up to its 0x00
//! terminator. [`Table::entries`] validates the footer against the file
//! bounds; any violation is [`TableError::Corrupt`] and the recovery path
//! decides whether to skip the file.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use memmap2::Mmap;
use thiserror::Error;
use tracing::trace;

use crate::memtable::Record;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable reads and writes.
#[derive(Debug, Error)]
pub enum TableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file does not decode as a well-formed table.
    #[error("corrupt SSTable: {0}")]
    Corrupt(String),
}

// ------------------------------------------------------------------------------------------------
// TableEntry
// ------------------------------------------------------------------------------------------------

/// One record's directory data: where its value starts and how long it is.
///
/// Produced in record order both by [`write_table`] (for immediate index
/// insertion) and by [`Table::entries`] (for index recovery).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEntry {
    /// The record key.
    pub key: u64,

    /// Byte offset of the record (its inline key) within the body.
    pub offset: u64,

    /// Value length in bytes.
    pub length: u64,
}

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// Writes `records` — already in ascending key order — as a complete
/// SSTable at `path`, fsyncing before returning.
///
/// Returns the directory entries in record order so the caller can insert
/// them into the index and filter without re-reading the file.
pub fn write_table(path: &Path, records: &[Record]) -> Result<Vec<TableEntry>, TableError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let mut entries = Vec::with_capacity(records.len());
    let mut offset = 0u64;

    for record in records {
        entries.push(TableEntry {
            key: record.key,
            offset,
            length: record.value.len() as u64,
        });
        writer.write_all(&record.key.to_le_bytes())?;
        writer.write_all(&record.value)?;
        writer.write_all(&[0u8])?;
        offset += 8 + record.value.len() as u64 + 1;
    }

    for entry in &entries {
        writer.write_all(&entry.key.to_le_bytes())?;
        writer.write_all(&entry.offset.to_le_bytes())?;
    }
    writer.write_all(&(records.len() as u64).to_le_bytes())?;

    writer.flush()?;
    writer.get_ref().sync_all()?;

    trace!(path = %path.display(), records = records.len(), "SSTable written");
    Ok(entries)
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// A memory-mapped, read-only view of one SSTable.
pub struct Table {
    mmap: Mmap,
}

impl Table {
    /// Maps the table at `path`.
    pub fn open(path: &Path) -> Result<Self, TableError> {
        let file = File::open(path)?;
        if file.metadata()?.len() < 8 {
            return Err(TableError::Corrupt(format!(
                "{} is too small to hold a record count",
                path.display()
            )));
        }
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap })
    }

    /// Number of records, from the trailing count.
    pub fn record_count(&self) -> u64 {
        let tail = &self.mmap[self.mmap.len() - 8..];
        u64::from_le_bytes([
            tail[0], tail[1], tail[2], tail[3], tail[4], tail[5], tail[6], tail[7],
        ])
    }

    /// Walks the footer and returns the directory entries in record order,
    /// with each value length measured against its 0x00 terminator.
    ///
    /// Fails with [`TableError::Corrupt`] when the count implies a footer
    /// larger than the file, an offset points outside the body, or a value
    /// is not terminated.
    pub fn entries(&self) -> Result<Vec<TableEntry>, TableError> {
        let len = self.mmap.len() as u64;
        let n = self.record_count();

        let footer_bytes = n
            .checked_mul(16)
            .and_then(|b| b.checked_add(8))
            .ok_or_else(|| TableError::Corrupt(format!("record count {n} overflows")))?;
        if footer_bytes > len {
            return Err(TableError::Corrupt(format!(
                "record count {n} implies a footer larger than the file"
            )));
        }
        let body_end = (len - footer_bytes) as usize;

        let mut entries = Vec::with_capacity(n as usize);
        for i in 0..n as usize {
            let at = body_end + 16 * i;
            let key = self.read_u64(at);
            let offset = self.read_u64(at + 8);
            let length = self.value_bounds(offset, body_end)?;
            entries.push(TableEntry {
                key,
                offset,
                length,
            });
        }
        Ok(entries)
    }

    /// Reads the value of the record starting at `offset`: skip the inline
    /// key, take bytes up to the 0x00 terminator.
    pub fn value_at(&self, offset: u64) -> Result<&[u8], TableError> {
        let body_end = self.body_end()?;
        let length = self.value_bounds(offset, body_end)? as usize;
        let start = offset as usize + 8;
        Ok(&self.mmap[start..start + length])
    }

    fn body_end(&self) -> Result<usize, TableError> {
        let len = self.mmap.len() as u64;
        let n = self.record_count();
        let footer_bytes = n
            .checked_mul(16)
            .and_then(|b| b.checked_add(8))
            .filter(|&b| b <= len)
            .ok_or_else(|| TableError::Corrupt(format!("record count {n} out of bounds")))?;
        Ok((len - footer_bytes) as usize)
    }

    /// Validates a record offset and measures its value length.
    fn value_bounds(&self, offset: u64, body_end: usize) -> Result<u64, TableError> {
        let value_start = offset
            .checked_add(8)
            .map(|s| s as usize)
            .filter(|&s| s <= body_end)
            .ok_or_else(|| {
                TableError::Corrupt(format!("record offset {offset} outside the body"))
            })?;
        match self.mmap[value_start..body_end]
            .iter()
            .position(|&b| b == 0)
        {
            Some(length) => Ok(length as u64),
            None => Err(TableError::Corrupt(format!(
                "value at offset {offset} has no terminator"
            ))),
        }
    }

    fn read_u64(&self, at: usize) -> u64 {
        let bytes = &self.mmap[at..at + 8];
        u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ])
    }
}
