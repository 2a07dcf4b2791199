//! # Index Module
//!
//! The in-memory sparse directory over every SSTable: for each key a table
//! holds, the index knows the record's offset, value length, ingest
//! timestamp, and tombstone flag. An index entry exists iff the table
//! contains a record for that key, and entries never outlive their file.
//!
//! ## Structure
//!
//! ```text
//! level 0 ─┬─ file-id 1700000000123 ── { key → entry, … }
//!          └─ file-id 1700000000086 ── { key → entry, … }
//! level 1 ─── …
//! ```
//!
//! Within a level the files are ordered by descending file id — newest
//! first — because the file id is the table's creation timestamp. Lookups
//! scan level 0 upward and stop at the first file containing the key:
//! newer data always lives in a smaller-numbered level, and within a level
//! in a larger-id file.
//!
//! ## Recovery
//!
//! `recover` rebuilds the whole directory from SSTable footers after a
//! restart, re-adding every key to the membership filter as it goes. A
//! file that fails footer validation is logged and skipped; the rest of
//! the tree still recovers.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    cmp::Reverse,
    collections::BTreeMap,
    fs, io,
    path::Path,
};

use thiserror::Error;
use tracing::{info, warn};

use crate::MAX_LEVEL;
use crate::filter::Filter;
use crate::sstable::{Table, TableError};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by index recovery.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Underlying I/O error while walking the directory tree.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// SSTable read failure that was not a skippable corruption.
    #[error("SSTable error: {0}")]
    Table(#[from] TableError),
}

// ------------------------------------------------------------------------------------------------
// Entry types
// ------------------------------------------------------------------------------------------------

/// Directory data for a single key in a single SSTable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Byte offset of the record within the table body.
    pub offset: u64,

    /// Value length in bytes.
    pub length: u64,

    /// Ingest time; entries written by a flush carry the owning file's id,
    /// so a greater timestamp always means a newer write.
    pub timestamp: u64,

    /// Whether the record is a tombstone.
    pub deleted: bool,
}

/// A successful point lookup: which table holds the newest record for the
/// key, and where in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHit {
    pub level: usize,
    pub file_id: u64,
    pub offset: u64,
    pub length: u64,
    pub deleted: bool,
}

/// Per-file key directory, ordered by key.
pub type FileIndex = BTreeMap<u64, IndexEntry>;

// ------------------------------------------------------------------------------------------------
// Index
// ------------------------------------------------------------------------------------------------

/// The level-organized sparse directory.
pub struct Index {
    /// `levels[L]` maps file id (newest first) to that file's key directory.
    levels: Vec<BTreeMap<Reverse<u64>, FileIndex>>,
}

impl Index {
    /// Creates an empty index covering every level.
    pub fn new() -> Self {
        Self {
            levels: (0..MAX_LEVEL).map(|_| BTreeMap::new()).collect(),
        }
    }

    /// Inserts an entry, creating the per-file directory on demand.
    /// A level beyond the last is silently ignored.
    #[allow(clippy::too_many_arguments)]
    pub fn put(
        &mut self,
        key: u64,
        level: usize,
        file_id: u64,
        offset: u64,
        length: u64,
        timestamp: u64,
        deleted: bool,
    ) {
        if level >= self.levels.len() {
            return;
        }
        self.levels[level].entry(Reverse(file_id)).or_default().insert(
            key,
            IndexEntry {
                offset,
                length,
                timestamp,
                deleted,
            },
        );
    }

    /// Finds the newest record for `key`: levels top-down, files newest
    /// first within a level, first hit wins.
    pub fn get(&self, key: u64) -> Option<IndexHit> {
        for (level, files) in self.levels.iter().enumerate() {
            for (&Reverse(file_id), tree) in files {
                if let Some(entry) = tree.get(&key) {
                    return Some(IndexHit {
                        level,
                        file_id,
                        offset: entry.offset,
                        length: entry.length,
                        deleted: entry.deleted,
                    });
                }
            }
        }
        None
    }

    /// Returns `true` iff any level holds a non-tombstoned entry for `key`.
    pub fn find(&self, key: u64) -> bool {
        self.levels
            .iter()
            .flat_map(|files| files.values())
            .any(|tree| tree.get(&key).is_some_and(|entry| !entry.deleted))
    }

    /// Number of files registered at `level`.
    pub fn file_count(&self, level: usize) -> usize {
        self.levels.get(level).map_or(0, BTreeMap::len)
    }

    /// Iterates the files of `level` newest-first with their directories.
    pub fn files(&self, level: usize) -> impl Iterator<Item = (u64, &FileIndex)> {
        self.levels
            .get(level)
            .into_iter()
            .flatten()
            .map(|(&Reverse(file_id), tree)| (file_id, tree))
    }

    /// Removes a file's directory, typically after compaction deleted the
    /// file itself.
    pub fn erase_file(&mut self, level: usize, file_id: u64) {
        if let Some(files) = self.levels.get_mut(level) {
            files.remove(&Reverse(file_id));
        }
    }

    /// Drops every entry.
    pub fn reset(&mut self) {
        for files in &mut self.levels {
            files.clear();
        }
    }

    /// Rebuilds the directory from the SSTable footers under `dir`,
    /// re-adding every recovered key to `filter`.
    ///
    /// Layout on disk is `<dir>/<level>/<file-id>`; anything that does not
    /// parse as a level or file id (the WAL files, for instance) is
    /// ignored. A table failing footer validation is skipped with a
    /// warning. Recovered entries are stamped with their file's id so
    /// last-writer-wins ordering survives the restart; the tombstone flag
    /// is not persisted and recovers as live (such records carry empty
    /// values).
    pub fn recover(&mut self, dir: &Path, filter: &mut Filter) -> Result<(), IndexError> {
        if !dir.exists() {
            return Ok(());
        }

        let mut files_recovered = 0usize;
        for level_entry in fs::read_dir(dir)? {
            let level_entry = level_entry?;
            if !level_entry.file_type()?.is_dir() {
                continue;
            }
            let Some(level) = level_entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<usize>().ok())
            else {
                continue;
            };
            if level >= MAX_LEVEL {
                continue;
            }

            for file_entry in fs::read_dir(level_entry.path())? {
                let file_entry = file_entry?;
                let Some(file_id) = file_entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.parse::<u64>().ok())
                else {
                    continue;
                };

                let path = file_entry.path();
                let entries = match Table::open(&path).and_then(|table| table.entries()) {
                    Ok(entries) => entries,
                    Err(TableError::Corrupt(reason)) => {
                        warn!(path = %path.display(), reason = %reason, "skipping corrupt SSTable");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };

                for entry in entries {
                    self.put(
                        entry.key, level, file_id, entry.offset, entry.length, file_id, false,
                    );
                    filter.add(entry.key, level, file_id);
                }
                files_recovered += 1;
            }
        }

        info!(files = files_recovered, "index recovered from SSTables");
        Ok(())
    }
}

impl Default for Index {
    fn default() -> Self {
        Self::new()
    }
}
