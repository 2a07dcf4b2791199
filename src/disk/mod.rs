//! # Disk Manager Module
//!
//! Owns the on-disk tree of SSTables: level directories, file-id
//! allocation, point and batched value reads, the flush path that turns a
//! memtable traversal into a level-0 table, and leveled compaction.
//!
//! ## Directory layout
//!
//! ```text
//! <dir>/
//!   wal             -- active WAL (engine-owned)
//!   immwal          -- immutable memtable's WAL (engine-owned)
//!   0/<file-id>     -- SSTables at level 0
//!   1/<file-id>
//!   ...
//! ```
//!
//! File ids are creation timestamps in milliseconds, floored by an atomic
//! counter so that ids stay strictly increasing across sub-millisecond
//! rotations and restarts with clock skew. Level `L` holds at most
//! `2^(L+1)` tables.
//!
//! ## Compaction
//!
//! When a level overflows its cap, the overflowing files (all of them at
//! level 0, the newest `count - cap` otherwise) are merged with every
//! next-level file whose key range intersects theirs. A heap-based K-way
//! merge emits one record per logical key — the one with the greatest
//! timestamp wins, ties going to the shallower level — and the output is
//! cut into 2 MiB tables written to the next level. Tombstones are carried
//! through like any other record. Source files are deleted, and their index
//! entries and filters dropped, only after every output table exists, so a
//! crash mid-compaction leaves the old files addressable for recovery.
//! Overflow checks cascade upward once the current merge has finalized.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BinaryHeap},
    fs, io,
    path::{Path, PathBuf},
    sync::{
        RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use thiserror::Error;
use tracing::{debug, info, trace};

use crate::MAX_LEVEL;
use crate::filter::Filter;
use crate::index::{Index, IndexEntry};
use crate::memtable::Record;
use crate::sstable::{Table, TableError, write_table};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Accounted byte size at which a compaction output buffer is cut into its
/// own SSTable. Accounting matches the memtable: `24 + value.len()` per
/// record.
const MAX_TABLE_BYTES: u64 = 2 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by disk manager operations.
#[derive(Debug, Error)]
pub enum DiskError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// SSTable read or write failure.
    #[error("SSTable error: {0}")]
    Table(#[from] TableError),

    /// Internal invariant violation (poisoned lock, level overflow).
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Batch — deferred reads for scan
// ------------------------------------------------------------------------------------------------

/// A group of point reads against one SSTable, executed with a single open.
#[derive(Debug)]
pub struct Batch {
    pub level: usize,
    pub file_id: u64,
    /// `(key, offset)` pairs to read.
    pub reads: Vec<(u64, u64)>,
}

// ------------------------------------------------------------------------------------------------
// Disk
// ------------------------------------------------------------------------------------------------

/// The disk manager. Stateless apart from the store directory, the level
/// caps, and the file-id floor, so it can be shared freely between the
/// foreground and the flush task.
pub struct Disk {
    dir: PathBuf,
    /// `caps[L]` = maximum number of files at level L, 2^(L+1).
    caps: Vec<usize>,
    /// Largest file id handed out or observed on disk.
    last_file_id: AtomicU64,
}

impl Disk {
    /// Creates a manager rooted at `dir`, seeding the file-id floor from
    /// whatever tables already exist there.
    pub fn new(dir: &Path) -> Result<Self, DiskError> {
        fs::create_dir_all(dir)?;

        let mut last_file_id = 0u64;
        for level_entry in fs::read_dir(dir)? {
            let level_entry = level_entry?;
            if !level_entry.file_type()?.is_dir() {
                continue;
            }
            if level_entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<usize>().ok())
                .is_none()
            {
                continue;
            }
            for file_entry in fs::read_dir(level_entry.path())? {
                if let Some(file_id) = file_entry?
                    .file_name()
                    .to_str()
                    .and_then(|name| name.parse::<u64>().ok())
                {
                    last_file_id = last_file_id.max(file_id);
                }
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            caps: (0..MAX_LEVEL).map(|level| 1usize << (level + 1)).collect(),
            last_file_id: AtomicU64::new(last_file_id),
        })
    }

    /// Path of the SSTable `(level, file_id)`.
    fn table_path(&self, level: usize, file_id: u64) -> PathBuf {
        self.dir.join(level.to_string()).join(file_id.to_string())
    }

    /// Allocates the next file id: wall-clock milliseconds, floored to stay
    /// strictly above every id handed out before.
    fn next_file_id(&self) -> u64 {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64;
        let prev = self
            .last_file_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now_ms.max(last + 1))
            })
            .unwrap_or(now_ms);
        now_ms.max(prev + 1)
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Reads one value. The table handle lives only for this call.
    pub fn get(
        &self,
        level: usize,
        file_id: u64,
        offset: u64,
        _length: u64,
    ) -> Result<Vec<u8>, DiskError> {
        let table = Table::open(&self.table_path(level, file_id))?;
        Ok(table.value_at(offset)?.to_vec())
    }

    /// Executes a read batch with a single table open, inserting the
    /// resulting `(key, value)` pairs into `out`.
    pub fn get_batch(
        &self,
        batch: &Batch,
        out: &mut BTreeMap<u64, Vec<u8>>,
    ) -> Result<(), DiskError> {
        let table = Table::open(&self.table_path(batch.level, batch.file_id))?;
        for &(key, offset) in &batch.reads {
            out.insert(key, table.value_at(offset)?.to_vec());
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Flush
    // --------------------------------------------------------------------------------------------

    /// Writes `data` (ascending by key, tombstones included) as a new
    /// SSTable at `level`, registers every record with the index and
    /// filter, then compacts the level if it overflowed its cap.
    pub fn put(
        &self,
        level: usize,
        data: &[Record],
        index: &RwLock<Index>,
        filter: &RwLock<Filter>,
    ) -> Result<(), DiskError> {
        self.put_records(level, data, index, filter)?;
        self.compact_if_over_cap(level, index, filter)
    }

    /// The write half of [`Disk::put`]: creates the table and registers it,
    /// without the overflow check. Compaction uses this directly so a merge
    /// finishes — sources deleted — before any cascade starts.
    fn put_records(
        &self,
        level: usize,
        data: &[Record],
        index: &RwLock<Index>,
        filter: &RwLock<Filter>,
    ) -> Result<(), DiskError> {
        if level >= MAX_LEVEL {
            return Err(DiskError::Internal(format!(
                "level {level} exceeds the level cap"
            )));
        }

        let file_id = self.next_file_id();
        fs::create_dir_all(self.dir.join(level.to_string()))?;
        let path = self.table_path(level, file_id);
        let entries = write_table(&path, data)?;

        // Index and filter must never reference a file that is not yet
        // durable; recovery re-scans orphan tables.
        let mut index = index
            .write()
            .map_err(|_| DiskError::Internal("index lock poisoned".into()))?;
        let mut filter = filter
            .write()
            .map_err(|_| DiskError::Internal("filter lock poisoned".into()))?;
        for (entry, record) in entries.iter().zip(data) {
            index.put(
                entry.key,
                level,
                file_id,
                entry.offset,
                entry.length,
                file_id,
                record.deleted,
            );
            filter.add(entry.key, level, file_id);
        }

        debug!(level, file_id, records = data.len(), "SSTable flushed");
        Ok(())
    }

    fn file_count(&self, level: usize, index: &RwLock<Index>) -> Result<usize, DiskError> {
        let index = index
            .read()
            .map_err(|_| DiskError::Internal("index lock poisoned".into()))?;
        Ok(index.file_count(level))
    }

    fn compact_if_over_cap(
        &self,
        level: usize,
        index: &RwLock<Index>,
        filter: &RwLock<Filter>,
    ) -> Result<(), DiskError> {
        if self.file_count(level, index)? > self.caps[level] {
            self.compact(level, index, filter)?;
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Compaction
    // --------------------------------------------------------------------------------------------

    /// Merges overflowing tables from `level` into `level + 1`.
    pub fn compact(
        &self,
        level: usize,
        index: &RwLock<Index>,
        filter: &RwLock<Filter>,
    ) -> Result<(), DiskError> {
        if level + 1 >= MAX_LEVEL {
            return Err(DiskError::Internal(format!(
                "compaction out of level {level} would exceed the level cap"
            )));
        }

        // Phase 1 — select inputs under a short read lock, cloning the
        // per-file directories so the merge can run unlocked.
        let sources: Vec<MergeSource> = {
            let guard = index
                .read()
                .map_err(|_| DiskError::Internal("index lock poisoned".into()))?;

            let count = guard.file_count(level);
            let num = if level == 0 {
                count
            } else {
                count.saturating_sub(self.caps[level])
            };

            let mut sources: Vec<MergeSource> = guard
                .files(level)
                .take(num)
                .map(|(file_id, tree)| MergeSource {
                    level,
                    file_id,
                    entries: tree.iter().map(|(&k, &e)| (k, e)).collect(),
                })
                .collect();

            // Union of the selected key ranges, then every next-level file
            // that intersects it joins the merge.
            let ranges: Vec<(u64, u64)> = sources
                .iter()
                .filter_map(MergeSource::key_range)
                .collect();
            for (file_id, tree) in guard.files(level + 1) {
                let overlaps = match (tree.keys().next(), tree.keys().next_back()) {
                    (Some(&lower), Some(&upper)) => {
                        ranges.iter().any(|&(lo, hi)| lower <= hi && upper >= lo)
                    }
                    _ => false,
                };
                if overlaps {
                    sources.push(MergeSource {
                        level: level + 1,
                        file_id,
                        entries: tree.iter().map(|(&k, &e)| (k, e)).collect(),
                    });
                }
            }
            sources
        };

        if sources.is_empty() {
            return Ok(());
        }
        info!(level, inputs = sources.len(), "compaction started");

        // Phase 2 — K-way merge. Tables stay mapped for the whole merge.
        let tables: Vec<Table> = sources
            .iter()
            .map(|s| Table::open(&self.table_path(s.level, s.file_id)))
            .collect::<Result<_, _>>()?;

        let mut heap: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::new();
        let mut cursors = vec![0usize; sources.len()];
        for (source, merge_source) in sources.iter().enumerate() {
            if let Some(&(key, _)) = merge_source.entries.first() {
                heap.push(Reverse(HeapEntry { key, source }));
            }
        }

        let mut output: Vec<Record> = Vec::new();
        let mut output_size = 0u64;

        while let Some(Reverse(first)) = heap.pop() {
            let key = first.key;

            // Pull every source currently positioned on this key; the entry
            // with the greatest timestamp is authoritative, ties going to
            // the shallower level.
            let mut candidates = vec![first];
            while let Some(&Reverse(next)) = heap.peek() {
                if next.key != key {
                    break;
                }
                if let Some(Reverse(next)) = heap.pop() {
                    candidates.push(next);
                }
            }

            let entry_at = |c: HeapEntry, cursors: &[usize]| -> IndexEntry {
                sources[c.source].entries[cursors[c.source]].1
            };
            let mut winner = candidates[0];
            let mut winner_entry = entry_at(winner, &cursors);
            for &candidate in &candidates[1..] {
                let entry = entry_at(candidate, &cursors);
                let newer = (entry.timestamp, Reverse(sources[candidate.source].level))
                    > (winner_entry.timestamp, Reverse(sources[winner.source].level));
                if newer {
                    winner = candidate;
                    winner_entry = entry;
                }
            }

            for candidate in candidates {
                let cursor = &mut cursors[candidate.source];
                *cursor += 1;
                if let Some(&(next_key, _)) = sources[candidate.source].entries.get(*cursor) {
                    heap.push(Reverse(HeapEntry {
                        key: next_key,
                        source: candidate.source,
                    }));
                }
            }

            let value = tables[winner.source].value_at(winner_entry.offset)?.to_vec();
            trace!(key, from = sources[winner.source].file_id, "merge emit");
            output_size += 24 + value.len() as u64;
            output.push(Record {
                key,
                value,
                deleted: winner_entry.deleted,
            });

            if output_size >= MAX_TABLE_BYTES {
                self.put_records(level + 1, &output, index, filter)?;
                output.clear();
                output_size = 0;
            }
        }
        if !output.is_empty() {
            self.put_records(level + 1, &output, index, filter)?;
        }
        drop(tables);

        // Phase 3 — finalize: with every output durably written, retire the
        // sources from disk, index, and filter.
        {
            let mut index = index
                .write()
                .map_err(|_| DiskError::Internal("index lock poisoned".into()))?;
            let mut filter = filter
                .write()
                .map_err(|_| DiskError::Internal("filter lock poisoned".into()))?;
            for source in &sources {
                fs::remove_file(self.table_path(source.level, source.file_id))?;
                index.erase_file(source.level, source.file_id);
                filter.remove(source.level, source.file_id);
            }
        }

        info!(level, "compaction finished");
        self.compact_if_over_cap(level + 1, index, filter)
    }

    // --------------------------------------------------------------------------------------------
    // Reset
    // --------------------------------------------------------------------------------------------

    /// Removes every level directory and the tables inside them.
    pub fn reset(&self) -> Result<(), DiskError> {
        for level in 0..MAX_LEVEL {
            let path = self.dir.join(level.to_string());
            if path.exists() {
                fs::remove_dir_all(path)?;
            }
        }
        info!(dir = %self.dir.display(), "disk reset");
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Merge internals
// ------------------------------------------------------------------------------------------------

/// One compaction input: a cloned per-file directory plus its placement.
struct MergeSource {
    level: usize,
    file_id: u64,
    /// `(key, entry)` pairs ascending by key.
    entries: Vec<(u64, IndexEntry)>,
}

impl MergeSource {
    fn key_range(&self) -> Option<(u64, u64)> {
        match (self.entries.first(), self.entries.last()) {
            (Some(&(lower, _)), Some(&(upper, _))) => Some((lower, upper)),
            _ => None,
        }
    }
}

/// Heap entry: the key a source is currently positioned on. Ordered by
/// `(key, source)` so equal keys pop deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry {
    key: u64,
    source: usize,
}
