//! # Engine Module
//!
//! The public face of the store and the coordinator of every other
//! subsystem. Exposes five operations — `put`, `get`, `scan`, `del`,
//! `reset` — over 64-bit keys and opaque byte-string values.
//!
//! ## Data flow
//!
//! Writes append to the WAL first, then mutate the active memtable. When
//! the memtable crosses [`MEMTABLE_MAX_BYTES`] the engine waits for any
//! previous flush, moves the memtable into the immutable slot (renaming
//! `wal` → `immwal` with it), swaps in a fresh memtable, and launches one
//! background task that writes the immutable memtable as a level-0 SSTable
//! — updating the index and filter, cascading compaction as needed — and
//! finally deletes the `immwal`.
//!
//! Reads probe newest-first: active memtable → immutable memtable → index
//! (level 0 upward, newest file first) → filter → disk.
//!
//! ## Concurrency Model
//!
//! One foreground caller plus at most one background flush task. The index
//! and filter are shared with the flush task behind `RwLock`s; the
//! foreground takes read locks on the lookup paths and the flush task is
//! the only writer. `scan` joins the in-flight flush before merging tiers,
//! so it always observes a consistent union; `get` may overlap a flush but
//! the index only learns about a table after the file exists, so the key
//! is found either in the immutable memtable or on disk, never in neither.
//!
//! ## Guarantees
//!
//! - **Durability:** every mutation is in the WAL before the memtable.
//! - **Crash recovery:** on open, the index and filter are rebuilt from
//!   SSTable footers, then both WAL generations are replayed in order.
//! - **Read-your-writes:** within the single caller thread, a write is
//!   visible to every subsequent read until overwritten or deleted.
//! - **Flush failures latch:** a failed background flush is reported on
//!   the next operation that needs the flush slot, and rotations are
//!   refused until `reset`.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    thread::{self, JoinHandle},
};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::MAX_LEVEL;
use crate::disk::{Batch, Disk, DiskError};
use crate::filter::Filter;
use crate::index::{Index, IndexError};
use crate::memtable::{Memtable, MemtableGetResult};
use crate::wal::{IMMWAL_FILE, WAL_FILE, Wal, WalError, WalRecord};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Memtable size at which the engine rotates and flushes (2 MiB).
pub const MEMTABLE_MAX_BYTES: u64 = 2 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating from the write-ahead log.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Error originating from index recovery.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Error originating from the disk manager.
    #[error("disk error: {0}")]
    Disk(#[from] DiskError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A previous background flush failed; rotations are refused until
    /// `reset`.
    #[error("background flush failed: {0}")]
    FlushFailed(String),

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

/// The storage engine handle.
///
/// Single-writer by construction: mutating operations take `&mut self`.
/// The engine owns the memtable pair, the WAL, and — jointly with the
/// background flush task — the index, filter, and disk manager.
pub struct Engine {
    dir: PathBuf,
    memtable: Memtable,
    immutable: Option<Arc<Memtable>>,
    wal: Wal,
    index: Arc<RwLock<Index>>,
    filter: Arc<RwLock<Filter>>,
    disk: Arc<Disk>,
    flush: Option<JoinHandle<Result<(), DiskError>>>,
    flush_failed: Option<String>,
}

impl Engine {
    /// Opens (or creates) a store rooted at `dir`.
    ///
    /// Recovery order: the index and filter are rebuilt from SSTable
    /// footers first, so that replayed deletes can see disk-resident keys;
    /// then the immutable WAL and the active WAL are replayed, in that
    /// order, through the normal write paths into a fresh log.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, EngineError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let disk = Arc::new(Disk::new(&dir)?);

        let mut index = Index::new();
        let mut filter = Filter::new();
        index.recover(&dir, &mut filter)?;

        // Read both WAL generations before touching either file.
        let mut ops = Vec::new();
        for name in [IMMWAL_FILE, WAL_FILE] {
            let path = dir.join(name);
            let Some(iter) = Wal::replay(&path)? else {
                continue;
            };
            for record in iter {
                match record {
                    Ok(op) => ops.push(op),
                    Err(WalError::Corrupt(reason)) => {
                        warn!(path = %path.display(), reason = %reason, "stopping WAL replay at corrupt record");
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        // The replay below re-appends every surviving op, so both old logs
        // can go; a fresh WAL takes over.
        remove_if_exists(&dir.join(IMMWAL_FILE))?;
        remove_if_exists(&dir.join(WAL_FILE))?;
        let wal = Wal::open(dir.join(WAL_FILE))?;

        let mut engine = Self {
            dir,
            memtable: Memtable::new(),
            immutable: None,
            wal,
            index: Arc::new(RwLock::new(index)),
            filter: Arc::new(RwLock::new(filter)),
            disk,
            flush: None,
            flush_failed: None,
        };

        let replayed = ops.len();
        for op in ops {
            match op {
                WalRecord::Put { key, value } => engine.put(key, value)?,
                WalRecord::Del { key } => {
                    engine.del(key)?;
                }
            }
        }

        info!(dir = %engine.dir.display(), replayed, "engine opened");
        Ok(engine)
    }

    /// Inserts or updates a key.
    pub fn put(&mut self, key: u64, value: Vec<u8>) -> Result<(), EngineError> {
        self.wal.append(&WalRecord::Put {
            key,
            value: value.clone(),
        })?;
        self.memtable.put(key, value);
        self.maybe_rotate()
    }

    /// Looks up a key. An empty byte string means "not found".
    pub fn get(&self, key: u64) -> Result<Vec<u8>, EngineError> {
        match self.memtable.get(key) {
            MemtableGetResult::Put(value) => return Ok(value),
            MemtableGetResult::Delete => return Ok(Vec::new()),
            MemtableGetResult::NotFound => {}
        }

        if let Some(immutable) = &self.immutable {
            match immutable.get(key) {
                MemtableGetResult::Put(value) => return Ok(value),
                MemtableGetResult::Delete => return Ok(Vec::new()),
                MemtableGetResult::NotFound => {}
            }
        }

        // The read lock stays held across the disk read; compaction must
        // not retire the file between lookup and read.
        let index = self
            .index
            .read()
            .map_err(|_| EngineError::Internal("index lock poisoned".into()))?;
        let Some(hit) = index.get(key) else {
            return Ok(Vec::new());
        };
        if hit.deleted {
            return Ok(Vec::new());
        }

        let in_filter = self
            .filter
            .read()
            .map_err(|_| EngineError::Internal("filter lock poisoned".into()))?
            .contains(key, hit.level, hit.file_id);
        if !in_filter {
            return Ok(Vec::new());
        }

        Ok(self.disk.get(hit.level, hit.file_id, hit.offset, hit.length)?)
    }

    /// Returns the live `(key, value)` pairs with keys in `[lower, upper]`,
    /// sorted ascending.
    ///
    /// Waits for any in-flight flush, then resolves each candidate key
    /// newest-tier-first. Disk reads are deferred into one batch per
    /// SSTable and executed at the end.
    pub fn scan(&mut self, lower: u64, upper: u64) -> Result<Vec<(u64, Vec<u8>)>, EngineError> {
        self.wait_flush()?;

        // `None` marks a key decided dead (tombstoned) or pending a batch
        // read; the first tier to mention a key decides it.
        let mut resolved: BTreeMap<u64, Option<Vec<u8>>> = BTreeMap::new();

        for record in self.memtable.range(lower, upper) {
            resolved
                .entry(record.key)
                .or_insert(if record.deleted { None } else { Some(record.value) });
        }
        if let Some(immutable) = &self.immutable {
            for record in immutable.range(lower, upper) {
                resolved
                    .entry(record.key)
                    .or_insert(if record.deleted { None } else { Some(record.value) });
            }
        }

        let mut batches: BTreeMap<(usize, u64), Vec<(u64, u64)>> = BTreeMap::new();
        {
            let index = self
                .index
                .read()
                .map_err(|_| EngineError::Internal("index lock poisoned".into()))?;
            let filter = self
                .filter
                .read()
                .map_err(|_| EngineError::Internal("filter lock poisoned".into()))?;
            for level in 0..MAX_LEVEL {
                for (file_id, tree) in index.files(level) {
                    for (&key, entry) in tree.range(lower..=upper) {
                        if resolved.contains_key(&key) {
                            continue;
                        }
                        let live = !entry.deleted && filter.contains(key, level, file_id);
                        resolved.insert(key, None);
                        if live {
                            batches
                                .entry((level, file_id))
                                .or_default()
                                .push((key, entry.offset));
                        }
                    }
                }
            }
        }

        let mut out: BTreeMap<u64, Vec<u8>> = resolved
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect();
        for ((level, file_id), reads) in batches {
            self.disk.get_batch(
                &Batch {
                    level,
                    file_id,
                    reads,
                },
                &mut out,
            )?;
        }

        // Empty values read as absent through `get`; scans skip them too.
        Ok(out.into_iter().filter(|(_, v)| !v.is_empty()).collect())
    }

    /// Deletes a key. Returns `true` iff the key existed live somewhere
    /// reachable.
    pub fn del(&mut self, key: u64) -> Result<bool, EngineError> {
        self.wal.append(&WalRecord::Del { key })?;

        let in_disk = self
            .index
            .read()
            .map_err(|_| EngineError::Internal("index lock poisoned".into()))?
            .find(key);
        let (in_immutable, not_in_immutable) = match &self.immutable {
            Some(immutable) => match immutable.get(key) {
                MemtableGetResult::Put(_) => (true, false),
                MemtableGetResult::Delete => (false, false),
                MemtableGetResult::NotFound => (false, true),
            },
            None => (false, true),
        };

        let deleted = self.memtable.del(key, in_disk, in_immutable, not_in_immutable);
        self.maybe_rotate()?;
        Ok(deleted)
    }

    /// Empties the store: memtables, index, filter, the on-disk tree, and
    /// both WAL generations. Clears a latched flush failure.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        self.drain_flush();

        self.memtable.reset();
        self.immutable = None;
        self.index
            .write()
            .map_err(|_| EngineError::Internal("index lock poisoned".into()))?
            .reset();
        self.filter
            .write()
            .map_err(|_| EngineError::Internal("filter lock poisoned".into()))?
            .reset();
        self.disk.reset()?;

        remove_if_exists(&self.dir.join(IMMWAL_FILE))?;
        remove_if_exists(&self.dir.join(WAL_FILE))?;
        self.wal = Wal::open(self.dir.join(WAL_FILE))?;

        info!(dir = %self.dir.display(), "engine reset");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Rotation and flush
    // --------------------------------------------------------------------------------------------

    fn maybe_rotate(&mut self) -> Result<(), EngineError> {
        if self.memtable.size() < MEMTABLE_MAX_BYTES {
            return Ok(());
        }
        self.rotate()
    }

    /// Moves the full memtable into the immutable slot and hands it to a
    /// fresh background flush task.
    fn rotate(&mut self) -> Result<(), EngineError> {
        self.wait_flush()?;

        let full = std::mem::take(&mut self.memtable);
        let immutable = Arc::new(full);
        self.immutable = Some(Arc::clone(&immutable));

        // WAL ownership follows the memtable: the active log becomes the
        // immutable one, and a fresh log starts for the new memtable.
        self.wal.sync()?;
        remove_if_exists(&self.dir.join(IMMWAL_FILE))?;
        fs::rename(self.dir.join(WAL_FILE), self.dir.join(IMMWAL_FILE))?;
        self.wal = Wal::open(self.dir.join(WAL_FILE))?;

        let disk = Arc::clone(&self.disk);
        let index = Arc::clone(&self.index);
        let filter = Arc::clone(&self.filter);
        let immwal_path = self.dir.join(IMMWAL_FILE);

        info!(entries = immutable.len(), "memtable rotated, flush launched");
        let handle = thread::Builder::new()
            .name("stratumdb-flush".into())
            .spawn(move || -> Result<(), DiskError> {
                let data = immutable.traverse();
                disk.put(0, &data, &index, &filter)?;
                // The SSTable is durable; the immutable WAL is obsolete.
                remove_if_exists(&immwal_path)?;
                Ok(())
            })?;
        self.flush = Some(handle);
        Ok(())
    }

    /// Joins the in-flight flush, if any, latching its failure.
    fn wait_flush(&mut self) -> Result<(), EngineError> {
        if let Some(reason) = &self.flush_failed {
            return Err(EngineError::FlushFailed(reason.clone()));
        }
        let Some(handle) = self.flush.take() else {
            return Ok(());
        };
        let failure = match handle.join() {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(_) => "flush task panicked".to_string(),
        };
        error!(reason = %failure, "background flush failed");
        self.flush_failed = Some(failure.clone());
        Err(EngineError::FlushFailed(failure))
    }

    /// Joins the in-flight flush discarding its outcome, and clears any
    /// latched failure. Only `reset` and shutdown use this.
    fn drain_flush(&mut self) {
        if let Some(handle) = self.flush.take() {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "background flush failed, state is being discarded"),
                Err(_) => error!("flush task panicked, state is being discarded"),
            }
        }
        self.flush_failed = None;
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(handle) = self.flush.take() {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "background flush failed during shutdown"),
                Err(_) => error!("flush task panicked during shutdown"),
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// `remove_file` that treats an already-missing file as success.
fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
