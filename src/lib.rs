//! # StratumDB
//!
//! An embeddable, single-writer, ordered key-value store for 64-bit keys
//! and opaque byte-string values, built on a **Log-Structured Merge Tree
//! (LSM-tree)** with leveled compaction.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                       Engine                           │
//! │  ┌───────────┐   ┌─────────────┐   ┌────────────────┐  │
//! │  │  Active    │   │  Immutable  │   │  SSTables      │  │
//! │  │  Memtable  │   │  Memtable   │   │  level 0..19   │  │
//! │  │  + wal     │   │  + immwal   │   │  (on disk)     │  │
//! │  └─────┬─────┘   └──────┬──────┘   └───────┬────────┘  │
//! │        │   rotate       │   flush          │           │
//! │        └────────►       └─────────►        │           │
//! │                                            │           │
//! │  ┌─────────────────────────────────────────┘           │
//! │  │  Leveled compaction (cap 2^(L+1) files per level)   │
//! │  └─────────────────────────────────────────────────────│
//! │                                                        │
//! │  ┌──────────────────┐  ┌────────────────────────────┐  │
//! │  │  Sparse index    │  │  Per-SSTable bloom filters │  │
//! │  └──────────────────┘  └────────────────────────────┘  │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Public operations — put, get, scan, del, reset — plus rotation and background flush |
//! | [`memtable`] | Skip-list write buffer with tombstones and byte-size accounting |
//! | [`wal`] | Append-only operation log and crash replay |
//! | [`sstable`] | Immutable sorted table format: writer, mmap reader, footer recovery |
//! | [`index`] | In-memory sparse directory over every SSTable |
//! | [`filter`] | Per-SSTable bloom filters for skipping absent keys |
//! | [`disk`] | SSTable lifecycle: flush, reads, leveled compaction |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stratumdb::Engine;
//!
//! let mut db = Engine::open("/tmp/my_db").unwrap();
//!
//! // Write
//! db.put(1, b"hello".to_vec()).unwrap();
//!
//! // Read — an empty value means "not found"
//! assert_eq!(db.get(1).unwrap(), b"hello");
//!
//! // Range scan, both bounds inclusive
//! db.put(2, b"world".to_vec()).unwrap();
//! let pairs = db.scan(1, 2).unwrap();
//! assert_eq!(pairs.len(), 2);
//!
//! // Delete — true iff the key was live
//! assert!(db.del(1).unwrap());
//! assert_eq!(db.get(1).unwrap(), b"");
//! ```

pub mod disk;
pub mod engine;
pub mod filter;
pub mod index;
pub mod memtable;
pub mod sstable;
pub mod wal;

pub use engine::{Engine, EngineError};

/// Number of on-disk levels. Level L holds at most `2^(L+1)` SSTables.
pub const MAX_LEVEL: usize = 20;
