//! # burrowdb - Embedded On-Disk B-Tree Index
//!
//! burrowdb is a persistent ordered key→value index: a single-writer
//! B-tree whose nodes live in a block-addressed file and whose payload
//! bytes live in a companion append-only file. It supports point lookup,
//! insertion, in-place value update, deletion, forward iteration, and
//! half-open range scans, and it preserves the B-tree balance invariants
//! across process restarts.
//!
//! ## Quick Start
//!
//! ```ignore
//! use burrowdb::{BTreeIndex, FixedIntCodec, StringCodec};
//!
//! let mut index: BTreeIndex<FixedIntCodec<i64>, StringCodec> =
//!     BTreeIndex::open("./users")?;
//!
//! index.insert(1, "alice".into())?;
//! index.insert(2, "bob".into())?;
//!
//! assert_eq!(index.at(&1)?, Some("alice".into()));
//! for entry in index.range_entries(&1, &2, true, true)? {
//!     let (id, name) = entry?;
//!     println!("{id}: {name}");
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │      Handle (BTreeIndex)            │  open/at/insert/update/erase
//! ├─────────────────────────────────────┤
//! │      Tree core + cursors            │  search, split, rebalance, scan
//! ├─────────────────────────────────────┤
//! │      Codecs (Codec / KeyOrder)      │  payload bytes, key order
//! ├─────────────────────────────────────┤
//! │      Pager (two-file storage)       │  slots, records, header
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! Each index is a pair of files sharing a base path:
//!
//! ```text
//! users.tree     16-byte header, then fixed-size node slots
//! users.data     append-only key/value records
//! ```
//!
//! Node slots are fixed-position, so a node's slot number is a stable
//! identifier; rewriting a node appends its payload to the data file and
//! rewrites the slot in place. Superseded payload bytes are never
//! reclaimed, and freed slots are never reused.
//!
//! ## Contract
//!
//! - Single-threaded: the handle owns the files exclusively and every
//!   operation blocks on file I/O.
//! - Cursors borrow the handle immutably and cannot outlive a mutation
//!   (the borrow checker enforces this).
//! - Absent keys are results, not errors: `at` returns `Option`,
//!   `insert`/`update`/`erase` return `bool`.
//! - No crash atomicity across the two files; layer a journal outside the
//!   core if that is required.
//!
//! ## Module Overview
//!
//! - [`codec`]: payload serialization and key-ordering capabilities
//! - [`storage`]: the two-file pager, header, and slot formats
//! - [`btree`]: the tree core, nodes, and cursors

pub mod btree;
pub mod codec;
pub mod storage;

pub use btree::{BTreeIndex, Cursor, Entries, Entry, Node, DEFAULT_ORDER};
pub use codec::{
    BytesCodec, Codec, FixedIntCodec, KeyOrder, NaturalOrder, StringCodec, VecCodec,
};
