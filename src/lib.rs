//! Bramble - a disk-resident B+tree index in Rust
//!
//! This crate provides a B+tree index that maps fixed-width comparable keys
//! to record identifiers, stored in 4 KiB pages managed by a buffer pool.
//!
//! # Architecture
//!
//! The system is organized into several layers:
//!
//! - **Storage Layer** (`storage`): page-granular disk I/O
//!   - `DiskManager`: reads and writes pages in a single database file
//!   - `DiskScheduler`: queues page I/O onto a background worker thread
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: caches pages in a fixed set of frames
//!   - `LruKReplacer`: LRU-K page replacement policy
//!   - `ReadPageGuard`/`WritePageGuard`: RAII guards combining the page pin
//!     with the page's reader/writer latch
//!
//! - **Index** (`index`): the B+tree itself
//!   - `BPlusTree`: search, insert with recursive splits, delete with
//!     borrow/merge, and range iteration, all under latch crabbing
//!   - `HeaderPage`: the catalog page mapping index names to root page ids
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bramble::buffer::BufferPoolManager;
//! use bramble::index::{BPlusTree, IndexKey, IntegerComparator};
//! use bramble::storage::disk::DiskManager;
//! use bramble::{PageId, RecordId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("index.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! let tree = BPlusTree::new("orders_pk", bpm, IntegerComparator, 64, 64).unwrap();
//!
//! let rid = RecordId::new(PageId::new(100), SlotId::new(3));
//! tree.insert(&IndexKey::from_u64(42), rid).unwrap();
//! assert_eq!(tree.get(&IndexKey::from_u64(42)).unwrap(), Some(rid));
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{BrambleError, PageId, RecordId, Result, SlotId};
