use thiserror::Error;

use super::types::PageId;

/// Error type shared by the storage, buffer and index layers
#[derive(Error, Debug)]
pub enum BrambleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Buffer pool is full, no evictable frames available")]
    BufferPoolFull,

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Page {0} is still pinned")]
    PageStillPinned(PageId),

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("Index name {0:?} exceeds the header record limit")]
    IndexNameTooLong(String),

    #[error("Header page has no room for another index record")]
    HeaderFull,

    #[error("Index {0:?} already registered in the header page")]
    IndexAlreadyExists(String),

    #[error("Index {0:?} not found in the header page")]
    IndexNotFound(String),

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),
}

pub type Result<T> = std::result::Result<T, BrambleError>;
