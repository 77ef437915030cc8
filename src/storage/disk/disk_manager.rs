use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::common::{BrambleError, PageId, Result, PAGE_SIZE};

/// DiskManager reads and writes fixed-size pages to a single database file.
///
/// Page 0 is reserved at file-creation time for the index header page.
/// Allocation is linear with a free list: deallocated page ids are handed
/// back to subsequent allocations before the file is extended.
pub struct DiskManager {
    /// Exclusive access to the file cursor
    file: Mutex<File>,
    /// Path of the database file
    db_path: PathBuf,
    /// Number of pages the file logically contains
    num_pages: AtomicU32,
    /// Page ids released by delete_page, available for reuse
    free_pages: Mutex<Vec<PageId>>,
    /// Number of disk reads performed
    num_reads: AtomicU32,
    /// Number of disk writes performed
    num_writes: AtomicU32,
}

impl DiskManager {
    /// Opens the database file at `db_path`, creating it if absent.
    /// A fresh file gets a zeroed header page written at page 0.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;

        let file_size = file.metadata()?.len();
        let pages_in_file = (file_size / PAGE_SIZE as u64) as u32;

        let dm = Self {
            file: Mutex::new(file),
            db_path,
            num_pages: AtomicU32::new(pages_in_file.max(1)),
            free_pages: Mutex::new(Vec::new()),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        };

        if pages_in_file == 0 {
            let zeros = [0u8; PAGE_SIZE];
            dm.write_page(PageId::new(0), &zeros)?;
        }

        Ok(dm)
    }

    /// Reads a page from disk into the provided buffer.
    /// Reads past the current end of file are zero-filled.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");

        if page_id.as_u32() >= self.num_pages.load(Ordering::Acquire) {
            return Err(BrambleError::InvalidPageId(page_id));
        }

        let byte_offset = (page_id.as_u32() as u64) * (PAGE_SIZE as u64);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(byte_offset))?;

        let bytes_read = file.read(data)?;
        if bytes_read < PAGE_SIZE {
            data[bytes_read..].fill(0);
        }

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes a page to disk from the provided buffer.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");

        let byte_offset = (page_id.as_u32() as u64) * (PAGE_SIZE as u64);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(byte_offset))?;
        file.write_all(data)?;
        file.flush()?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Allocates a page id, reusing a freed one when available.
    /// The page contents are zeroed on disk before the id is returned so a
    /// reused id never surfaces stale bytes.
    pub fn allocate_page(&self) -> Result<PageId> {
        let page_id = match self.free_pages.lock().pop() {
            Some(page_id) => page_id,
            None => PageId::new(self.num_pages.fetch_add(1, Ordering::SeqCst)),
        };

        let zeros = [0u8; PAGE_SIZE];
        self.write_page(page_id, &zeros)?;

        Ok(page_id)
    }

    /// Returns a page id to the free list for reuse.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        if page_id.as_u32() == 0 || page_id.as_u32() >= self.num_pages.load(Ordering::Acquire) {
            return Err(BrambleError::InvalidPageId(page_id));
        }
        self.free_pages.lock().push(page_id);
        Ok(())
    }

    pub fn get_num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::Acquire)
    }

    pub fn get_num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn get_num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn get_db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.file.get_mut().sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_manager_new() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let dm = DiskManager::new(&db_path).unwrap();

        assert!(db_path.exists());
        assert_eq!(dm.get_num_pages(), 1); // Header page
    }

    #[test]
    fn test_disk_manager_allocate_page() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("alloc.db");
        let dm = DiskManager::new(&db_path).unwrap();

        let page_id = dm.allocate_page().unwrap();
        assert_eq!(page_id, PageId::new(1)); // Page 0 is the header
    }

    #[test]
    fn test_disk_manager_read_write() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("rw.db");
        let dm = DiskManager::new(&db_path).unwrap();

        let page_id = dm.allocate_page().unwrap();

        let mut write_data = [0u8; PAGE_SIZE];
        write_data[0] = 42;
        write_data[100] = 255;
        write_data[PAGE_SIZE - 1] = 128;
        dm.write_page(page_id, &write_data).unwrap();

        let mut read_data = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut read_data).unwrap();

        assert_eq!(read_data[0], 42);
        assert_eq!(read_data[100], 255);
        assert_eq!(read_data[PAGE_SIZE - 1], 128);
    }

    #[test]
    fn test_disk_manager_reuses_freed_pages() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("free.db");
        let dm = DiskManager::new(&db_path).unwrap();

        let page_id = dm.allocate_page().unwrap();

        let mut data = [7u8; PAGE_SIZE];
        dm.write_page(page_id, &data).unwrap();

        dm.deallocate_page(page_id).unwrap();
        let reused = dm.allocate_page().unwrap();
        assert_eq!(reused, page_id);

        // Reallocation must hand back a zeroed page
        dm.read_page(reused, &mut data).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_manager_rejects_header_deallocation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("hdr.db");
        let dm = DiskManager::new(&db_path).unwrap();

        assert!(dm.deallocate_page(PageId::new(0)).is_err());
    }

    #[test]
    fn test_disk_manager_persistence() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("persist.db");

        {
            let dm = DiskManager::new(&db_path).unwrap();
            let page_id = dm.allocate_page().unwrap();
            let mut data = [0u8; PAGE_SIZE];
            data[0] = 123;
            dm.write_page(page_id, &data).unwrap();
        }

        {
            let dm = DiskManager::new(&db_path).unwrap();
            // Header + 1 data page
            assert_eq!(dm.get_num_pages(), 2);

            let mut data = [0u8; PAGE_SIZE];
            dm.read_page(PageId::new(1), &mut data).unwrap();
            assert_eq!(data[0], 123);
        }
    }
}
