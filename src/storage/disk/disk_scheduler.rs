use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::{BrambleError, PageId, Result, PAGE_SIZE};

use super::DiskManager;

/// A single disk I/O request handed to the background worker
pub struct DiskRequest {
    /// Whether this is a write (true) or read (false) request
    pub is_write: bool,
    /// The page ID to read/write
    pub page_id: PageId,
    /// Pointer to the data buffer (must be PAGE_SIZE bytes).
    /// For reads the worker fills it; for writes the worker reads from it.
    pub data: *mut u8,
    /// Completion signal
    pub callback: Option<std::sync::mpsc::Sender<bool>>,
}

// Safety: a DiskRequest is consumed by exactly one worker thread, and the
// issuing thread blocks on the callback while the buffer is in flight.
unsafe impl Send for DiskRequest {}

impl DiskRequest {
    pub fn read(page_id: PageId, data: *mut u8) -> Self {
        Self {
            is_write: false,
            page_id,
            data,
            callback: None,
        }
    }

    pub fn write(page_id: PageId, data: *mut u8) -> Self {
        Self {
            is_write: true,
            page_id,
            data,
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: std::sync::mpsc::Sender<bool>) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// DiskScheduler queues page I/O onto a background worker thread.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    request_sender: Sender<DiskRequest>,
    shutdown: Arc<AtomicBool>,
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a new DiskScheduler and spawns its worker thread.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(128);
        let shutdown = Arc::new(AtomicBool::new(false));

        let dm_clone = Arc::clone(&disk_manager);
        let shutdown_clone = Arc::clone(&shutdown);

        let worker_handle = thread::spawn(move || {
            Self::run_worker(dm_clone, receiver, shutdown_clone);
        });

        Self {
            disk_manager,
            request_sender: sender,
            shutdown,
            worker_handle: Some(worker_handle),
        }
    }

    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        self.request_sender
            .send(request)
            .map_err(|e| BrambleError::DiskScheduler(format!("Failed to schedule request: {}", e)))
    }

    /// Schedules a read request and waits for completion.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (tx, rx) = std::sync::mpsc::channel();
        let request = DiskRequest::read(page_id, data.as_mut_ptr()).with_callback(tx);

        self.schedule(request)?;

        rx.recv().map_err(|e| {
            BrambleError::DiskScheduler(format!("Failed to receive completion: {}", e))
        })?;

        Ok(())
    }

    /// Schedules a write request and waits for completion.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (tx, rx) = std::sync::mpsc::channel();
        // The worker only reads from the buffer for a write request
        let request = DiskRequest::write(page_id, data.as_ptr() as *mut u8).with_callback(tx);

        self.schedule(request)?;

        rx.recv().map_err(|e| {
            BrambleError::DiskScheduler(format!("Failed to receive completion: {}", e))
        })?;

        Ok(())
    }

    fn run_worker(
        disk_manager: Arc<DiskManager>,
        receiver: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                // Drain remaining requests before exiting
                while let Ok(request) = receiver.try_recv() {
                    Self::process_request(&disk_manager, request);
                }
                break;
            }

            match receiver.recv_timeout(std::time::Duration::from_millis(100)) {
                Ok(request) => {
                    Self::process_request(&disk_manager, request);
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    // Re-check the shutdown flag
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    break;
                }
            }
        }
    }

    fn process_request(disk_manager: &DiskManager, request: DiskRequest) {
        let success = if request.is_write {
            // Safety: the issuing thread keeps the buffer alive until the
            // callback fires
            let data = unsafe { std::slice::from_raw_parts(request.data, PAGE_SIZE) };
            disk_manager.write_page(request.page_id, data).is_ok()
        } else {
            // Safety: as above
            let data = unsafe { std::slice::from_raw_parts_mut(request.data, PAGE_SIZE) };
            disk_manager.read_page(request.page_id, data).is_ok()
        };

        if let Some(callback) = request.callback {
            let _ = callback.send(success);
        }
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_disk_scheduler_read_write() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        let page_id = scheduler.disk_manager().allocate_page().unwrap();

        let mut write_data = [0u8; PAGE_SIZE];
        write_data[0] = 42;
        write_data[100] = 255;
        scheduler.schedule_write_sync(page_id, &write_data).unwrap();

        let mut read_data = [0u8; PAGE_SIZE];
        scheduler
            .schedule_read_sync(page_id, &mut read_data)
            .unwrap();

        assert_eq!(read_data[0], 42);
        assert_eq!(read_data[100], 255);
    }

    #[test]
    fn test_disk_scheduler_multiple_requests() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        let page_id1 = scheduler.disk_manager().allocate_page().unwrap();
        let page_id2 = scheduler.disk_manager().allocate_page().unwrap();

        let data1 = [1u8; PAGE_SIZE];
        let data2 = [2u8; PAGE_SIZE];

        scheduler.schedule_write_sync(page_id1, &data1).unwrap();
        scheduler.schedule_write_sync(page_id2, &data2).unwrap();

        let mut read1 = [0u8; PAGE_SIZE];
        let mut read2 = [0u8; PAGE_SIZE];

        scheduler.schedule_read_sync(page_id1, &mut read1).unwrap();
        scheduler.schedule_read_sync(page_id2, &mut read2).unwrap();

        assert_eq!(read1[0], 1);
        assert_eq!(read2[0], 2);
    }
}
