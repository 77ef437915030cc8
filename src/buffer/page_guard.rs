use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::FrameHeader;

/// Callback invoked when a guard is dropped: (page_id, was_dirtied)
type ReleaseCallback = Box<dyn FnOnce(PageId, bool) + Send + Sync>;

/// Shared bookkeeping for both guard flavors
struct PageGuardBase {
    /// The page ID being guarded
    page_id: PageId,
    /// Keeps the frame alive for the guard's lifetime
    _frame: Arc<FrameHeader>,
    /// Callback that unpins the page on release
    release_callback: Option<ReleaseCallback>,
    /// Whether the page was written through this guard
    is_dirty: bool,
}

impl PageGuardBase {
    fn new(page_id: PageId, frame: Arc<FrameHeader>, release_callback: ReleaseCallback) -> Self {
        Self {
            page_id,
            _frame: frame,
            release_callback: Some(release_callback),
            is_dirty: false,
        }
    }

    fn drop_impl(&mut self) {
        if let Some(callback) = self.release_callback.take() {
            callback(self.page_id, self.is_dirty);
        }
    }
}

/// RAII reader latch on a page. Holding it keeps the page pinned and
/// readable; dropping it releases the latch and unpins (never dirty).
pub struct ReadPageGuard {
    base: PageGuardBase,
    /// Reader side of the per-page latch
    _data_guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>,
}

impl ReadPageGuard {
    /// Creates a new ReadPageGuard, blocking until the reader latch is held.
    /// # Safety
    /// The caller must ensure that the frame outlives this guard.
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        let data_guard = frame.data.read();
        // Extend to 'static: the Arc in the base keeps the frame alive
        let data_guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            base: PageGuardBase::new(page_id, frame, release_callback),
            _data_guard: data_guard,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self._data_guard[..]
    }

    /// Drops this guard, releasing latch and pin.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        self.base.drop_impl();
    }
}

/// RAII writer latch on a page. The first call to `data_mut` marks the page
/// dirty; dropping releases the latch first, then unpins.
pub struct WritePageGuard {
    base: PageGuardBase,
    /// Writer side of the per-page latch
    data_guard: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl WritePageGuard {
    /// Creates a new WritePageGuard, blocking until the writer latch is held.
    /// # Safety
    /// The caller must ensure that the frame outlives this guard.
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        let data_guard = frame.data.write();
        // Extend to 'static: the Arc in the base keeps the frame alive
        let data_guard: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            base: PageGuardBase::new(page_id, frame, release_callback),
            data_guard: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().unwrap()[..]
    }

    /// Returns a mutable view of the page bytes and marks the page dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.base.is_dirty = true;
        &mut self.data_guard.as_mut().unwrap()[..]
    }

    /// Drops this guard, releasing latch and pin.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        // Release the latch before the unpin callback runs
        self.data_guard.take();
        self.base.drop_impl();
    }
}
