use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{
    BrambleError, PageId, RecordId, Result, HEADER_PAGE_ID, INVALID_PAGE_ID,
};

use super::btree_iterator::BTreeIterator;
use super::btree_page::{
    reparent, set_parent_page_id_raw, BTreePageRef, InternalPage, InternalPageRef, LeafPage,
    LeafPageRef, PageType, INTERNAL_SLOT_CAPACITY, LEAF_SLOT_CAPACITY,
};
use super::header_page::{HeaderPage, HeaderPageRef};
use super::key_comparator::{IndexKey, KeyComparator};

/// The two write operations distinguished by the crabbing protocol.
/// Point lookups descend with plain hand-over-hand read latching instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Insert,
    Delete,
}

/// Per-operation latch state accumulated during a write descent.
///
/// `write_set` holds the ancestor writer latches in root-to-leaf order;
/// `root_guard` is the root-id guard while still held. Both are flushed the
/// moment a child proves safe, releasing every ancestor latch and unpinning
/// the pages clean (nothing was written on the way down). `orphaned`
/// collects pages emptied by coalescing; they go back to the buffer pool
/// only after the operation has dropped every latch and pin.
struct Context<'a> {
    root_guard: Option<RwLockWriteGuard<'a, PageId>>,
    write_set: VecDeque<WritePageGuard>,
    orphaned: Vec<PageId>,
}

impl Context<'_> {
    fn new() -> Self {
        Self {
            root_guard: None,
            write_set: VecDeque::new(),
            orphaned: Vec::new(),
        }
    }

    fn release_ancestors(&mut self) {
        self.write_set.clear();
        self.root_guard = None;
    }

    fn root_page_id(&self) -> Option<PageId> {
        self.root_guard.as_deref().copied()
    }
}

/// A disk-resident B+tree mapping fixed-width keys to record ids.
///
/// Pages live in the buffer pool and are only ever addressed by page id;
/// every traversal re-fetches through the pool and holds pages via RAII
/// latch guards. Readers use hand-over-hand read latching; writers crab
/// down with write latches, releasing ancestors as soon as the child cannot
/// propagate a structural change upward. The root page id itself is guarded
/// by a dedicated reader/writer latch, and every root change is persisted
/// into the header page under the index name.
pub struct BPlusTree<C: KeyComparator> {
    index_name: String,
    /// Root-id guard: protects root_page_id reads/writes during descent
    root_id_latch: RwLock<PageId>,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
    /// Whether the header page already carries a record for this index
    root_recorded: AtomicBool,
}

impl<C: KeyComparator> BPlusTree<C> {
    /// Opens (or registers) the index named `name`. If the header page
    /// already records a root for this name, the tree re-attaches to it.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        assert!(
            (2..=LEAF_SLOT_CAPACITY).contains(&leaf_max_size),
            "leaf_max_size out of range"
        );
        assert!(
            (3..=INTERNAL_SLOT_CAPACITY).contains(&internal_max_size),
            "internal_max_size out of range"
        );

        let index_name = name.into();

        let mut guard = bpm
            .checked_write_page(HEADER_PAGE_ID)?
            .ok_or(BrambleError::PageNotFound(HEADER_PAGE_ID))?;
        if !HeaderPageRef::new(guard.data()).is_valid() {
            HeaderPage::new(guard.data_mut()).init();
        }
        let recorded_root = HeaderPageRef::new(guard.data()).get_record(&index_name);
        drop(guard);

        Ok(Self {
            index_name,
            root_id_latch: RwLock::new(recorded_root.unwrap_or(INVALID_PAGE_ID)),
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            root_recorded: AtomicBool::new(recorded_root.is_some()),
        })
    }

    pub fn name(&self) -> &str {
        &self.index_name
    }

    pub fn is_empty(&self) -> bool {
        *self.root_id_latch.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_id_latch.read()
    }

    /// Point lookup.
    pub fn get(&self, key: &IndexKey) -> Result<Option<RecordId>> {
        let guard = match self.find_leaf(key, false)? {
            Some(guard) => guard,
            None => return Ok(None),
        };
        let leaf = LeafPageRef::new(guard.data());
        Ok(leaf.lookup(key, &self.comparator))
    }

    /// Inserts a unique key. Returns false (and changes nothing) when the
    /// key is already present.
    pub fn insert(&self, key: &IndexKey, value: RecordId) -> Result<bool> {
        let mut ctx = Context::new();
        ctx.root_guard = Some(self.root_id_latch.write());

        if ctx.root_page_id() == Some(INVALID_PAGE_ID) {
            self.start_new_tree(key, value, &mut ctx)?;
            return Ok(true);
        }

        let mut leaf_guard = self.find_leaf_mut(key, Operation::Insert, &mut ctx)?;

        // Reject duplicates before any byte is written
        if LeafPageRef::new(leaf_guard.data())
            .lookup(key, &self.comparator)
            .is_some()
        {
            return Ok(false);
        }

        let (new_size, leaf_max) = {
            let mut leaf = LeafPage::new(leaf_guard.data_mut());
            let new_size = leaf.insert(key, value, &self.comparator);
            (new_size, leaf.max_size())
        };

        if new_size < leaf_max {
            return Ok(true);
        }

        // The leaf filled to max_size: split and lift a separator
        self.split_leaf(leaf_guard, &mut ctx)?;
        Ok(true)
    }

    /// Removes `key` if present. A missing key is not an error.
    pub fn remove(&self, key: &IndexKey) -> Result<()> {
        let mut ctx = Context::new();
        ctx.root_guard = Some(self.root_id_latch.write());

        let result = self.remove_entry(key, &mut ctx);

        // Emptied pages go back to the pool only after every latch and pin
        // from this operation is gone
        let orphaned = std::mem::take(&mut ctx.orphaned);
        drop(ctx);
        for page_id in orphaned {
            // A racing scan may still pin the page; leak the id rather
            // than fail the delete
            let _ = self.bpm.delete_page(page_id);
        }

        result
    }

    /// Iterator positioned at the smallest key.
    pub fn begin(&self) -> Result<BTreeIterator> {
        match self.find_leaf(&IndexKey::ZERO, true)? {
            Some(guard) => Ok(BTreeIterator::new(Arc::clone(&self.bpm), guard, 0)),
            None => Ok(self.end()),
        }
    }

    /// Iterator positioned at the first key >= `key`.
    pub fn begin_from(&self, key: &IndexKey) -> Result<BTreeIterator> {
        match self.find_leaf(key, false)? {
            Some(guard) => {
                let index = LeafPageRef::new(guard.data()).key_index(key, &self.comparator);
                Ok(BTreeIterator::new(Arc::clone(&self.bpm), guard, index))
            }
            None => Ok(self.end()),
        }
    }

    /// The past-the-end sentinel.
    pub fn end(&self) -> BTreeIterator {
        BTreeIterator::end_sentinel(Arc::clone(&self.bpm))
    }

    // -----------------------------------------------------------------
    // descent
    // -----------------------------------------------------------------

    /// Read descent: classic hand-over-hand latching. Each child is
    /// read-latched before the parent guard is dropped; the root-id guard
    /// is held only until the root page itself is latched.
    fn find_leaf(&self, key: &IndexKey, leftmost: bool) -> Result<Option<ReadPageGuard>> {
        let root_latch = self.root_id_latch.read();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut guard = self.fetch_read(root_id)?;
        drop(root_latch);

        loop {
            match self.page_type_of(guard.data())? {
                PageType::Leaf => return Ok(Some(guard)),
                PageType::Internal => {
                    let node = InternalPageRef::new(guard.data());
                    let child_id = if leftmost {
                        node.value_at(0)
                    } else {
                        node.lookup(key, &self.comparator)
                    };
                    let child = self.fetch_read(child_id)?;
                    // Assigning releases the parent after the child latch
                    // is held
                    guard = child;
                }
            }
        }
    }

    /// Write descent with latch crabbing. The caller has already taken the
    /// root-id guard in write mode and stored it in `ctx`; each visited
    /// parent joins `ctx.write_set`, and the whole set (plus the root-id
    /// guard) is released whenever the freshly latched child is safe.
    fn find_leaf_mut(
        &self,
        key: &IndexKey,
        op: Operation,
        ctx: &mut Context<'_>,
    ) -> Result<WritePageGuard> {
        let root_id = ctx.root_page_id().ok_or_else(|| {
            BrambleError::IndexCorrupted(
                "write descent started without the root-id guard".to_string(),
            )
        })?;

        let mut guard = self.fetch_write(root_id)?;
        if self.is_safe(guard.data(), op) {
            ctx.root_guard = None;
        }

        loop {
            match self.page_type_of(guard.data())? {
                PageType::Leaf => return Ok(guard),
                PageType::Internal => {
                    let child_id = InternalPageRef::new(guard.data()).lookup(key, &self.comparator);
                    let child = self.fetch_write(child_id)?;
                    ctx.write_set.push_back(guard);
                    if self.is_safe(child.data(), op) {
                        ctx.release_ancestors();
                    }
                    guard = child;
                }
            }
        }
    }

    /// A page is safe when the pending operation cannot make it split or
    /// underflow, i.e. no structural change can climb past it.
    fn is_safe(&self, data: &[u8], op: Operation) -> bool {
        let page = BTreePageRef::new(data);
        let size = page.size();
        match op {
            Operation::Insert => size + 1 < page.max_size(),
            Operation::Delete => {
                if page.is_root() {
                    if page.is_leaf() {
                        size > 1
                    } else {
                        size > 2
                    }
                } else {
                    size > page.min_size()
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // insertion
    // -----------------------------------------------------------------

    /// Bootstraps an empty tree: one leaf page becomes the root and the
    /// header page gets a fresh record for this index.
    fn start_new_tree(&self, key: &IndexKey, value: RecordId, ctx: &mut Context<'_>) -> Result<()> {
        let root_id = self.bpm.new_page()?;
        let mut guard = self.fetch_write(root_id)?;
        {
            let mut leaf = LeafPage::new(guard.data_mut());
            leaf.init(root_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf.insert(key, value, &self.comparator);
        }
        drop(guard);

        self.install_root(root_id, ctx)
    }

    fn split_leaf(&self, mut leaf_guard: WritePageGuard, ctx: &mut Context<'_>) -> Result<()> {
        let new_leaf_id = self.bpm.new_page()?;
        let mut new_guard = self.fetch_write(new_leaf_id)?;

        let sep_key = {
            let mut leaf = LeafPage::new(leaf_guard.data_mut());
            let mut new_leaf = LeafPage::new(new_guard.data_mut());
            new_leaf.init(new_leaf_id, leaf.parent_page_id(), self.leaf_max_size);
            leaf.move_half_to(&mut new_leaf);
            new_leaf.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(new_leaf_id);
            new_leaf.key_at(0)
        };

        self.insert_into_parent(leaf_guard, sep_key, new_guard, ctx)
    }

    /// Wires a freshly split-off page into the tree: either the parent has
    /// room, or it splits too and the lift recurses. When the split reaches
    /// the root the tree grows a level.
    fn insert_into_parent(
        &self,
        mut old_guard: WritePageGuard,
        sep_key: IndexKey,
        mut new_guard: WritePageGuard,
        ctx: &mut Context<'_>,
    ) -> Result<()> {
        let old_id = old_guard.page_id();
        let new_id = new_guard.page_id();
        let parent_id = BTreePageRef::new(old_guard.data()).parent_page_id();

        if parent_id == INVALID_PAGE_ID {
            // The root itself split: grow the tree by one level
            let new_root_id = self.bpm.new_page()?;
            let mut root_guard = self.fetch_write(new_root_id)?;
            {
                let mut root = InternalPage::new(root_guard.data_mut());
                root.init(new_root_id, INVALID_PAGE_ID, self.internal_max_size);
                root.populate_new_root(old_id, &sep_key, new_id);
            }
            set_parent_page_id_raw(old_guard.data_mut(), new_root_id);
            set_parent_page_id_raw(new_guard.data_mut(), new_root_id);
            drop(old_guard);
            drop(new_guard);
            drop(root_guard);

            return self.install_root(new_root_id, ctx);
        }

        let mut parent_guard = ctx.write_set.pop_back().ok_or_else(|| {
            BrambleError::IndexCorrupted("latch set empty while propagating a split".to_string())
        })?;

        let (new_size, parent_max) = {
            let mut parent = InternalPage::new(parent_guard.data_mut());
            let new_size = parent.insert_after(old_id, &sep_key, new_id)?;
            (new_size, parent.max_size())
        };

        // The children are fully wired; release them before the parent is
        // (possibly) restructured
        drop(old_guard);
        drop(new_guard);

        if new_size < parent_max {
            return Ok(());
        }

        let new_parent_id = self.bpm.new_page()?;
        let mut new_parent_guard = self.fetch_write(new_parent_id)?;

        let lifted_key = {
            let mut parent = InternalPage::new(parent_guard.data_mut());
            let mut new_parent = InternalPage::new(new_parent_guard.data_mut());
            new_parent.init(new_parent_id, parent.parent_page_id(), self.internal_max_size);
            parent.move_half_to(&mut new_parent, &self.bpm)?;
            // The move left the lifted separator in the new page's slot 0,
            // which doubles as its placeholder from here on
            new_parent.key_at(0)
        };

        self.insert_into_parent(parent_guard, lifted_key, new_parent_guard, ctx)
    }

    /// Points the root-id at `new_root_id`, persists the change in the
    /// header page, and releases the root-id guard immediately after.
    fn install_root(&self, new_root_id: PageId, ctx: &mut Context<'_>) -> Result<()> {
        let root_latch = ctx.root_guard.as_mut().ok_or_else(|| {
            BrambleError::IndexCorrupted("root change without the root-id guard".to_string())
        })?;
        **root_latch = new_root_id;
        self.update_root_page_id(new_root_id)?;
        ctx.root_guard = None;
        Ok(())
    }

    // -----------------------------------------------------------------
    // deletion
    // -----------------------------------------------------------------

    fn remove_entry(&self, key: &IndexKey, ctx: &mut Context<'_>) -> Result<()> {
        if ctx.root_page_id() == Some(INVALID_PAGE_ID) {
            return Ok(());
        }

        let mut leaf_guard = self.find_leaf_mut(key, Operation::Delete, ctx)?;

        // A missing key leaves the tree untouched
        if LeafPageRef::new(leaf_guard.data())
            .lookup(key, &self.comparator)
            .is_none()
        {
            return Ok(());
        }

        let (new_size, min_size, is_root) = {
            let mut leaf = LeafPage::new(leaf_guard.data_mut());
            let new_size = leaf.remove(key, &self.comparator);
            (
                new_size,
                leaf.min_size(),
                leaf.parent_page_id() == INVALID_PAGE_ID,
            )
        };

        if is_root {
            self.adjust_root(leaf_guard, ctx)
        } else if new_size < min_size {
            self.coalesce_or_redistribute(leaf_guard, ctx)
        } else {
            Ok(())
        }
    }

    /// Fixes an underflowing page by borrowing from or merging with a
    /// sibling under the same parent. Recurses upward when the merge makes
    /// the parent underflow in turn.
    fn coalesce_or_redistribute(
        &self,
        node_guard: WritePageGuard,
        ctx: &mut Context<'_>,
    ) -> Result<()> {
        if BTreePageRef::new(node_guard.data()).is_root() {
            return self.adjust_root(node_guard, ctx);
        }

        let node_id = node_guard.page_id();
        let parent_guard = ctx.write_set.pop_back().ok_or_else(|| {
            BrambleError::IndexCorrupted("latch set empty while rebalancing".to_string())
        })?;

        let (node_index, sibling_id) = {
            let parent = InternalPageRef::new(parent_guard.data());
            let node_index = parent.value_index(node_id).ok_or_else(|| {
                BrambleError::IndexCorrupted(format!(
                    "page {} is not listed by its parent {}",
                    node_id,
                    parent.page_id()
                ))
            })?;
            // Prefer the left sibling; only the leftmost child borrows
            // from its right
            let sibling_index = if node_index == 0 { 1 } else { node_index - 1 };
            (node_index, parent.value_at(sibling_index))
        };

        let sibling_guard = self.fetch_write(sibling_id)?;

        let (node_size, sibling_size, max_size) = {
            let node = BTreePageRef::new(node_guard.data());
            let sibling = BTreePageRef::new(sibling_guard.data());
            (node.size(), sibling.size(), node.max_size())
        };

        if node_size + sibling_size >= max_size {
            // Coalescing would overflow: rotate one entry instead
            self.redistribute(node_guard, sibling_guard, parent_guard, node_index)
        } else {
            self.coalesce(node_guard, sibling_guard, parent_guard, node_index, ctx)
        }
    }

    /// Rotates a single entry across the sibling boundary and refreshes the
    /// separator in the parent.
    fn redistribute(
        &self,
        mut node_guard: WritePageGuard,
        mut sibling_guard: WritePageGuard,
        mut parent_guard: WritePageGuard,
        node_index: usize,
    ) -> Result<()> {
        match self.page_type_of(node_guard.data())? {
            PageType::Leaf => {
                let mut node = LeafPage::new(node_guard.data_mut());
                let mut sibling = LeafPage::new(sibling_guard.data_mut());
                let mut parent = InternalPage::new(parent_guard.data_mut());
                if node_index == 0 {
                    // The right sibling lends its first entry
                    sibling.move_first_to_end_of(&mut node);
                    parent.set_key_at(1, &sibling.key_at(0));
                } else {
                    // The left sibling lends its last entry
                    sibling.move_last_to_front_of(&mut node);
                    parent.set_key_at(node_index, &node.key_at(0));
                }
            }
            PageType::Internal => {
                let mut node = InternalPage::new(node_guard.data_mut());
                let mut sibling = InternalPage::new(sibling_guard.data_mut());
                let mut parent = InternalPage::new(parent_guard.data_mut());
                if node_index == 0 {
                    let middle_key = parent.key_at(1);
                    sibling.move_first_to_end_of(&mut node, &middle_key, &self.bpm)?;
                    parent.set_key_at(1, &sibling.key_at(0));
                } else {
                    let middle_key = parent.key_at(node_index);
                    sibling.move_last_to_front_of(&mut node, &middle_key, &self.bpm)?;
                    parent.set_key_at(node_index, &node.key_at(0));
                }
            }
        }

        Ok(())
    }

    /// Merges the right-hand participant into the left-hand one, drops its
    /// slot from the parent, and recurses if the parent underflows.
    fn coalesce(
        &self,
        node_guard: WritePageGuard,
        sibling_guard: WritePageGuard,
        mut parent_guard: WritePageGuard,
        node_index: usize,
        ctx: &mut Context<'_>,
    ) -> Result<()> {
        let (mut left_guard, mut right_guard, remove_index) = if node_index == 0 {
            (node_guard, sibling_guard, 1)
        } else {
            (sibling_guard, node_guard, node_index)
        };

        match self.page_type_of(left_guard.data())? {
            PageType::Leaf => {
                let mut left = LeafPage::new(left_guard.data_mut());
                let mut right = LeafPage::new(right_guard.data_mut());
                let next_id = right.next_page_id();
                right.move_all_to(&mut left);
                left.set_next_page_id(next_id);
            }
            PageType::Internal => {
                // The separator demotes into the merged page
                let middle_key = InternalPageRef::new(parent_guard.data()).key_at(remove_index);
                let mut left = InternalPage::new(left_guard.data_mut());
                let mut right = InternalPage::new(right_guard.data_mut());
                right.move_all_to(&mut left, &middle_key, &self.bpm)?;
            }
        }

        let right_id = right_guard.page_id();
        drop(left_guard);
        drop(right_guard);
        ctx.orphaned.push(right_id);

        let (parent_new_size, parent_min, parent_is_root) = {
            let mut parent = InternalPage::new(parent_guard.data_mut());
            parent.remove(remove_index);
            (
                parent.size(),
                parent.min_size(),
                parent.parent_page_id() == INVALID_PAGE_ID,
            )
        };

        if parent_is_root {
            if parent_new_size == 1 {
                return self.adjust_root(parent_guard, ctx);
            }
            return Ok(());
        }

        if parent_new_size < parent_min {
            return self.coalesce_or_redistribute(parent_guard, ctx);
        }

        Ok(())
    }

    /// Handles the two root collapse cases: an internal root left with one
    /// child hands the root role down, and an emptied root leaf clears the
    /// tree. Anything else is a no-op (the root is exempt from min-size).
    fn adjust_root(&self, mut root_guard: WritePageGuard, ctx: &mut Context<'_>) -> Result<()> {
        let (page_type, size) = {
            let page = BTreePageRef::new(root_guard.data());
            (self.page_type_of(root_guard.data())?, page.size())
        };
        let old_root_id = root_guard.page_id();

        match (page_type, size) {
            (PageType::Internal, 1) => {
                let child_id = {
                    let mut root = InternalPage::new(root_guard.data_mut());
                    root.remove_and_return_only_child()
                };
                drop(root_guard);

                // The promoted child becomes the new root
                reparent(&self.bpm, child_id, INVALID_PAGE_ID)?;
                self.install_root(child_id, ctx)?;
                ctx.orphaned.push(old_root_id);
            }
            (PageType::Leaf, 0) => {
                drop(root_guard);

                self.install_root(INVALID_PAGE_ID, ctx)?;
                ctx.orphaned.push(old_root_id);
            }
            _ => {}
        }

        Ok(())
    }

    // -----------------------------------------------------------------
    // catalog hook
    // -----------------------------------------------------------------

    /// Persists the current root id under the index name in the header
    /// page: an insert on first root creation, an update afterwards.
    fn update_root_page_id(&self, root_id: PageId) -> Result<()> {
        let mut guard = self
            .bpm
            .checked_write_page(HEADER_PAGE_ID)?
            .ok_or(BrambleError::PageNotFound(HEADER_PAGE_ID))?;
        let mut header = HeaderPage::new(guard.data_mut());
        if self.root_recorded.load(Ordering::Acquire) {
            header.update_record(&self.index_name, root_id)?;
        } else {
            header.insert_record(&self.index_name, root_id)?;
            self.root_recorded.store(true, Ordering::Release);
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // helpers
    // -----------------------------------------------------------------

    fn fetch_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        self.bpm
            .checked_read_page(page_id)?
            .ok_or(BrambleError::PageNotFound(page_id))
    }

    fn fetch_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        self.bpm
            .checked_write_page(page_id)?
            .ok_or(BrambleError::PageNotFound(page_id))
    }

    fn page_type_of(&self, data: &[u8]) -> Result<PageType> {
        let page = BTreePageRef::new(data);
        page.page_type().ok_or_else(|| {
            BrambleError::IndexCorrupted(format!(
                "page {} carries an invalid type tag",
                page.page_id()
            ))
        })
    }
}
