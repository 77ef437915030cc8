use std::cmp::Ordering;

use crate::buffer::BufferPoolManager;
use crate::common::{BrambleError, PageId, RecordId, Result, SlotId, INVALID_PAGE_ID, PAGE_SIZE};

use super::key_comparator::{IndexKey, KeyComparator, KEY_SIZE};

// Common header, shared by both page kinds:
//   type (1) | size (2) | max_size (2) | parent (4) | page id (4) | lsn (8)
const PAGE_TYPE_OFFSET: usize = 0;
const SIZE_OFFSET: usize = 1;
const MAX_SIZE_OFFSET: usize = 3;
const PARENT_PAGE_OFFSET: usize = 5;
const PAGE_ID_OFFSET: usize = 9;
const LSN_OFFSET: usize = 13;
const COMMON_HEADER_SIZE: usize = 21;

// Leaf pages append the right-sibling pointer
const NEXT_PAGE_OFFSET: usize = COMMON_HEADER_SIZE;
const LEAF_HEADER_SIZE: usize = COMMON_HEADER_SIZE + 4;

const RECORD_ID_SIZE: usize = 6; // PageId (4) + SlotId (2)
const LEAF_SLOT_SIZE: usize = KEY_SIZE + RECORD_ID_SIZE;
const INTERNAL_SLOT_SIZE: usize = KEY_SIZE + 4;

/// Hard upper bound on leaf_max_size imposed by the page layout
pub const LEAF_SLOT_CAPACITY: usize = (PAGE_SIZE - LEAF_HEADER_SIZE) / LEAF_SLOT_SIZE;
/// Hard upper bound on internal_max_size imposed by the page layout
pub const INTERNAL_SLOT_CAPACITY: usize = (PAGE_SIZE - COMMON_HEADER_SIZE) / INTERNAL_SLOT_SIZE;

const LEAF_PAGE_TAG: u8 = 1;
const INTERNAL_PAGE_TAG: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Leaf,
    Internal,
}

// ---------------------------------------------------------------------------
// raw field accessors shared by every view
// ---------------------------------------------------------------------------

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap())
}

fn write_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn read_page_id(data: &[u8], offset: usize) -> PageId {
    PageId::new(u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap()))
}

fn write_page_id(data: &mut [u8], offset: usize, page_id: PageId) {
    data[offset..offset + 4].copy_from_slice(&page_id.as_u32().to_le_bytes());
}

fn read_key(data: &[u8], offset: usize) -> IndexKey {
    IndexKey::from_bytes(data[offset..offset + KEY_SIZE].try_into().unwrap())
}

fn write_key(data: &mut [u8], offset: usize, key: &IndexKey) {
    data[offset..offset + KEY_SIZE].copy_from_slice(key.as_bytes());
}

fn read_record_id(data: &[u8], offset: usize) -> RecordId {
    let page_id = read_page_id(data, offset);
    let slot_id = SlotId::new(read_u16(data, offset + 4));
    RecordId::new(page_id, slot_id)
}

fn write_record_id(data: &mut [u8], offset: usize, rid: RecordId) {
    write_page_id(data, offset, rid.page_id);
    write_u16(data, offset + 4, rid.slot_id.as_u16());
}

fn page_size_of(data: &[u8]) -> usize {
    read_u16(data, SIZE_OFFSET) as usize
}

fn max_size_of(data: &[u8]) -> usize {
    read_u16(data, MAX_SIZE_OFFSET) as usize
}

fn set_size_of(data: &mut [u8], size: usize) {
    write_u16(data, SIZE_OFFSET, size as u16);
}

fn leaf_slot_offset(index: usize) -> usize {
    LEAF_HEADER_SIZE + index * LEAF_SLOT_SIZE
}

fn internal_slot_offset(index: usize) -> usize {
    COMMON_HEADER_SIZE + index * INTERNAL_SLOT_SIZE
}

/// Lower bound within a leaf: smallest index whose key is >= `key`,
/// or the current size when every key is smaller.
fn leaf_lower_bound(data: &[u8], key: &IndexKey, comparator: &dyn KeyComparator) -> usize {
    let mut left = 0;
    let mut right = page_size_of(data);

    while left < right {
        let mid = left + (right - left) / 2;
        let mid_key = read_key(data, leaf_slot_offset(mid));
        if comparator.compare(mid_key.as_bytes(), key.as_bytes()) == Ordering::Less {
            left = mid + 1;
        } else {
            right = mid;
        }
    }

    left
}

/// Routing search within an internal page: upper bound over the separator
/// keys [1, size), returning the child whose interval contains `key`.
/// Slot 0's key is a placeholder and never examined.
fn internal_route(data: &[u8], key: &IndexKey, comparator: &dyn KeyComparator) -> PageId {
    let size = page_size_of(data);
    let mut left = 1;
    let mut right = size;

    while left < right {
        let mid = left + (right - left) / 2;
        let mid_key = read_key(data, internal_slot_offset(mid));
        if comparator.compare(mid_key.as_bytes(), key.as_bytes()) == Ordering::Greater {
            right = mid;
        } else {
            left = mid + 1;
        }
    }

    read_page_id(data, internal_slot_offset(left - 1) + KEY_SIZE)
}

/// Rewrites the parent pointer of an already-latched page, whichever kind
/// it is.
pub(crate) fn set_parent_page_id_raw(data: &mut [u8], parent_id: PageId) {
    write_page_id(data, PARENT_PAGE_OFFSET, parent_id);
}

/// Rewrites a child page's parent pointer through the buffer pool.
/// The caller holds the writer latch on the page that adopts the child.
pub(crate) fn reparent(
    bpm: &BufferPoolManager,
    child_id: PageId,
    parent_id: PageId,
) -> Result<()> {
    let mut guard = bpm
        .checked_write_page(child_id)?
        .ok_or(BrambleError::PageNotFound(child_id))?;
    set_parent_page_id_raw(guard.data_mut(), parent_id);
    Ok(())
}

// ---------------------------------------------------------------------------
// common header view
// ---------------------------------------------------------------------------

/// Read-only view of the header every index page carries, used during
/// descent before the page kind is known.
pub struct BTreePageRef<'a> {
    data: &'a [u8],
}

impl<'a> BTreePageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn page_type(&self) -> Option<PageType> {
        match self.data[PAGE_TYPE_OFFSET] {
            LEAF_PAGE_TAG => Some(PageType::Leaf),
            INTERNAL_PAGE_TAG => Some(PageType::Internal),
            _ => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.page_type() == Some(PageType::Leaf)
    }

    pub fn size(&self) -> usize {
        page_size_of(self.data)
    }

    pub fn max_size(&self) -> usize {
        max_size_of(self.data)
    }

    pub fn min_size(&self) -> usize {
        max_size_of(self.data) / 2
    }

    pub fn parent_page_id(&self) -> PageId {
        read_page_id(self.data, PARENT_PAGE_OFFSET)
    }

    pub fn page_id(&self) -> PageId {
        read_page_id(self.data, PAGE_ID_OFFSET)
    }

    pub fn is_root(&self) -> bool {
        self.parent_page_id() == INVALID_PAGE_ID
    }

    pub fn lsn(&self) -> u64 {
        u64::from_le_bytes(self.data[LSN_OFFSET..LSN_OFFSET + 8].try_into().unwrap())
    }
}

// ---------------------------------------------------------------------------
// leaf page
// ---------------------------------------------------------------------------

/// Mutable view of a leaf page: an ordered run of (key, RecordId) slots plus
/// the right-sibling pointer.
pub struct LeafPage<'a> {
    data: &'a mut [u8],
}

impl<'a> LeafPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn init(&mut self, page_id: PageId, parent_id: PageId, max_size: usize) {
        self.data.fill(0);
        self.data[PAGE_TYPE_OFFSET] = LEAF_PAGE_TAG;
        set_size_of(self.data, 0);
        write_u16(self.data, MAX_SIZE_OFFSET, max_size as u16);
        write_page_id(self.data, PARENT_PAGE_OFFSET, parent_id);
        write_page_id(self.data, PAGE_ID_OFFSET, page_id);
        self.data[LSN_OFFSET..LSN_OFFSET + 8].copy_from_slice(&0u64.to_le_bytes());
        write_page_id(self.data, NEXT_PAGE_OFFSET, INVALID_PAGE_ID);
    }

    pub fn page_id(&self) -> PageId {
        read_page_id(self.data, PAGE_ID_OFFSET)
    }

    pub fn parent_page_id(&self) -> PageId {
        read_page_id(self.data, PARENT_PAGE_OFFSET)
    }

    pub fn set_parent_page_id(&mut self, parent_id: PageId) {
        write_page_id(self.data, PARENT_PAGE_OFFSET, parent_id);
    }

    pub fn size(&self) -> usize {
        page_size_of(self.data)
    }

    pub fn max_size(&self) -> usize {
        max_size_of(self.data)
    }

    pub fn min_size(&self) -> usize {
        max_size_of(self.data) / 2
    }

    pub fn next_page_id(&self) -> PageId {
        read_page_id(self.data, NEXT_PAGE_OFFSET)
    }

    pub fn set_next_page_id(&mut self, next_id: PageId) {
        write_page_id(self.data, NEXT_PAGE_OFFSET, next_id);
    }

    pub fn key_at(&self, index: usize) -> IndexKey {
        read_key(self.data, leaf_slot_offset(index))
    }

    pub fn value_at(&self, index: usize) -> RecordId {
        read_record_id(self.data, leaf_slot_offset(index) + KEY_SIZE)
    }

    /// Smallest index whose key is >= `key`, or `size()` if none.
    pub fn key_index(&self, key: &IndexKey, comparator: &dyn KeyComparator) -> usize {
        leaf_lower_bound(self.data, key, comparator)
    }

    pub fn lookup(&self, key: &IndexKey, comparator: &dyn KeyComparator) -> Option<RecordId> {
        let index = self.key_index(key, comparator);
        if index < self.size()
            && comparator.compare(self.key_at(index).as_bytes(), key.as_bytes()) == Ordering::Equal
        {
            Some(self.value_at(index))
        } else {
            None
        }
    }

    /// Inserts (key, value) keeping the slots ordered. A duplicate key leaves
    /// the page untouched. Returns the resulting size.
    pub fn insert(
        &mut self,
        key: &IndexKey,
        value: RecordId,
        comparator: &dyn KeyComparator,
    ) -> usize {
        let size = self.size();
        let index = self.key_index(key, comparator);

        if index < size
            && comparator.compare(self.key_at(index).as_bytes(), key.as_bytes()) == Ordering::Equal
        {
            return size;
        }

        self.data.copy_within(
            leaf_slot_offset(index)..leaf_slot_offset(size),
            leaf_slot_offset(index) + LEAF_SLOT_SIZE,
        );
        write_key(self.data, leaf_slot_offset(index), key);
        write_record_id(self.data, leaf_slot_offset(index) + KEY_SIZE, value);
        set_size_of(self.data, size + 1);

        size + 1
    }

    /// Removes `key` if present, closing the gap. Returns the resulting size.
    pub fn remove(&mut self, key: &IndexKey, comparator: &dyn KeyComparator) -> usize {
        let size = self.size();
        let index = self.key_index(key, comparator);

        if index >= size
            || comparator.compare(self.key_at(index).as_bytes(), key.as_bytes()) != Ordering::Equal
        {
            return size;
        }

        self.data.copy_within(
            leaf_slot_offset(index + 1)..leaf_slot_offset(size),
            leaf_slot_offset(index),
        );
        set_size_of(self.data, size - 1);

        size - 1
    }

    /// Moves the upper half of this page's slots to `other`, which must be
    /// freshly initialised. The caller wires the sibling pointers.
    pub fn move_half_to(&mut self, other: &mut LeafPage<'_>) {
        let size = self.size();
        let split = size / 2;
        let moved = size - split;

        debug_assert_eq!(other.size(), 0);
        other.data[leaf_slot_offset(0)..leaf_slot_offset(moved)]
            .copy_from_slice(&self.data[leaf_slot_offset(split)..leaf_slot_offset(size)]);

        set_size_of(other.data, moved);
        set_size_of(self.data, split);
    }

    /// Appends every slot of this page to `other`'s tail and empties this
    /// page. The caller rewires `other`'s sibling pointer.
    pub fn move_all_to(&mut self, other: &mut LeafPage<'_>) {
        let size = self.size();
        let other_size = other.size();

        other.data[leaf_slot_offset(other_size)..leaf_slot_offset(other_size + size)]
            .copy_from_slice(&self.data[leaf_slot_offset(0)..leaf_slot_offset(size)]);

        set_size_of(other.data, other_size + size);
        set_size_of(self.data, 0);
    }

    /// Moves this page's first slot to the end of `other` (right-to-left
    /// rotation across the sibling boundary).
    pub fn move_first_to_end_of(&mut self, other: &mut LeafPage<'_>) {
        let size = self.size();
        let other_size = other.size();

        other.data[leaf_slot_offset(other_size)..leaf_slot_offset(other_size + 1)]
            .copy_from_slice(&self.data[leaf_slot_offset(0)..leaf_slot_offset(1)]);
        set_size_of(other.data, other_size + 1);

        self.data
            .copy_within(leaf_slot_offset(1)..leaf_slot_offset(size), leaf_slot_offset(0));
        set_size_of(self.data, size - 1);
    }

    /// Moves this page's last slot to the front of `other` (left-to-right
    /// rotation across the sibling boundary).
    pub fn move_last_to_front_of(&mut self, other: &mut LeafPage<'_>) {
        let size = self.size();
        let other_size = other.size();

        other.data.copy_within(
            leaf_slot_offset(0)..leaf_slot_offset(other_size),
            leaf_slot_offset(1),
        );
        other.data[leaf_slot_offset(0)..leaf_slot_offset(1)]
            .copy_from_slice(&self.data[leaf_slot_offset(size - 1)..leaf_slot_offset(size)]);
        set_size_of(other.data, other_size + 1);

        set_size_of(self.data, size - 1);
    }
}

/// Read-only view of a leaf page.
pub struct LeafPageRef<'a> {
    data: &'a [u8],
}

impl<'a> LeafPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn page_id(&self) -> PageId {
        read_page_id(self.data, PAGE_ID_OFFSET)
    }

    pub fn parent_page_id(&self) -> PageId {
        read_page_id(self.data, PARENT_PAGE_OFFSET)
    }

    pub fn size(&self) -> usize {
        page_size_of(self.data)
    }

    pub fn max_size(&self) -> usize {
        max_size_of(self.data)
    }

    pub fn next_page_id(&self) -> PageId {
        read_page_id(self.data, NEXT_PAGE_OFFSET)
    }

    pub fn key_at(&self, index: usize) -> IndexKey {
        read_key(self.data, leaf_slot_offset(index))
    }

    pub fn value_at(&self, index: usize) -> RecordId {
        read_record_id(self.data, leaf_slot_offset(index) + KEY_SIZE)
    }

    pub fn key_index(&self, key: &IndexKey, comparator: &dyn KeyComparator) -> usize {
        leaf_lower_bound(self.data, key, comparator)
    }

    pub fn lookup(&self, key: &IndexKey, comparator: &dyn KeyComparator) -> Option<RecordId> {
        let index = self.key_index(key, comparator);
        if index < self.size()
            && comparator.compare(self.key_at(index).as_bytes(), key.as_bytes()) == Ordering::Equal
        {
            Some(self.value_at(index))
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// internal page
// ---------------------------------------------------------------------------

/// Mutable view of an internal page: an ordered run of (key, child id)
/// slots. Slot 0's key is a placeholder ignored by search; the number of
/// live children equals `size()`.
pub struct InternalPage<'a> {
    data: &'a mut [u8],
}

impl<'a> InternalPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn init(&mut self, page_id: PageId, parent_id: PageId, max_size: usize) {
        self.data.fill(0);
        self.data[PAGE_TYPE_OFFSET] = INTERNAL_PAGE_TAG;
        set_size_of(self.data, 0);
        write_u16(self.data, MAX_SIZE_OFFSET, max_size as u16);
        write_page_id(self.data, PARENT_PAGE_OFFSET, parent_id);
        write_page_id(self.data, PAGE_ID_OFFSET, page_id);
        self.data[LSN_OFFSET..LSN_OFFSET + 8].copy_from_slice(&0u64.to_le_bytes());
    }

    pub fn page_id(&self) -> PageId {
        read_page_id(self.data, PAGE_ID_OFFSET)
    }

    pub fn parent_page_id(&self) -> PageId {
        read_page_id(self.data, PARENT_PAGE_OFFSET)
    }

    pub fn set_parent_page_id(&mut self, parent_id: PageId) {
        write_page_id(self.data, PARENT_PAGE_OFFSET, parent_id);
    }

    pub fn size(&self) -> usize {
        page_size_of(self.data)
    }

    pub fn max_size(&self) -> usize {
        max_size_of(self.data)
    }

    pub fn min_size(&self) -> usize {
        max_size_of(self.data) / 2
    }

    pub fn key_at(&self, index: usize) -> IndexKey {
        read_key(self.data, internal_slot_offset(index))
    }

    pub fn set_key_at(&mut self, index: usize, key: &IndexKey) {
        write_key(self.data, internal_slot_offset(index), key);
    }

    pub fn value_at(&self, index: usize) -> PageId {
        read_page_id(self.data, internal_slot_offset(index) + KEY_SIZE)
    }

    /// Linear scan for the slot holding `child_id`. Children are page ids,
    /// not ordered, so no better than linear is possible.
    pub fn value_index(&self, child_id: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == child_id)
    }

    /// Routing search: the child whose subtree interval contains `key`.
    pub fn lookup(&self, key: &IndexKey, comparator: &dyn KeyComparator) -> PageId {
        internal_route(self.data, key, comparator)
    }

    /// Resets this page to hold exactly two children separated by `sep_key`.
    /// Only called when the tree grows a level.
    pub fn populate_new_root(&mut self, old_child: PageId, sep_key: &IndexKey, new_child: PageId) {
        write_key(self.data, internal_slot_offset(0), &IndexKey::ZERO);
        write_page_id(self.data, internal_slot_offset(0) + KEY_SIZE, old_child);
        write_key(self.data, internal_slot_offset(1), sep_key);
        write_page_id(self.data, internal_slot_offset(1) + KEY_SIZE, new_child);
        set_size_of(self.data, 2);
    }

    /// Inserts (sep_key, new_child) immediately after the slot holding
    /// `old_child`. Returns the resulting size.
    pub fn insert_after(
        &mut self,
        old_child: PageId,
        sep_key: &IndexKey,
        new_child: PageId,
    ) -> Result<usize> {
        let size = self.size();
        let index = self.value_index(old_child).ok_or_else(|| {
            BrambleError::IndexCorrupted(format!(
                "page {} is not a child of page {}",
                old_child,
                self.page_id()
            ))
        })?;

        self.data.copy_within(
            internal_slot_offset(index + 1)..internal_slot_offset(size),
            internal_slot_offset(index + 2),
        );
        write_key(self.data, internal_slot_offset(index + 1), sep_key);
        write_page_id(
            self.data,
            internal_slot_offset(index + 1) + KEY_SIZE,
            new_child,
        );
        set_size_of(self.data, size + 1);

        Ok(size + 1)
    }

    /// Deletes slot `index`, closing the gap.
    pub fn remove(&mut self, index: usize) {
        let size = self.size();
        self.data.copy_within(
            internal_slot_offset(index + 1)..internal_slot_offset(size),
            internal_slot_offset(index),
        );
        set_size_of(self.data, size - 1);
    }

    /// Empties a collapsing root and returns its sole surviving child.
    /// Precondition: size() == 1.
    pub fn remove_and_return_only_child(&mut self) -> PageId {
        let child = self.value_at(0);
        set_size_of(self.data, 0);
        child
    }

    /// Moves the upper slots to `other` (freshly initialised), keeping
    /// ceil(max_size / 2) here. Moved children are reparented to `other`;
    /// the first moved key lands in `other`'s slot 0, where the caller reads
    /// it as the separator to lift before it becomes the placeholder.
    pub fn move_half_to(
        &mut self,
        other: &mut InternalPage<'_>,
        bpm: &BufferPoolManager,
    ) -> Result<()> {
        let size = self.size();
        let keep = (self.max_size() + 1) / 2;
        let moved = size - keep;

        debug_assert_eq!(other.size(), 0);
        other.data[internal_slot_offset(0)..internal_slot_offset(moved)]
            .copy_from_slice(&self.data[internal_slot_offset(keep)..internal_slot_offset(size)]);

        set_size_of(other.data, moved);
        set_size_of(self.data, keep);

        let other_id = other.page_id();
        for i in 0..moved {
            reparent(bpm, other.value_at(i), other_id)?;
        }

        Ok(())
    }

    /// Appends every slot to `other`'s tail and empties this page.
    /// `middle_key`, demoted from the parent, overwrites the placeholder so
    /// the moved run is fully separated inside `other`.
    pub fn move_all_to(
        &mut self,
        other: &mut InternalPage<'_>,
        middle_key: &IndexKey,
        bpm: &BufferPoolManager,
    ) -> Result<()> {
        self.set_key_at(0, middle_key);

        let size = self.size();
        let other_size = other.size();

        other.data[internal_slot_offset(other_size)..internal_slot_offset(other_size + size)]
            .copy_from_slice(&self.data[internal_slot_offset(0)..internal_slot_offset(size)]);

        set_size_of(other.data, other_size + size);
        set_size_of(self.data, 0);

        let other_id = other.page_id();
        for i in other_size..other_size + size {
            reparent(bpm, other.value_at(i), other_id)?;
        }

        Ok(())
    }

    /// Rotates this page's first slot to the end of `other`. The placeholder
    /// is first given `middle_key` so the rotated slot carries a real
    /// separator; the rotated child is adopted by `other`.
    pub fn move_first_to_end_of(
        &mut self,
        other: &mut InternalPage<'_>,
        middle_key: &IndexKey,
        bpm: &BufferPoolManager,
    ) -> Result<()> {
        self.set_key_at(0, middle_key);

        let size = self.size();
        let other_size = other.size();

        other.data[internal_slot_offset(other_size)..internal_slot_offset(other_size + 1)]
            .copy_from_slice(&self.data[internal_slot_offset(0)..internal_slot_offset(1)]);
        set_size_of(other.data, other_size + 1);

        let other_id = other.page_id();
        reparent(bpm, other.value_at(other_size), other_id)?;

        self.data.copy_within(
            internal_slot_offset(1)..internal_slot_offset(size),
            internal_slot_offset(0),
        );
        set_size_of(self.data, size - 1);

        Ok(())
    }

    /// Rotates this page's last slot to the front of `other`. `other`'s old
    /// placeholder receives `middle_key` before the shift, so the rotated
    /// key becomes the new placeholder and `middle_key` a live separator.
    pub fn move_last_to_front_of(
        &mut self,
        other: &mut InternalPage<'_>,
        middle_key: &IndexKey,
        bpm: &BufferPoolManager,
    ) -> Result<()> {
        other.set_key_at(0, middle_key);

        let size = self.size();
        let other_size = other.size();

        other.data.copy_within(
            internal_slot_offset(0)..internal_slot_offset(other_size),
            internal_slot_offset(1),
        );
        other.data[internal_slot_offset(0)..internal_slot_offset(1)]
            .copy_from_slice(&self.data[internal_slot_offset(size - 1)..internal_slot_offset(size)]);
        set_size_of(other.data, other_size + 1);

        let other_id = other.page_id();
        reparent(bpm, other.value_at(0), other_id)?;

        set_size_of(self.data, size - 1);

        Ok(())
    }
}

/// Read-only view of an internal page.
pub struct InternalPageRef<'a> {
    data: &'a [u8],
}

impl<'a> InternalPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn page_id(&self) -> PageId {
        read_page_id(self.data, PAGE_ID_OFFSET)
    }

    pub fn parent_page_id(&self) -> PageId {
        read_page_id(self.data, PARENT_PAGE_OFFSET)
    }

    pub fn size(&self) -> usize {
        page_size_of(self.data)
    }

    pub fn max_size(&self) -> usize {
        max_size_of(self.data)
    }

    pub fn key_at(&self, index: usize) -> IndexKey {
        read_key(self.data, internal_slot_offset(index))
    }

    pub fn value_at(&self, index: usize) -> PageId {
        read_page_id(self.data, internal_slot_offset(index) + KEY_SIZE)
    }

    pub fn value_index(&self, child_id: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == child_id)
    }

    pub fn lookup(&self, key: &IndexKey, comparator: &dyn KeyComparator) -> PageId {
        internal_route(self.data, key, comparator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::key_comparator::IntegerComparator;

    fn key(n: u64) -> IndexKey {
        IndexKey::from_u64(n)
    }

    fn rid(n: u32) -> RecordId {
        RecordId::new(PageId::new(n), SlotId::new(0))
    }

    #[test]
    fn test_leaf_insert_keeps_order() {
        let cmp = IntegerComparator;
        let mut data = [0u8; PAGE_SIZE];
        let mut leaf = LeafPage::new(&mut data);
        leaf.init(PageId::new(1), INVALID_PAGE_ID, 8);

        for k in [30u64, 10, 20, 40] {
            leaf.insert(&key(k), rid(k as u32), &cmp);
        }

        assert_eq!(leaf.size(), 4);
        for (i, expected) in [10u64, 20, 30, 40].iter().enumerate() {
            assert_eq!(leaf.key_at(i), key(*expected));
            assert_eq!(leaf.value_at(i), rid(*expected as u32));
        }
    }

    #[test]
    fn test_leaf_insert_rejects_duplicate() {
        let cmp = IntegerComparator;
        let mut data = [0u8; PAGE_SIZE];
        let mut leaf = LeafPage::new(&mut data);
        leaf.init(PageId::new(1), INVALID_PAGE_ID, 8);

        assert_eq!(leaf.insert(&key(10), rid(1), &cmp), 1);
        assert_eq!(leaf.insert(&key(10), rid(2), &cmp), 1);
        assert_eq!(leaf.lookup(&key(10), &cmp), Some(rid(1)));
    }

    #[test]
    fn test_leaf_lookup_and_key_index() {
        let cmp = IntegerComparator;
        let mut data = [0u8; PAGE_SIZE];
        let mut leaf = LeafPage::new(&mut data);
        leaf.init(PageId::new(1), INVALID_PAGE_ID, 8);

        for k in [10u64, 20, 30] {
            leaf.insert(&key(k), rid(k as u32), &cmp);
        }

        assert_eq!(leaf.key_index(&key(5), &cmp), 0);
        assert_eq!(leaf.key_index(&key(20), &cmp), 1);
        assert_eq!(leaf.key_index(&key(25), &cmp), 2);
        assert_eq!(leaf.key_index(&key(35), &cmp), 3);

        assert_eq!(leaf.lookup(&key(20), &cmp), Some(rid(20)));
        assert_eq!(leaf.lookup(&key(25), &cmp), None);
    }

    #[test]
    fn test_leaf_remove() {
        let cmp = IntegerComparator;
        let mut data = [0u8; PAGE_SIZE];
        let mut leaf = LeafPage::new(&mut data);
        leaf.init(PageId::new(1), INVALID_PAGE_ID, 8);

        for k in [10u64, 20, 30] {
            leaf.insert(&key(k), rid(k as u32), &cmp);
        }

        assert_eq!(leaf.remove(&key(20), &cmp), 2);
        assert_eq!(leaf.key_at(0), key(10));
        assert_eq!(leaf.key_at(1), key(30));

        // Missing key leaves the page unchanged
        assert_eq!(leaf.remove(&key(99), &cmp), 2);
    }

    #[test]
    fn test_leaf_move_half_to() {
        let cmp = IntegerComparator;
        let mut left_data = [0u8; PAGE_SIZE];
        let mut right_data = [0u8; PAGE_SIZE];

        let mut left = LeafPage::new(&mut left_data);
        left.init(PageId::new(1), INVALID_PAGE_ID, 5);
        for k in 1..=5u64 {
            left.insert(&key(k), rid(k as u32), &cmp);
        }

        let mut right = LeafPage::new(&mut right_data);
        right.init(PageId::new(2), INVALID_PAGE_ID, 5);
        left.move_half_to(&mut right);

        assert_eq!(left.size(), 2);
        assert_eq!(right.size(), 3);
        assert_eq!(right.key_at(0), key(3));
        assert_eq!(right.value_at(2), rid(5));
    }

    #[test]
    fn test_leaf_move_all_to() {
        let cmp = IntegerComparator;
        let mut left_data = [0u8; PAGE_SIZE];
        let mut right_data = [0u8; PAGE_SIZE];

        let mut left = LeafPage::new(&mut left_data);
        left.init(PageId::new(1), INVALID_PAGE_ID, 8);
        for k in [1u64, 2] {
            left.insert(&key(k), rid(k as u32), &cmp);
        }

        let mut right = LeafPage::new(&mut right_data);
        right.init(PageId::new(2), INVALID_PAGE_ID, 8);
        for k in [3u64, 4] {
            right.insert(&key(k), rid(k as u32), &cmp);
        }

        right.move_all_to(&mut left);

        assert_eq!(right.size(), 0);
        assert_eq!(left.size(), 4);
        for (i, expected) in [1u64, 2, 3, 4].iter().enumerate() {
            assert_eq!(left.key_at(i), key(*expected));
        }
    }

    #[test]
    fn test_leaf_rotations() {
        let cmp = IntegerComparator;
        let mut left_data = [0u8; PAGE_SIZE];
        let mut right_data = [0u8; PAGE_SIZE];

        let mut left = LeafPage::new(&mut left_data);
        left.init(PageId::new(1), INVALID_PAGE_ID, 8);
        for k in [1u64, 2, 3] {
            left.insert(&key(k), rid(k as u32), &cmp);
        }

        let mut right = LeafPage::new(&mut right_data);
        right.init(PageId::new(2), INVALID_PAGE_ID, 8);
        for k in [10u64, 11] {
            right.insert(&key(k), rid(k as u32), &cmp);
        }

        // 3 rotates right
        left.move_last_to_front_of(&mut right);
        assert_eq!(left.size(), 2);
        assert_eq!(right.size(), 3);
        assert_eq!(right.key_at(0), key(3));

        // 3 rotates back left
        right.move_first_to_end_of(&mut left);
        assert_eq!(left.size(), 3);
        assert_eq!(left.key_at(2), key(3));
        assert_eq!(right.key_at(0), key(10));
    }

    #[test]
    fn test_internal_populate_and_lookup() {
        let cmp = IntegerComparator;
        let mut data = [0u8; PAGE_SIZE];
        let mut node = InternalPage::new(&mut data);
        node.init(PageId::new(1), INVALID_PAGE_ID, 8);

        node.populate_new_root(PageId::new(10), &key(50), PageId::new(11));
        assert_eq!(node.size(), 2);

        assert_eq!(node.lookup(&key(10), &cmp), PageId::new(10));
        assert_eq!(node.lookup(&key(49), &cmp), PageId::new(10));
        // Separator key routes right
        assert_eq!(node.lookup(&key(50), &cmp), PageId::new(11));
        assert_eq!(node.lookup(&key(99), &cmp), PageId::new(11));
    }

    #[test]
    fn test_internal_insert_after_and_routing() {
        let cmp = IntegerComparator;
        let mut data = [0u8; PAGE_SIZE];
        let mut node = InternalPage::new(&mut data);
        node.init(PageId::new(1), INVALID_PAGE_ID, 8);

        node.populate_new_root(PageId::new(10), &key(50), PageId::new(11));
        node.insert_after(PageId::new(11), &key(70), PageId::new(12))
            .unwrap();
        node.insert_after(PageId::new(10), &key(30), PageId::new(13))
            .unwrap();

        assert_eq!(node.size(), 4);
        // Children in key order: 10 | 30:13 | 50:11 | 70:12
        assert_eq!(node.value_at(0), PageId::new(10));
        assert_eq!(node.key_at(1), key(30));
        assert_eq!(node.value_at(1), PageId::new(13));
        assert_eq!(node.key_at(2), key(50));
        assert_eq!(node.key_at(3), key(70));

        assert_eq!(node.lookup(&key(35), &cmp), PageId::new(13));
        assert_eq!(node.lookup(&key(60), &cmp), PageId::new(11));
        assert_eq!(node.lookup(&key(80), &cmp), PageId::new(12));

        assert_eq!(node.value_index(PageId::new(12)), Some(3));
        assert_eq!(node.value_index(PageId::new(99)), None);
    }

    #[test]
    fn test_internal_insert_after_missing_child() {
        let mut data = [0u8; PAGE_SIZE];
        let mut node = InternalPage::new(&mut data);
        node.init(PageId::new(1), INVALID_PAGE_ID, 8);
        node.populate_new_root(PageId::new(10), &key(50), PageId::new(11));

        let result = node.insert_after(PageId::new(99), &key(70), PageId::new(12));
        assert!(matches!(result, Err(BrambleError::IndexCorrupted(_))));
    }

    #[test]
    fn test_internal_remove_and_only_child() {
        let mut data = [0u8; PAGE_SIZE];
        let mut node = InternalPage::new(&mut data);
        node.init(PageId::new(1), INVALID_PAGE_ID, 8);

        node.populate_new_root(PageId::new(10), &key(50), PageId::new(11));
        node.remove(1);
        assert_eq!(node.size(), 1);

        assert_eq!(node.remove_and_return_only_child(), PageId::new(10));
        assert_eq!(node.size(), 0);
    }

    #[test]
    fn test_capacity_constants_fit_page() {
        assert!(leaf_slot_offset(LEAF_SLOT_CAPACITY) <= PAGE_SIZE);
        assert!(internal_slot_offset(INTERNAL_SLOT_CAPACITY) <= PAGE_SIZE);
        assert!(leaf_slot_offset(LEAF_SLOT_CAPACITY + 1) > PAGE_SIZE);
        assert!(internal_slot_offset(INTERNAL_SLOT_CAPACITY + 1) > PAGE_SIZE);
    }
}
