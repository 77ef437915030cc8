use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{BrambleError, PageId, RecordId, Result, INVALID_PAGE_ID};

use super::btree_page::LeafPageRef;
use super::key_comparator::IndexKey;

/// Forward iterator over the leaf chain.
///
/// The current leaf stays pinned and read-latched while the iterator sits
/// on it. Stepping past the last slot releases the leaf first and only then
/// latches the right sibling, so the iterator never holds two leaf latches
/// at once. The past-the-end sentinel carries an invalid page id.
pub struct BTreeIterator {
    bpm: Arc<BufferPoolManager>,
    guard: Option<ReadPageGuard>,
    current_page_id: PageId,
    current_index: usize,
}

impl BTreeIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, guard: ReadPageGuard, index: usize) -> Self {
        let current_page_id = guard.page_id();
        Self {
            bpm,
            guard: Some(guard),
            current_page_id,
            current_index: index,
        }
    }

    pub(crate) fn end_sentinel(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            guard: None,
            current_page_id: INVALID_PAGE_ID,
            current_index: 0,
        }
    }

    /// True once iteration has moved past the rightmost leaf.
    pub fn is_end(&self) -> bool {
        self.current_page_id == INVALID_PAGE_ID
    }

    pub fn next_entry(&mut self) -> Result<Option<(IndexKey, RecordId)>> {
        loop {
            let next_id = match self.guard.as_ref() {
                None => return Ok(None),
                Some(guard) => {
                    let leaf = LeafPageRef::new(guard.data());
                    if self.current_index < leaf.size() {
                        let item = (
                            leaf.key_at(self.current_index),
                            leaf.value_at(self.current_index),
                        );
                        self.current_index += 1;
                        return Ok(Some(item));
                    }
                    leaf.next_page_id()
                }
            };

            // Release the current leaf before latching its sibling
            self.guard = None;
            self.current_index = 0;

            if next_id == INVALID_PAGE_ID {
                self.current_page_id = INVALID_PAGE_ID;
                return Ok(None);
            }

            let guard = self
                .bpm
                .checked_read_page(next_id)?
                .ok_or(BrambleError::PageNotFound(next_id))?;
            self.current_page_id = next_id;
            self.guard = Some(guard);
        }
    }
}

impl Iterator for BTreeIterator {
    type Item = Result<(IndexKey, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
