pub mod btree;
pub mod btree_iterator;
pub mod btree_page;
pub mod header_page;
pub mod key_comparator;

pub use btree::BPlusTree;
pub use btree_iterator::BTreeIterator;
pub use btree_page::{
    BTreePageRef, InternalPage, InternalPageRef, LeafPage, LeafPageRef, PageType,
    INTERNAL_SLOT_CAPACITY, LEAF_SLOT_CAPACITY,
};
pub use header_page::{HeaderPage, HeaderPageRef};
pub use key_comparator::{
    BytewiseComparator, IndexKey, IntegerComparator, KeyComparator, KEY_SIZE,
};
