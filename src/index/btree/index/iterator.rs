use std::sync::Arc;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::serialization::deserialize_leaf;
use crate::storage::buffer::BufferPool;
use super::base::BTreeIndex;

/// Ascending (key, record id) iteration across the leaf chain.
///
/// Each leaf is snapshotted while pinned and released before yielding, so
/// the iterator never holds pins between steps. It is restartable by
/// seeking again, finite, and not consistent against concurrent splits or
/// merges: callers coordinate externally or accept skipped/duplicated
/// records while the structure is changing.
pub struct TreeIterator<K> {
    buffer_pool: Arc<dyn BufferPool>,
    entries: std::vec::IntoIter<(K, Rid)>,
    next_page_id: PageId,
}

impl<K> TreeIterator<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    fn empty(buffer_pool: Arc<dyn BufferPool>) -> Self {
        Self {
            buffer_pool,
            entries: Vec::new().into_iter(),
            next_page_id: INVALID_PAGE_ID,
        }
    }

    fn load_leaf(&mut self, page_id: PageId) -> Result<(), BTreeError> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let leaf = deserialize_leaf::<K>(&page.read());
        self.buffer_pool.unpin_page(page_id, false)?;
        let leaf = leaf?;
        self.entries = leaf.entries.into_iter();
        self.next_page_id = leaf.next_page_id;
        Ok(())
    }
}

impl<K> Iterator for TreeIterator<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    type Item = (K, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.entries.next() {
                return Some(item);
            }
            if self.next_page_id == INVALID_PAGE_ID {
                return None;
            }
            let next = self.next_page_id;
            if let Err(e) = self.load_leaf(next) {
                warn!("tree iteration stopped at page {}: {}", next, e);
                return None;
            }
        }
    }
}

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Default + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Iterate every pair in ascending key order
    pub fn iter(&self) -> Result<TreeIterator<K>, BTreeError> {
        if self.is_empty() {
            return Ok(TreeIterator::empty(self.buffer_pool.clone()));
        }
        let mut iterator = TreeIterator::empty(self.buffer_pool.clone());
        iterator.load_leaf(self.find_leftmost_leaf()?)?;
        Ok(iterator)
    }

    /// Iterate pairs with keys >= `key` in ascending key order
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<K>, BTreeError> {
        if self.is_empty() {
            return Ok(TreeIterator::empty(self.buffer_pool.clone()));
        }
        let mut iterator = TreeIterator::empty(self.buffer_pool.clone());
        iterator.load_leaf(self.find_leaf_page(key)?)?;

        // discard the prefix below the seek key
        let remaining: Vec<(K, Rid)> = iterator
            .entries
            .by_ref()
            .skip_while(|(k, _)| k < key)
            .collect();
        iterator.entries = remaining.into_iter();
        Ok(iterator)
    }

    /// Record ids for every key in `[start_key, end_key]`
    pub fn range_scan(&self, start_key: &K, end_key: &K) -> Result<Vec<Rid>, BTreeError> {
        if start_key > end_key {
            return Ok(Vec::new());
        }
        Ok(self
            .iter_from(start_key)?
            .take_while(|(k, _)| k <= end_key)
            .map(|(_, rid)| rid)
            .collect())
    }
}
