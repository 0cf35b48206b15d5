use log::debug;
use serde::{Deserialize, Serialize};

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{InternalNode, LeafNode};
use crate::index::btree::serialization::{serialize_internal, serialize_leaf};
use super::base::BTreeIndex;

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Default + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Insert a (key, record id) pair. Returns false for a duplicate key.
    pub fn insert(&self, key: K, value: Rid) -> Result<bool, BTreeError> {
        let _latch = self.tree_latch.lock();

        if self.is_empty() {
            self.start_new_tree(key, value)?;
            return Ok(true);
        }

        let leaf_page_id = self.find_leaf_page(&key)?;
        let mut leaf = self.read_leaf(leaf_page_id)?;

        if leaf.lookup(&key).is_some() {
            return Ok(false);
        }

        leaf.insert(key, value);
        if leaf.size() < self.leaf_max_size {
            self.write_leaf(&leaf)?;
            return Ok(true);
        }

        self.split_leaf(leaf)?;
        Ok(true)
    }

    /// Allocate a leaf root for the first entry
    fn start_new_tree(&self, key: K, value: Rid) -> Result<(), BTreeError> {
        let (page, page_id) = self.buffer_pool.new_page()?;

        let mut root = LeafNode::new(page_id, INVALID_PAGE_ID, self.leaf_max_size);
        root.insert(key, value);
        serialize_leaf(&root, &mut page.write())?;
        self.buffer_pool.unpin_page(page_id, true)?;

        self.set_root(page_id);
        self.update_root_page_id()?;
        debug!("btree {}: new root leaf {}", self.index_name, page_id);
        Ok(())
    }

    /// Split an overflowing leaf: the new right sibling takes the upper
    /// half and threads into the leaf chain, and its first key propagates
    /// into the parent as the separator.
    fn split_leaf(&self, mut leaf: LeafNode<K>) -> Result<(), BTreeError> {
        let (new_page, new_page_id) = self.buffer_pool.new_page()?;

        let mut new_leaf = LeafNode::new(new_page_id, leaf.parent_page_id, self.leaf_max_size);
        new_leaf.next_page_id = leaf.next_page_id;
        leaf.next_page_id = new_page_id;
        leaf.move_half_to(&mut new_leaf);
        let separator = new_leaf.first_key().clone();

        serialize_leaf(&new_leaf, &mut new_page.write())?;
        self.buffer_pool.unpin_page(new_page_id, true)?;
        self.write_leaf(&leaf)?;

        self.insert_into_parent(leaf.page_id, leaf.parent_page_id, separator, new_page_id)
    }

    /// Hook a freshly split-off sibling into the parent, growing a new
    /// root or splitting the parent in turn as needed
    fn insert_into_parent(
        &self,
        old_page_id: PageId,
        old_parent_page_id: PageId,
        separator: K,
        new_page_id: PageId,
    ) -> Result<(), BTreeError> {
        if old_page_id == self.root() {
            let (root_page, root_page_id) = self.buffer_pool.new_page()?;

            let mut new_root =
                InternalNode::new(root_page_id, INVALID_PAGE_ID, self.internal_max_size);
            new_root.populate_new_root(old_page_id, separator, new_page_id);
            serialize_internal(&new_root, &mut root_page.write())?;
            self.buffer_pool.unpin_page(root_page_id, true)?;

            self.set_root(root_page_id);
            self.update_root_page_id()?;
            self.set_parent(old_page_id, root_page_id)?;
            self.set_parent(new_page_id, root_page_id)?;
            debug!("btree {}: new internal root {}", self.index_name, root_page_id);
            return Ok(());
        }

        let mut parent = self.read_internal(old_parent_page_id)?;
        parent.insert(separator, new_page_id);
        if parent.size() < self.internal_max_size {
            self.write_internal(&parent)?;
            return Ok(());
        }

        // The parent overflowed too: split it and promote the mid key
        let (new_page, new_internal_id) = self.buffer_pool.new_page()?;
        let mut new_internal =
            InternalNode::new(new_internal_id, parent.parent_page_id, self.internal_max_size);
        let promoted = parent.move_half_to(&mut new_internal);

        serialize_internal(&new_internal, &mut new_page.write())?;
        self.buffer_pool.unpin_page(new_internal_id, true)?;
        self.write_internal(&parent)?;

        // Children handed to the new sibling record their new parent
        for child in new_internal.children_ids() {
            self.set_parent(child, new_internal_id)?;
        }

        self.insert_into_parent(
            parent.page_id,
            parent.parent_page_id,
            promoted,
            new_internal_id,
        )
    }
}
