use log::debug;
use serde::{Deserialize, Serialize};

use crate::common::types::{PageId, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{InternalNode, LeafNode, TreeNode};
use super::base::BTreeIndex;

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Default + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Remove `key` and its value. Removing an absent key is a no-op.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let _latch = self.tree_latch.lock();

        if self.is_empty() {
            return Ok(());
        }

        let leaf_page_id = self.find_leaf_page(key)?;
        let mut leaf = self.read_leaf(leaf_page_id)?;
        if leaf.lookup(key).is_none() {
            return Ok(());
        }

        let deleted_first = leaf.first_key() == key;
        let old_first = leaf.first_key().clone();
        leaf.remove_and_delete_record(key);

        if leaf.page_id == self.root() {
            self.write_leaf(&leaf)?;
            if leaf.size() == 0 {
                self.adjust_root(leaf.page_id)?;
            }
            return Ok(());
        }

        if leaf.size() >= leaf.min_size() {
            self.write_leaf(&leaf)?;
            // The deleted key may survive as an ancestor routing key
            if deleted_first && leaf.size() > 0 {
                let new_first = leaf.first_key().clone();
                self.fix_ancestor_keys(&old_first, &new_first, leaf.parent_page_id)?;
            }
            return Ok(());
        }

        self.write_leaf(&leaf)?;
        self.coalesce_or_redistribute(leaf_page_id, &old_first)
    }

    /// Rebalance an underfull node: borrow one entry from a sibling that
    /// can spare it, otherwise merge with a sibling. `search_key` is a key
    /// that routed into this node's subtree before the deletion; the
    /// parent locates the node's slot with it.
    fn coalesce_or_redistribute(&self, page_id: PageId, search_key: &K) -> Result<(), BTreeError> {
        if page_id == self.root() {
            return self.adjust_root(page_id);
        }

        let node = self.read_node(page_id)?;
        let parent = self.read_internal(node.parent_page_id())?;
        let (left_page_id, right_page_id, index) = parent.find_siblings(search_key);

        match node {
            TreeNode::Leaf(leaf) => {
                if left_page_id != INVALID_PAGE_ID {
                    let left = self.read_leaf(left_page_id)?;
                    if left.size() > left.min_size() {
                        return self.redistribute_leaf(left, leaf, parent, false, index, search_key);
                    }
                    if right_page_id != INVALID_PAGE_ID {
                        let right = self.read_leaf(right_page_id)?;
                        if right.size() > right.min_size() {
                            return self
                                .redistribute_leaf(right, leaf, parent, true, index, search_key);
                        }
                    }
                    self.coalesce_leaf(left, leaf, parent, false, index, search_key)
                } else {
                    let right = self.read_leaf(right_page_id)?;
                    if right.size() > right.min_size() {
                        return self.redistribute_leaf(right, leaf, parent, true, index, search_key);
                    }
                    self.coalesce_leaf(right, leaf, parent, true, index, search_key)
                }
            }
            TreeNode::Internal(internal) => {
                if left_page_id != INVALID_PAGE_ID {
                    let left = self.read_internal(left_page_id)?;
                    if left.size() > left.min_size() {
                        return self.redistribute_internal(left, internal, parent, false, index);
                    }
                    if right_page_id != INVALID_PAGE_ID {
                        let right = self.read_internal(right_page_id)?;
                        if right.size() > right.min_size() {
                            return self.redistribute_internal(right, internal, parent, true, index);
                        }
                    }
                    self.coalesce_internal(left, internal, parent, false, index)
                } else {
                    let right = self.read_internal(right_page_id)?;
                    if right.size() > right.min_size() {
                        return self.redistribute_internal(right, internal, parent, true, index);
                    }
                    self.coalesce_internal(right, internal, parent, true, index)
                }
            }
        }
    }

    /// Borrow one pair from a leaf sibling and fix the separators
    fn redistribute_leaf(
        &self,
        mut neighbor: LeafNode<K>,
        mut node: LeafNode<K>,
        mut parent: InternalNode<K>,
        from_right: bool,
        index: usize,
        search_key: &K,
    ) -> Result<(), BTreeError> {
        if from_right {
            neighbor.move_first_to_end_of(&mut node);
            parent.set_key_at(index + 1, neighbor.first_key().clone());
        } else {
            neighbor.move_last_to_front_of(&mut node);
        }

        let new_first = node.first_key().clone();
        if index >= 1 {
            parent.set_key_at(index, new_first.clone());
        }

        self.write_leaf(&neighbor)?;
        self.write_leaf(&node)?;
        self.write_internal(&parent)?;

        // A leftmost child's minimum is routed by an ancestor, not by its
        // own parent slot
        if index == 0 {
            self.fix_ancestor_keys(search_key, &new_first, parent.parent_page_id)?;
        }
        Ok(())
    }

    /// Merge an underfull leaf into a sibling, drop its parent slot and
    /// rebalance the parent in turn
    fn coalesce_leaf(
        &self,
        mut neighbor: LeafNode<K>,
        mut node: LeafNode<K>,
        parent: InternalNode<K>,
        into_right: bool,
        index: usize,
        search_key: &K,
    ) -> Result<(), BTreeError> {
        let node_page_id = node.page_id;

        if into_right {
            node.move_all_to(&mut neighbor, true);
            // the leaf to the node's left now precedes the neighbor
            if index > 0 {
                let left_page_id = parent.value_at(index - 1);
                let mut left = self.read_leaf(left_page_id)?;
                left.next_page_id = neighbor.page_id;
                self.write_leaf(&left)?;
            }
        } else {
            node.move_all_to(&mut neighbor, false);
            neighbor.next_page_id = node.next_page_id;
        }

        self.write_leaf(&neighbor)?;
        self.buffer_pool.delete_page(node_page_id)?;
        debug!(
            "btree {}: coalesced leaf {} into {}",
            self.index_name, node_page_id, neighbor.page_id
        );

        if into_right && index == 0 && neighbor.size() > 0 {
            let new_first = neighbor.first_key().clone();
            self.fix_ancestor_keys(search_key, &new_first, parent.parent_page_id)?;
        }

        self.remove_parent(parent, index)
    }

    /// Rotate one slot between internal siblings through the parent
    /// separator, reparenting the child that moved
    fn redistribute_internal(
        &self,
        mut neighbor: InternalNode<K>,
        mut node: InternalNode<K>,
        mut parent: InternalNode<K>,
        from_right: bool,
        index: usize,
    ) -> Result<(), BTreeError> {
        if from_right {
            let separator_index = index + 1;
            let separator = parent.key_at(separator_index).clone();
            let neighbor_key = neighbor.key_at(1).clone();
            let moved_child = neighbor.value_at(0);

            neighbor.move_first_to_end_of(&mut node);
            let last = node.size() - 1;
            node.set_key_at(last, separator);
            parent.set_key_at(separator_index, neighbor_key);
            self.set_parent(moved_child, node.page_id)?;
        } else {
            let separator = parent.key_at(index).clone();
            let neighbor_key = neighbor.key_at(neighbor.size() - 1).clone();
            let moved_child = neighbor.value_at(neighbor.size() - 1);

            neighbor.move_last_to_front_of(&mut node);
            node.set_key_at(1, separator);
            parent.set_key_at(index, neighbor_key);
            self.set_parent(moved_child, node.page_id)?;
        }

        self.write_internal(&neighbor)?;
        self.write_internal(&node)?;
        self.write_internal(&parent)
    }

    /// Merge an underfull internal node into a sibling, pulling the parent
    /// separator down, and rebalance the parent in turn
    fn coalesce_internal(
        &self,
        mut neighbor: InternalNode<K>,
        mut node: InternalNode<K>,
        mut parent: InternalNode<K>,
        into_right: bool,
        index: usize,
    ) -> Result<(), BTreeError> {
        let node_page_id = node.page_id;

        // every child the node gives away gets reparented
        for child in node.children_ids() {
            self.set_parent(child, neighbor.page_id)?;
        }

        let separator_index = if into_right { index + 1 } else { index };
        let separator = parent.key_at(separator_index).clone();
        node.move_all_to(&mut neighbor, separator, into_right);
        if into_right {
            parent.set_value_at(index, neighbor.page_id);
        }

        self.write_internal(&neighbor)?;
        self.buffer_pool.delete_page(node_page_id)?;
        debug!(
            "btree {}: coalesced internal {} into {}",
            self.index_name, node_page_id, neighbor.page_id
        );

        self.remove_parent(parent, separator_index)
    }

    /// Delete the separator slot left behind by a coalesce and rebalance
    /// the parent if that drives it underfull
    fn remove_parent(&self, mut parent: InternalNode<K>, index: usize) -> Result<(), BTreeError> {
        // any key inside the parent's subtree still locates its slot in the
        // grandparent after the removal
        let search_key = parent.key_at(1).clone();
        parent.remove_at(index);
        self.write_internal(&parent)?;

        if parent.page_id == self.root() {
            if parent.size() == 1 {
                return self.adjust_root(parent.page_id);
            }
            return Ok(());
        }
        if parent.size() >= parent.min_size() {
            return Ok(());
        }
        self.coalesce_or_redistribute(parent.page_id, &search_key)
    }

    /// Shrink the root: an empty leaf root empties the tree, an internal
    /// root with a single child hands the root to that child
    fn adjust_root(&self, root_page_id: PageId) -> Result<(), BTreeError> {
        match self.read_node(root_page_id)? {
            TreeNode::Leaf(leaf) => {
                if leaf.size() == 0 {
                    self.buffer_pool.delete_page(root_page_id)?;
                    self.set_root(INVALID_PAGE_ID);
                    self.update_root_page_id()?;
                    debug!("btree {}: tree is now empty", self.index_name);
                }
            }
            TreeNode::Internal(internal) => {
                if internal.size() == 1 {
                    let child = internal.value_at(0);
                    self.buffer_pool.delete_page(root_page_id)?;
                    self.set_root(child);
                    self.update_root_page_id()?;
                    self.set_parent(child, INVALID_PAGE_ID)?;
                    debug!("btree {}: root collapsed into {}", self.index_name, child);
                }
            }
        }
        Ok(())
    }

    /// Rewrite the one ancestor routing key equal to `old_key` after a
    /// subtree minimum changed. While the key routes through slot 0 the
    /// ancestor does not store it, so the walk climbs; the first ancestor
    /// that routes it through a real slot holds the only copy.
    fn fix_ancestor_keys(
        &self,
        old_key: &K,
        new_key: &K,
        mut page_id: PageId,
    ) -> Result<(), BTreeError> {
        while page_id != INVALID_PAGE_ID {
            let mut node = self.read_internal(page_id)?;
            let index = node.lookup_key(old_key);
            if index == 0 {
                page_id = node.parent_page_id;
                continue;
            }
            if node.key_at(index) == old_key {
                node.set_key_at(index, new_key.clone());
                self.write_internal(&node)?;
            }
            break;
        }
        Ok(())
    }
}
