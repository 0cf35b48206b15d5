use std::marker::PhantomData;
use std::sync::Arc;
use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::common::types::{PageId, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::header::HeaderPage;
use crate::index::btree::node::{InternalNode, LeafNode, TreeNode};
use crate::index::btree::serialization::{
    deserialize_internal, deserialize_leaf, deserialize_node, internal_capacity, leaf_capacity,
    serialize_internal, serialize_leaf, serialize_node,
};
use crate::storage::buffer::BufferPool;

/// Persistent B+Tree index over buffer-pool pages.
///
/// Internal pages route by separator keys; leaves hold (key, record id)
/// pairs and chain to their right siblings. Keys are unique. Structural
/// operations are serialized by the tree latch; point reads descend
/// without it and are not consistent against a concurrent split or merge.
pub struct BTreeIndex<K> {
    pub(crate) index_name: String,
    pub(crate) buffer_pool: Arc<dyn BufferPool>,
    pub(crate) root_page_id: Mutex<PageId>,
    pub(crate) tree_latch: Mutex<()>,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
    pub(crate) _phantom: PhantomData<K>,
}

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Default + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Open or create the named index with page-sized node limits
    pub fn new(
        name: impl Into<String>,
        buffer_pool: Arc<dyn BufferPool>,
    ) -> Result<Self, BTreeError> {
        let leaf_max = leaf_capacity::<K>();
        let internal_max = internal_capacity::<K>();
        Self::with_max_sizes(name, buffer_pool, leaf_max, internal_max)
    }

    /// Open or create the named index with explicit node size limits
    pub fn with_max_sizes(
        name: impl Into<String>,
        buffer_pool: Arc<dyn BufferPool>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        let index_name = name.into();

        // The header page knows this index's root if it already exists
        let header_page = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::load(&header_page.read())?;
        let root_page_id = match header.get_root_id(&index_name) {
            Some(root) => {
                buffer_pool.unpin_page(HEADER_PAGE_ID, false)?;
                root
            }
            None => {
                header.set_root_id(&index_name, INVALID_PAGE_ID);
                header.store(&mut header_page.write())?;
                buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
                INVALID_PAGE_ID
            }
        };

        Ok(Self {
            index_name,
            buffer_pool,
            root_page_id: Mutex::new(root_page_id),
            tree_latch: Mutex::new(()),
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.index_name
    }

    pub fn is_empty(&self) -> bool {
        self.root() == INVALID_PAGE_ID
    }

    pub(crate) fn root(&self) -> PageId {
        *self.root_page_id.lock()
    }

    pub(crate) fn set_root(&self, page_id: PageId) {
        *self.root_page_id.lock() = page_id;
    }

    /// Rewrite this index's record in the header page; called on every
    /// root change
    pub(crate) fn update_root_page_id(&self) -> Result<(), BTreeError> {
        let header_page = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::load(&header_page.read())?;
        header.set_root_id(&self.index_name, self.root());
        header.store(&mut header_page.write())?;
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
        Ok(())
    }

    pub(crate) fn read_node(&self, page_id: PageId) -> Result<TreeNode<K>, BTreeError> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let node = deserialize_node(&page.read());
        self.buffer_pool.unpin_page(page_id, false)?;
        node
    }

    pub(crate) fn read_leaf(&self, page_id: PageId) -> Result<LeafNode<K>, BTreeError> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let node = deserialize_leaf(&page.read());
        self.buffer_pool.unpin_page(page_id, false)?;
        node
    }

    pub(crate) fn read_internal(&self, page_id: PageId) -> Result<InternalNode<K>, BTreeError> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let node = deserialize_internal(&page.read());
        self.buffer_pool.unpin_page(page_id, false)?;
        node
    }

    pub(crate) fn write_leaf(&self, node: &LeafNode<K>) -> Result<(), BTreeError> {
        let page = self.buffer_pool.fetch_page(node.page_id)?;
        serialize_leaf(node, &mut page.write())?;
        self.buffer_pool.unpin_page(node.page_id, true)?;
        Ok(())
    }

    pub(crate) fn write_internal(&self, node: &InternalNode<K>) -> Result<(), BTreeError> {
        let page = self.buffer_pool.fetch_page(node.page_id)?;
        serialize_internal(node, &mut page.write())?;
        self.buffer_pool.unpin_page(node.page_id, true)?;
        Ok(())
    }

    /// Rewrite a child's parent pointer, whatever kind of node it is
    pub(crate) fn set_parent(&self, page_id: PageId, parent_page_id: PageId) -> Result<(), BTreeError> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let mut node: TreeNode<K> = deserialize_node(&page.read())?;
        node.set_parent_page_id(parent_page_id);
        serialize_node(&node, &mut page.write())?;
        self.buffer_pool.unpin_page(page_id, true)?;
        Ok(())
    }

    /// Descend from the root to the leaf that routes `key`
    pub(crate) fn find_leaf_page(&self, key: &K) -> Result<PageId, BTreeError> {
        let mut current = self.root();
        loop {
            match self.read_node(current)? {
                TreeNode::Leaf(_) => return Ok(current),
                TreeNode::Internal(node) => current = node.lookup(key),
            }
        }
    }

    /// Descend along slot-0 children to the leftmost leaf
    pub(crate) fn find_leftmost_leaf(&self) -> Result<PageId, BTreeError> {
        let mut current = self.root();
        loop {
            match self.read_node(current)? {
                TreeNode::Leaf(_) => return Ok(current),
                TreeNode::Internal(node) => current = node.value_at(0),
            }
        }
    }

    /// Collect the values stored under `key` (at most one: keys are unique)
    pub fn get_value(&self, key: &K) -> Result<Vec<Rid>, BTreeError> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let leaf = self.read_leaf(self.find_leaf_page(key)?)?;
        Ok(leaf.lookup(key).into_iter().collect())
    }
}
