use std::mem;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::common::types::{Page, Rid, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{InternalNode, LeafNode, TreeNode};

const LEAF_PAGE_TYPE: u8 = 1;
const INTERNAL_PAGE_TYPE: u8 = 2;

// Header layout:
// - page type tag: u8 (1 byte)
// - size: u16 (2 bytes)
// - max_size: u16 (2 bytes)
// - parent_page_id: i32 (4 bytes)
// - page_id: i32 (4 bytes)
// - next_page_id: i32 (4 bytes, leaves only)
// The entry array follows, bincode-encoded.
const INTERNAL_HEADER_SIZE: usize = 13;
const LEAF_HEADER_SIZE: usize = 17;

/// Serialize a leaf node into a page
pub fn serialize_leaf<K>(node: &LeafNode<K>, page: &mut Page) -> Result<(), BTreeError>
where
    K: Serialize,
{
    let body = bincode::serialize(&node.entries)
        .map_err(|e| BTreeError::SerializationError(e.to_string()))?;
    if LEAF_HEADER_SIZE + body.len() > PAGE_SIZE {
        return Err(BTreeError::NodeTooLarge);
    }

    page.data.fill(0);
    page.data[0] = LEAF_PAGE_TYPE;
    LittleEndian::write_u16(&mut page.data[1..3], node.entries.len() as u16);
    LittleEndian::write_u16(&mut page.data[3..5], node.max_size as u16);
    LittleEndian::write_i32(&mut page.data[5..9], node.parent_page_id);
    LittleEndian::write_i32(&mut page.data[9..13], node.page_id);
    LittleEndian::write_i32(&mut page.data[13..17], node.next_page_id);
    page.data[LEAF_HEADER_SIZE..LEAF_HEADER_SIZE + body.len()].copy_from_slice(&body);

    Ok(())
}

/// Serialize an internal node into a page
pub fn serialize_internal<K>(node: &InternalNode<K>, page: &mut Page) -> Result<(), BTreeError>
where
    K: Serialize,
{
    let body = bincode::serialize(&node.entries)
        .map_err(|e| BTreeError::SerializationError(e.to_string()))?;
    if INTERNAL_HEADER_SIZE + body.len() > PAGE_SIZE {
        return Err(BTreeError::NodeTooLarge);
    }

    page.data.fill(0);
    page.data[0] = INTERNAL_PAGE_TYPE;
    LittleEndian::write_u16(&mut page.data[1..3], node.entries.len() as u16);
    LittleEndian::write_u16(&mut page.data[3..5], node.max_size as u16);
    LittleEndian::write_i32(&mut page.data[5..9], node.parent_page_id);
    LittleEndian::write_i32(&mut page.data[9..13], node.page_id);
    page.data[INTERNAL_HEADER_SIZE..INTERNAL_HEADER_SIZE + body.len()].copy_from_slice(&body);

    Ok(())
}

pub fn serialize_node<K>(node: &TreeNode<K>, page: &mut Page) -> Result<(), BTreeError>
where
    K: Serialize,
{
    match node {
        TreeNode::Leaf(leaf) => serialize_leaf(leaf, page),
        TreeNode::Internal(internal) => serialize_internal(internal, page),
    }
}

/// Deserialize whichever node kind the page holds
pub fn deserialize_node<K>(page: &Page) -> Result<TreeNode<K>, BTreeError>
where
    K: for<'de> Deserialize<'de>,
{
    match page.data[0] {
        LEAF_PAGE_TYPE => Ok(TreeNode::Leaf(read_leaf(page)?)),
        INTERNAL_PAGE_TYPE => Ok(TreeNode::Internal(read_internal(page)?)),
        _ => Err(BTreeError::InvalidPageFormat),
    }
}

/// Deserialize a page known to hold a leaf
pub fn deserialize_leaf<K>(page: &Page) -> Result<LeafNode<K>, BTreeError>
where
    K: for<'de> Deserialize<'de>,
{
    if page.data[0] != LEAF_PAGE_TYPE {
        return Err(BTreeError::InvalidPageFormat);
    }
    read_leaf(page)
}

/// Deserialize a page known to hold an internal node
pub fn deserialize_internal<K>(page: &Page) -> Result<InternalNode<K>, BTreeError>
where
    K: for<'de> Deserialize<'de>,
{
    if page.data[0] != INTERNAL_PAGE_TYPE {
        return Err(BTreeError::InvalidPageFormat);
    }
    read_internal(page)
}

fn read_leaf<K>(page: &Page) -> Result<LeafNode<K>, BTreeError>
where
    K: for<'de> Deserialize<'de>,
{
    let size = LittleEndian::read_u16(&page.data[1..3]) as usize;
    let max_size = LittleEndian::read_u16(&page.data[3..5]) as usize;
    let parent_page_id = LittleEndian::read_i32(&page.data[5..9]);
    let page_id = LittleEndian::read_i32(&page.data[9..13]);
    let next_page_id = LittleEndian::read_i32(&page.data[13..17]);

    let entries: Vec<(K, Rid)> = bincode::deserialize(&page.data[LEAF_HEADER_SIZE..])
        .map_err(|e| BTreeError::DeserializationError(e.to_string()))?;
    debug_assert_eq!(entries.len(), size);

    Ok(LeafNode {
        page_id,
        parent_page_id,
        max_size,
        next_page_id,
        entries,
    })
}

fn read_internal<K>(page: &Page) -> Result<InternalNode<K>, BTreeError>
where
    K: for<'de> Deserialize<'de>,
{
    let size = LittleEndian::read_u16(&page.data[1..3]) as usize;
    let max_size = LittleEndian::read_u16(&page.data[3..5]) as usize;
    let parent_page_id = LittleEndian::read_i32(&page.data[5..9]);
    let page_id = LittleEndian::read_i32(&page.data[9..13]);

    let entries: Vec<(K, i32)> = bincode::deserialize(&page.data[INTERNAL_HEADER_SIZE..])
        .map_err(|e| BTreeError::DeserializationError(e.to_string()))?;
    debug_assert_eq!(entries.len(), size);

    Ok(InternalNode {
        page_id,
        parent_page_id,
        max_size,
        entries,
    })
}

/// How many leaf entries fit in one page for this key type. A rough
/// estimate based on in-memory sizes; serialization overhead is small and
/// the headroom constant absorbs it.
pub fn leaf_capacity<K>() -> usize {
    let entry_size = mem::size_of::<K>() + mem::size_of::<Rid>();
    ((PAGE_SIZE - 128) / entry_size).max(4)
}

/// How many internal slots fit in one page for this key type
pub fn internal_capacity<K>() -> usize {
    let entry_size = mem::size_of::<K>() + mem::size_of::<i32>();
    ((PAGE_SIZE - 128) / entry_size).max(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::INVALID_PAGE_ID;

    #[test]
    fn test_leaf_round_trip() {
        let mut node: LeafNode<i64> = LeafNode::new(11, 3, 64);
        node.next_page_id = 12;
        node.insert(5, Rid::new(1, 50));
        node.insert(9, Rid::new(1, 90));

        let mut page = Page::new(11);
        serialize_leaf(&node, &mut page).unwrap();

        let restored: LeafNode<i64> = deserialize_leaf(&page).unwrap();
        assert_eq!(restored.page_id, 11);
        assert_eq!(restored.parent_page_id, 3);
        assert_eq!(restored.max_size, 64);
        assert_eq!(restored.next_page_id, 12);
        assert_eq!(restored.entries, node.entries);
    }

    #[test]
    fn test_internal_round_trip() {
        let mut node: InternalNode<i64> = InternalNode::new(7, INVALID_PAGE_ID, 32);
        node.populate_new_root(1, 100, 2);

        let mut page = Page::new(7);
        serialize_internal(&node, &mut page).unwrap();

        let restored: InternalNode<i64> = deserialize_internal(&page).unwrap();
        assert_eq!(restored.page_id, 7);
        assert_eq!(restored.parent_page_id, INVALID_PAGE_ID);
        assert_eq!(restored.size(), 2);
        assert_eq!(restored.value_at(0), 1);
        assert_eq!(restored.value_at(1), 2);
    }

    #[test]
    fn test_tag_dispatch() {
        let mut leaf: LeafNode<i32> = LeafNode::new(1, INVALID_PAGE_ID, 8);
        leaf.insert(1, Rid::new(0, 1));
        let mut page = Page::new(1);
        serialize_leaf(&leaf, &mut page).unwrap();

        assert!(matches!(
            deserialize_node::<i32>(&page).unwrap(),
            TreeNode::Leaf(_)
        ));
        assert!(deserialize_internal::<i32>(&page).is_err());
    }

    #[test]
    fn test_string_keys_round_trip() {
        let mut node: LeafNode<String> = LeafNode::new(4, INVALID_PAGE_ID, 16);
        node.insert("banana".to_string(), Rid::new(2, 1));
        node.insert("apple".to_string(), Rid::new(2, 0));

        let mut page = Page::new(4);
        serialize_leaf(&node, &mut page).unwrap();
        let restored: LeafNode<String> = deserialize_leaf(&page).unwrap();
        assert_eq!(*restored.first_key(), "apple");
    }

    #[test]
    fn test_capacities_scale_with_key_size() {
        assert!(leaf_capacity::<i32>() >= leaf_capacity::<[u8; 64]>());
        assert!(internal_capacity::<i32>() >= 4);
    }
}
