use std::mem;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::common::types::{Page, Rid, PAGE_SIZE};
use crate::index::hash::error::HashTableError;

// Header layout:
// - local_depth: u32 (4 bytes)
// - capacity: u16 (2 bytes)
// The bitmaps and the slot array follow, bincode-encoded.
const HEADER_SIZE: usize = 6;

/// A hash bucket page: a fixed-capacity slot array with two bitmaps.
///
/// `occupied[i]` means slot i has ever held data; `readable[i]` means slot i
/// currently holds a live pair. Removal only clears the readable bit
/// (tombstone); `clear` during a split rebuilds both bitmaps.
#[derive(Debug, Clone)]
pub struct BucketPage<K> {
    local_depth: u32,
    capacity: usize,
    occupied: Vec<u8>,
    readable: Vec<u8>,
    slots: Vec<(K, Rid)>,
}

impl<K> BucketPage<K>
where
    K: Clone + Eq + Default,
{
    pub fn new(capacity: usize, local_depth: u32) -> Self {
        let bitmap_len = capacity.div_ceil(8);
        Self {
            local_depth,
            capacity,
            occupied: vec![0; bitmap_len],
            readable: vec![0; bitmap_len],
            slots: vec![(K::default(), Rid::default()); capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn local_depth(&self) -> u32 {
        self.local_depth
    }

    pub fn set_local_depth(&mut self, local_depth: u32) {
        self.local_depth = local_depth;
    }

    pub fn is_occupied(&self, slot: usize) -> bool {
        self.occupied[slot / 8] & (1 << (slot % 8)) != 0
    }

    pub fn is_readable(&self, slot: usize) -> bool {
        self.readable[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn set_occupied(&mut self, slot: usize) {
        self.occupied[slot / 8] |= 1 << (slot % 8);
    }

    fn set_readable(&mut self, slot: usize) {
        self.readable[slot / 8] |= 1 << (slot % 8);
    }

    fn clear_readable(&mut self, slot: usize) {
        self.readable[slot / 8] &= !(1 << (slot % 8));
    }

    /// Collect every value stored under `key`
    pub fn get_value(&self, key: &K) -> Vec<Rid> {
        let mut result = Vec::new();
        for slot in 0..self.capacity {
            if self.is_readable(slot) && self.slots[slot].0 == *key {
                result.push(self.slots[slot].1);
            }
        }
        result
    }

    /// Whether the exact (key, value) pair is present
    pub fn contains(&self, key: &K, value: Rid) -> bool {
        (0..self.capacity).any(|slot| {
            self.is_readable(slot) && self.slots[slot].0 == *key && self.slots[slot].1 == value
        })
    }

    /// Whether any never-used slot remains for an insert
    pub fn has_free_slot(&self) -> bool {
        (0..self.capacity).any(|slot| !self.is_occupied(slot))
    }

    /// Insert into the first never-used slot. Returns false for a duplicate
    /// pair or when no free slot remains. Tombstoned slots are not reused;
    /// splits reclaim them via `clear`.
    pub fn insert(&mut self, key: K, value: Rid) -> bool {
        if self.contains(&key, value) {
            return false;
        }
        for slot in 0..self.capacity {
            if !self.is_occupied(slot) {
                self.slots[slot] = (key, value);
                self.set_occupied(slot);
                self.set_readable(slot);
                return true;
            }
        }
        false
    }

    /// Clear the readable bit of the first slot holding (key, value),
    /// leaving the occupied bit set
    pub fn remove(&mut self, key: &K, value: Rid) -> bool {
        for slot in 0..self.capacity {
            if self.is_readable(slot) && self.slots[slot].0 == *key && self.slots[slot].1 == value {
                self.clear_readable(slot);
                return true;
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        (0..self.capacity).all(|slot| !self.is_readable(slot))
    }

    pub fn is_full(&self) -> bool {
        (0..self.capacity).all(|slot| self.is_readable(slot))
    }

    pub fn num_readable(&self) -> usize {
        (0..self.capacity).filter(|&slot| self.is_readable(slot)).count()
    }

    /// Snapshot of every live pair, in slot order
    pub fn get_all_pairs(&self) -> Vec<(K, Rid)> {
        (0..self.capacity)
            .filter(|&slot| self.is_readable(slot))
            .map(|slot| self.slots[slot].clone())
            .collect()
    }

    /// Zero both bitmaps; slot contents become dead
    pub fn clear(&mut self) {
        self.occupied.fill(0);
        self.readable.fill(0);
    }
}

/// Serialize a bucket into a page
pub fn serialize_bucket<K>(bucket: &BucketPage<K>, page: &mut Page) -> Result<(), HashTableError>
where
    K: Serialize,
{
    let body = bincode::serialize(&(&bucket.occupied, &bucket.readable, &bucket.slots))
        .map_err(|e| HashTableError::SerializationError(e.to_string()))?;
    if HEADER_SIZE + body.len() > PAGE_SIZE {
        return Err(HashTableError::PageOverflow);
    }

    page.data.fill(0);
    LittleEndian::write_u32(&mut page.data[0..4], bucket.local_depth);
    LittleEndian::write_u16(&mut page.data[4..6], bucket.capacity as u16);
    page.data[HEADER_SIZE..HEADER_SIZE + body.len()].copy_from_slice(&body);

    Ok(())
}

/// Deserialize a bucket from a page
pub fn deserialize_bucket<K>(page: &Page) -> Result<BucketPage<K>, HashTableError>
where
    K: for<'de> Deserialize<'de>,
{
    let local_depth = LittleEndian::read_u32(&page.data[0..4]);
    let capacity = LittleEndian::read_u16(&page.data[4..6]) as usize;

    let (occupied, readable, slots): (Vec<u8>, Vec<u8>, Vec<(K, Rid)>) =
        bincode::deserialize(&page.data[HEADER_SIZE..])
            .map_err(|e| HashTableError::DeserializationError(e.to_string()))?;

    Ok(BucketPage {
        local_depth,
        capacity,
        occupied,
        readable,
        slots,
    })
}

/// How many (key, value) slots fit in one bucket page for this key type.
/// A rough estimate in the same spirit as the tree's order calculation.
pub fn default_bucket_capacity<K>() -> usize {
    let slot_size = mem::size_of::<K>() + mem::size_of::<Rid>() + 2;
    ((PAGE_SIZE - 64) / slot_size).max(4)
}
