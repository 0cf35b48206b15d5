use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, INVALID_PAGE_ID};
use crate::index::hash::error::HashTableError;

/// Upper bound on the directory's global depth; 2^9 slots of
/// (local depth, page id) fit comfortably in one 4KB page.
pub const MAX_GLOBAL_DEPTH: u32 = 9;

const DIRECTORY_ARRAY_SIZE: usize = 1 << MAX_GLOBAL_DEPTH;

// Header layout:
// - global_depth: u32 (4 bytes)
// The local depth byte array and the page id array follow, bincode-encoded.
const HEADER_SIZE: usize = 4;

/// The extendible hash directory: an array of 2^global_depth slots, each
/// holding a bucket page id and that bucket's local depth.
#[derive(Debug, Clone)]
pub struct DirectoryPage {
    global_depth: u32,
    local_depths: Vec<u8>,
    bucket_page_ids: Vec<PageId>,
}

impl Default for DirectoryPage {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryPage {
    pub fn new() -> Self {
        Self {
            global_depth: 0,
            local_depths: vec![0; DIRECTORY_ARRAY_SIZE],
            bucket_page_ids: vec![INVALID_PAGE_ID; DIRECTORY_ARRAY_SIZE],
        }
    }

    pub fn global_depth(&self) -> u32 {
        self.global_depth
    }

    /// Mask selecting the low `global_depth` bits of a hash
    pub fn global_depth_mask(&self) -> u32 {
        (1 << self.global_depth) - 1
    }

    /// Number of live directory slots
    pub fn size(&self) -> usize {
        1 << self.global_depth
    }

    pub fn bucket_page_id(&self, index: usize) -> PageId {
        self.bucket_page_ids[index]
    }

    pub fn set_bucket_page_id(&mut self, index: usize, page_id: PageId) {
        self.bucket_page_ids[index] = page_id;
    }

    pub fn local_depth(&self, index: usize) -> u32 {
        self.local_depths[index] as u32
    }

    pub fn set_local_depth(&mut self, index: usize, local_depth: u32) {
        self.local_depths[index] = local_depth as u8;
    }

    /// Index of the slot's split image: the entry differing in bit
    /// `local_depth - 1`
    pub fn buddy_index(&self, index: usize) -> usize {
        index ^ (1 << (self.local_depth(index) - 1))
    }

    /// Double the directory: the upper half mirrors the lower half
    pub fn incr_global_depth(&mut self) {
        assert!(
            self.global_depth < MAX_GLOBAL_DEPTH,
            "directory cannot grow past MAX_GLOBAL_DEPTH"
        );
        let old_size = self.size();
        for i in 0..old_size {
            self.bucket_page_ids[old_size + i] = self.bucket_page_ids[i];
            self.local_depths[old_size + i] = self.local_depths[i];
        }
        self.global_depth += 1;
    }

    /// Halve the directory. Only legal when `can_shrink` holds, in which
    /// case the upper half is a mirror of the lower half.
    pub fn decr_global_depth(&mut self) {
        assert!(self.global_depth > 0, "directory cannot shrink below one slot");
        self.global_depth -= 1;
    }

    /// The directory may halve when every live slot's local depth is
    /// strictly below the global depth
    pub fn can_shrink(&self) -> bool {
        self.global_depth > 0
            && (0..self.size()).all(|i| self.local_depth(i) < self.global_depth)
    }

    /// Check the directory's structural invariants: local depths never
    /// exceed the global depth, and all slots agreeing in their low
    /// `local_depth` bits point at the same bucket.
    pub fn verify_integrity(&self) {
        for i in 0..self.size() {
            assert!(
                self.local_depth(i) <= self.global_depth,
                "slot {} has local depth {} above global depth {}",
                i,
                self.local_depth(i),
                self.global_depth
            );
            let mask = (1usize << self.local_depth(i)) - 1;
            for j in 0..self.size() {
                if i & mask == j & mask {
                    assert_eq!(
                        self.bucket_page_id(i),
                        self.bucket_page_id(j),
                        "slots {} and {} agree in {} low bits but point at different buckets",
                        i,
                        j,
                        self.local_depth(i)
                    );
                    assert_eq!(
                        self.local_depth(i),
                        self.local_depth(j),
                        "slots {} and {} share a bucket but disagree on local depth",
                        i,
                        j
                    );
                }
            }
        }
    }
}

/// Serialize the directory into a page
pub fn serialize_directory(dir: &DirectoryPage, page: &mut Page) -> Result<(), HashTableError> {
    let body = bincode::serialize(&(&dir.local_depths, &dir.bucket_page_ids))
        .map_err(|e| HashTableError::SerializationError(e.to_string()))?;
    if HEADER_SIZE + body.len() > page.data.len() {
        return Err(HashTableError::PageOverflow);
    }

    page.data.fill(0);
    LittleEndian::write_u32(&mut page.data[0..4], dir.global_depth);
    page.data[HEADER_SIZE..HEADER_SIZE + body.len()].copy_from_slice(&body);

    Ok(())
}

/// Deserialize the directory from a page
pub fn deserialize_directory(page: &Page) -> Result<DirectoryPage, HashTableError> {
    let global_depth = LittleEndian::read_u32(&page.data[0..4]);
    let (local_depths, bucket_page_ids): (Vec<u8>, Vec<PageId>) =
        bincode::deserialize(&page.data[HEADER_SIZE..])
            .map_err(|e| HashTableError::DeserializationError(e.to_string()))?;

    Ok(DirectoryPage {
        global_depth,
        local_depths,
        bucket_page_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grow_mirrors_lower_half() {
        let mut dir = DirectoryPage::new();
        dir.set_bucket_page_id(0, 10);
        dir.set_local_depth(0, 0);

        dir.incr_global_depth();
        assert_eq!(dir.size(), 2);
        assert_eq!(dir.bucket_page_id(1), 10);
        assert_eq!(dir.local_depth(1), 0);
    }

    #[test]
    fn test_can_shrink() {
        let mut dir = DirectoryPage::new();
        dir.set_bucket_page_id(0, 10);
        dir.incr_global_depth();
        dir.set_local_depth(0, 1);
        dir.set_local_depth(1, 1);
        dir.set_bucket_page_id(1, 11);
        assert!(!dir.can_shrink());

        dir.set_local_depth(0, 0);
        dir.set_local_depth(1, 0);
        dir.set_bucket_page_id(1, 10);
        assert!(dir.can_shrink());
        dir.decr_global_depth();
        assert_eq!(dir.size(), 1);
    }

    #[test]
    fn test_buddy_index() {
        let mut dir = DirectoryPage::new();
        dir.incr_global_depth();
        dir.incr_global_depth();
        dir.set_local_depth(1, 2);
        assert_eq!(dir.buddy_index(1), 3);
        dir.set_local_depth(2, 1);
        assert_eq!(dir.buddy_index(2), 3);
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut dir = DirectoryPage::new();
        dir.set_bucket_page_id(0, 7);
        dir.incr_global_depth();
        dir.set_local_depth(0, 1);
        dir.set_local_depth(1, 1);
        dir.set_bucket_page_id(1, 8);

        let mut page = Page::new(2);
        serialize_directory(&dir, &mut page).unwrap();
        let restored = deserialize_directory(&page).unwrap();

        assert_eq!(restored.global_depth(), 1);
        assert_eq!(restored.bucket_page_id(0), 7);
        assert_eq!(restored.bucket_page_id(1), 8);
        restored.verify_integrity();
    }
}
