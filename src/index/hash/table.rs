use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::common::types::{PageId, Rid};
use crate::index::hash::bucket::{
    default_bucket_capacity, deserialize_bucket, serialize_bucket, BucketPage,
};
use crate::index::hash::directory::{
    deserialize_directory, serialize_directory, DirectoryPage,
};
use crate::index::hash::error::HashTableError;
use crate::storage::buffer::BufferPool;

/// Extendible hash table laid out in buffer-pool pages: one directory page
/// plus one page per bucket.
///
/// The table latch serializes structural changes (directory growth and
/// bucket splits/merges) against each other; lookups take it shared. Point
/// access to bucket bytes additionally goes through each page's own RW
/// latch inside the buffer pool.
pub struct ExtendibleHashTable<K> {
    name: String,
    buffer_pool: Arc<dyn BufferPool>,
    directory_page_id: PageId,
    bucket_capacity: usize,
    hash_fn: fn(&K) -> u32,
    table_latch: RwLock<()>,
    _phantom: PhantomData<K>,
}

impl<K> ExtendibleHashTable<K>
where
    K: Clone + Eq + Hash + Default + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Create a table whose bucket capacity is sized to the page
    pub fn new(
        name: impl Into<String>,
        buffer_pool: Arc<dyn BufferPool>,
    ) -> Result<Self, HashTableError> {
        Self::with_bucket_capacity(name, buffer_pool, default_bucket_capacity::<K>())
    }

    /// Create a table with an explicit bucket capacity
    pub fn with_bucket_capacity(
        name: impl Into<String>,
        buffer_pool: Arc<dyn BufferPool>,
        bucket_capacity: usize,
    ) -> Result<Self, HashTableError> {
        Self::with_hasher(name, buffer_pool, bucket_capacity, Self::default_hash)
    }

    /// Create a table with an explicit bucket capacity and hash function
    pub fn with_hasher(
        name: impl Into<String>,
        buffer_pool: Arc<dyn BufferPool>,
        bucket_capacity: usize,
        hash_fn: fn(&K) -> u32,
    ) -> Result<Self, HashTableError> {
        let (directory_page, directory_page_id) = buffer_pool.new_page()?;

        // Start with a depth-1 directory over two empty buckets
        let mut directory = DirectoryPage::new();
        directory.incr_global_depth();
        for index in 0..2 {
            let (bucket_page, bucket_page_id) = buffer_pool.new_page()?;
            let bucket: BucketPage<K> = BucketPage::new(bucket_capacity, 1);
            serialize_bucket(&bucket, &mut bucket_page.write())?;
            buffer_pool.unpin_page(bucket_page_id, true)?;
            directory.set_bucket_page_id(index, bucket_page_id);
            directory.set_local_depth(index, 1);
        }

        serialize_directory(&directory, &mut directory_page.write())?;
        buffer_pool.unpin_page(directory_page_id, true)?;

        Ok(Self {
            name: name.into(),
            buffer_pool,
            directory_page_id,
            bucket_capacity,
            hash_fn,
            table_latch: RwLock::new(()),
            _phantom: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Page id of the directory page
    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    /// Default key hashing: std's fixed-key SipHash, deterministic across
    /// runs
    fn default_hash(key: &K) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }

    fn directory_index(&self, directory: &DirectoryPage, key: &K) -> usize {
        ((self.hash_fn)(key) & directory.global_depth_mask()) as usize
    }

    fn load_directory(&self) -> Result<DirectoryPage, HashTableError> {
        let page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let directory = deserialize_directory(&page.read());
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        directory
    }

    /// Collect every value stored under `key`
    pub fn get_value(&self, key: &K) -> Result<Vec<Rid>, HashTableError> {
        let _guard = self.table_latch.read();

        let directory = self.load_directory()?;
        let bucket_page_id =
            directory.bucket_page_id(self.directory_index(&directory, key));

        let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
        let result = {
            let page_guard = bucket_page.read();
            deserialize_bucket::<K>(&page_guard).map(|bucket| bucket.get_value(key))
        };
        self.buffer_pool.unpin_page(bucket_page_id, false)?;

        result
    }

    /// Insert a (key, value) pair, splitting the target bucket as many
    /// times as needed. Returns false if the exact pair is already present.
    pub fn insert(&self, key: &K, value: Rid) -> Result<bool, HashTableError> {
        let _guard = self.table_latch.write();

        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let mut directory = deserialize_directory(&directory_page.read())?;
        let mut directory_dirty = false;

        let inserted = loop {
            let dir_index = self.directory_index(&directory, key);
            let bucket_page_id = directory.bucket_page_id(dir_index);

            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let mut bucket = deserialize_bucket::<K>(&bucket_page.read())?;

            if bucket.contains(key, value) {
                self.buffer_pool.unpin_page(bucket_page_id, false)?;
                break false;
            }

            if bucket.has_free_slot() {
                bucket.insert(key.clone(), value);
                serialize_bucket(&bucket, &mut bucket_page.write())?;
                self.buffer_pool.unpin_page(bucket_page_id, true)?;
                break true;
            }

            // Bucket has no free slot: split it and retry the insert
            // against the updated directory.
            self.split_bucket(&mut directory, dir_index, bucket_page_id, &mut bucket)?;
            serialize_bucket(&bucket, &mut bucket_page.write())?;
            self.buffer_pool.unpin_page(bucket_page_id, true)?;
            directory_dirty = true;
        };

        if directory_dirty {
            serialize_directory(&directory, &mut directory_page.write())?;
        }
        self.buffer_pool
            .unpin_page(self.directory_page_id, directory_dirty)?;

        Ok(inserted)
    }

    /// Split the bucket at `dir_index`, doubling the directory when its
    /// local depth catches up with the global depth. The caller writes the
    /// old bucket and the directory back.
    fn split_bucket(
        &self,
        directory: &mut DirectoryPage,
        dir_index: usize,
        bucket_page_id: PageId,
        bucket: &mut BucketPage<K>,
    ) -> Result<(), HashTableError> {
        let depth = directory.local_depth(dir_index);

        let (new_page, new_page_id) = self.buffer_pool.new_page()?;
        let mut new_bucket: BucketPage<K> = BucketPage::new(self.bucket_capacity, depth + 1);
        bucket.set_local_depth(depth + 1);

        if depth + 1 > directory.global_depth() {
            directory.incr_global_depth();
        }

        // Slots that routed to the old bucket and have bit `depth` set now
        // route to the new bucket; both halves record the deeper depth.
        for index in 0..directory.size() {
            if directory.bucket_page_id(index) == bucket_page_id {
                directory.set_local_depth(index, depth + 1);
                if (index >> depth) & 1 == 1 {
                    directory.set_bucket_page_id(index, new_page_id);
                }
            }
        }

        let pairs = bucket.get_all_pairs();
        bucket.clear();
        for (pair_key, pair_value) in pairs {
            if ((self.hash_fn)(&pair_key) >> depth) & 1 == 1 {
                new_bucket.insert(pair_key, pair_value);
            } else {
                bucket.insert(pair_key, pair_value);
            }
        }

        serialize_bucket(&new_bucket, &mut new_page.write())?;
        self.buffer_pool.unpin_page(new_page_id, true)?;

        debug!(
            "hash table {}: split bucket {} into {} at depth {}",
            self.name,
            bucket_page_id,
            new_page_id,
            depth + 1
        );

        Ok(())
    }

    /// Remove a (key, value) pair. An emptied bucket merges with its split
    /// image when both sit at the same local depth, and merging cascades
    /// while it keeps producing empty buckets; the directory halves while
    /// every local depth is below the global depth.
    pub fn remove(&self, key: &K, value: Rid) -> Result<bool, HashTableError> {
        let _guard = self.table_latch.write();

        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let mut directory = deserialize_directory(&directory_page.read())?;

        let dir_index = self.directory_index(&directory, key);
        let bucket_page_id = directory.bucket_page_id(dir_index);

        let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
        let mut bucket = deserialize_bucket::<K>(&bucket_page.read())?;

        if !bucket.remove(key, value) {
            self.buffer_pool.unpin_page(bucket_page_id, false)?;
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            return Ok(false);
        }
        serialize_bucket(&bucket, &mut bucket_page.write())?;
        self.buffer_pool.unpin_page(bucket_page_id, true)?;

        let directory_dirty = self.merge_empty_buckets(&mut directory, key)?;

        if directory_dirty {
            serialize_directory(&directory, &mut directory_page.write())?;
        }
        self.buffer_pool
            .unpin_page(self.directory_page_id, directory_dirty)?;

        Ok(true)
    }

    /// Merge the bucket the key routes to with its split image for as long
    /// as it is empty and a merge is legal. Returns whether the directory
    /// changed.
    fn merge_empty_buckets(
        &self,
        directory: &mut DirectoryPage,
        key: &K,
    ) -> Result<bool, HashTableError> {
        let mut directory_dirty = false;

        loop {
            let dir_index = self.directory_index(directory, key);
            let bucket_page_id = directory.bucket_page_id(dir_index);
            let depth = directory.local_depth(dir_index);

            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let empty = {
                let page_guard = bucket_page.read();
                deserialize_bucket::<K>(&page_guard)?.is_empty()
            };
            self.buffer_pool.unpin_page(bucket_page_id, false)?;

            if !empty || depth == 0 {
                break;
            }

            let buddy_index = directory.buddy_index(dir_index);
            let buddy_page_id = directory.bucket_page_id(buddy_index);
            if directory.local_depth(buddy_index) != depth || buddy_page_id == bucket_page_id {
                break;
            }

            // Redirect every slot of the emptied bucket at its buddy and
            // pull both back one level.
            for index in 0..directory.size() {
                if directory.bucket_page_id(index) == bucket_page_id {
                    directory.set_bucket_page_id(index, buddy_page_id);
                }
            }
            for index in 0..directory.size() {
                if directory.bucket_page_id(index) == buddy_page_id {
                    directory.set_local_depth(index, depth - 1);
                }
            }

            let buddy_page = self.buffer_pool.fetch_page(buddy_page_id)?;
            let mut buddy = deserialize_bucket::<K>(&buddy_page.read())?;
            buddy.set_local_depth(depth - 1);
            serialize_bucket(&buddy, &mut buddy_page.write())?;
            self.buffer_pool.unpin_page(buddy_page_id, true)?;

            self.buffer_pool.delete_page(bucket_page_id)?;

            while directory.can_shrink() {
                directory.decr_global_depth();
            }
            directory_dirty = true;

            debug!(
                "hash table {}: merged bucket {} into {} at depth {}",
                self.name,
                bucket_page_id,
                buddy_page_id,
                depth - 1
            );
        }

        Ok(directory_dirty)
    }

    /// Current global depth of the directory
    pub fn global_depth(&self) -> Result<u32, HashTableError> {
        let _guard = self.table_latch.read();
        Ok(self.load_directory()?.global_depth())
    }

    /// Walk the directory and every bucket, asserting the structural
    /// invariants. Intended for tests.
    pub fn verify_integrity(&self) -> Result<(), HashTableError> {
        let _guard = self.table_latch.read();

        let directory = self.load_directory()?;
        directory.verify_integrity();

        for index in 0..directory.size() {
            let bucket_page_id = directory.bucket_page_id(index);
            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let bucket = deserialize_bucket::<K>(&bucket_page.read())?;
            self.buffer_pool.unpin_page(bucket_page_id, false)?;
            assert_eq!(
                bucket.local_depth(),
                directory.local_depth(index),
                "bucket {} disagrees with directory slot {} on local depth",
                bucket_page_id,
                index
            );
        }

        Ok(())
    }
}
