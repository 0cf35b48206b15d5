use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LRUReplacer;
use crate::storage::buffer::BufferPool;
use crate::storage::disk::DiskManager;

/// Per-frame metadata. The page bytes live behind the frame's own RW latch
/// (`PagePtr`); everything here is guarded by the pool mutex.
struct Frame {
    page: PagePtr,
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl Frame {
    fn new() -> Self {
        Self {
            page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

struct PoolInner {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    reverse_table: HashMap<FrameId, PageId>,
    free_list: VecDeque<FrameId>,
    replacer: LRUReplacer,
    next_page_id: PageId,
}

/// One buffer pool instance: a fixed set of frames caching disk pages, with
/// pin counting, LRU victim selection and dirty write-back on eviction.
///
/// Every public operation runs under a single per-instance mutex; the only
/// blocking I/O under that mutex is the eviction write-back and the miss
/// read, which are the intended blocking points.
pub struct BufferPoolManager {
    pool_size: usize,
    num_instances: u32,
    instance_index: u32,
    inner: Mutex<PoolInner>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    /// Create a standalone instance (shard 0 of 1)
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::with_shard(pool_size, 1, 0, disk_manager)
    }

    /// Create one shard of a parallel buffer pool. Page ids allocated by
    /// this instance are congruent to `instance_index` mod `num_instances`.
    pub fn with_shard(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        assert!(num_instances > 0, "buffer pool needs at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index must be less than the number of instances"
        );

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            frames.push(Frame::new());
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            num_instances,
            instance_index,
            inner: Mutex::new(PoolInner {
                frames,
                page_table: HashMap::new(),
                reverse_table: HashMap::new(),
                free_list,
                replacer: LRUReplacer::new(pool_size),
                next_page_id: instance_index as PageId,
            }),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Mint a fresh page id on this shard's arithmetic progression.
    /// `HEADER_PAGE_ID` is reserved for the index header map and skipped.
    fn allocate_page(&self, inner: &mut PoolInner) -> PageId {
        let mut page_id = inner.next_page_id;
        inner.next_page_id += self.num_instances as PageId;
        if page_id == HEADER_PAGE_ID {
            page_id = inner.next_page_id;
            inner.next_page_id += self.num_instances as PageId;
        }
        debug_assert_eq!(
            page_id % self.num_instances as PageId,
            self.instance_index as PageId,
            "allocated page ids must mod back to this instance"
        );
        page_id
    }

    /// Obtain a usable frame: free list first, then an LRU victim. A dirty
    /// victim is written back before its frame is recycled. Returns `None`
    /// when every frame is pinned.
    fn find_frame(&self, inner: &mut PoolInner) -> Result<Option<FrameId>, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(Some(frame_id));
        }

        let victim_id = match inner.replacer.victim() {
            Some(id) => id,
            None => return Ok(None),
        };

        let old_page_id = inner.frames[victim_id].page_id;
        if old_page_id != INVALID_PAGE_ID {
            if inner.frames[victim_id].is_dirty {
                debug!("evicting dirty page {} from frame {}", old_page_id, victim_id);
                let page_guard = inner.frames[victim_id].page.read();
                self.disk_manager.write_page(&page_guard)?;
            }
            inner.page_table.remove(&old_page_id);
            inner.reverse_table.remove(&victim_id);
        }
        inner.frames[victim_id].page_id = INVALID_PAGE_ID;
        inner.frames[victim_id].is_dirty = false;

        Ok(Some(victim_id))
    }

    fn fetch_page_impl(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            inner.frames[frame_id].pin_count += 1;
            inner.replacer.pin(frame_id);
            return Ok(inner.frames[frame_id].page.clone());
        }

        let frame_id = match self.find_frame(&mut inner)? {
            Some(id) => id,
            None => return Err(BufferPoolError::PoolExhausted),
        };

        {
            let mut page_guard = inner.frames[frame_id].page.write();
            self.disk_manager.read_page(page_id, &mut page_guard)?;
        }

        let frame = &mut inner.frames[frame_id];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        let page = frame.page.clone();

        inner.page_table.insert(page_id, frame_id);
        inner.reverse_table.insert(frame_id, page_id);
        inner.replacer.pin(frame_id);

        Ok(page)
    }

    fn new_page_impl(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match self.find_frame(&mut inner)? {
            Some(id) => id,
            None => return Err(BufferPoolError::PoolExhausted),
        };

        let page_id = self.allocate_page(&mut inner);

        {
            let mut page_guard = inner.frames[frame_id].page.write();
            page_guard.data.fill(0);
            page_guard.page_id = page_id;
        }

        let frame = &mut inner.frames[frame_id];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        let page = frame.page.clone();

        inner.page_table.insert(page_id, frame_id);
        inner.reverse_table.insert(frame_id, page_id);
        inner.replacer.pin(frame_id);

        // Write the zeroed page through so the id is materialized on disk
        {
            let page_guard = page.read();
            self.disk_manager.write_page(&page_guard)?;
        }

        Ok((page, page_id))
    }

    fn unpin_page_impl(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotResident(page_id)),
        };

        let frame = &mut inner.frames[frame_id];
        if is_dirty {
            frame.is_dirty = true;
        }
        if frame.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }
        frame.pin_count -= 1;
        if frame.pin_count == 0 {
            inner.replacer.unpin(frame_id);
        }

        Ok(())
    }

    fn flush_page_impl(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotResident(page_id)),
        };

        {
            let page_guard = inner.frames[frame_id].page.read();
            self.disk_manager.write_page(&page_guard)?;
        }
        inner.frames[frame_id].is_dirty = false;

        Ok(())
    }

    fn flush_all_pages_impl(&self) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_ids: Vec<FrameId> = inner.page_table.values().copied().collect();
        for frame_id in frame_ids {
            {
                let page_guard = inner.frames[frame_id].page.read();
                self.disk_manager.write_page(&page_guard)?;
            }
            inner.frames[frame_id].is_dirty = false;
        }

        Ok(())
    }

    fn delete_page_impl(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Ok(()), // not resident: nothing to do
        };

        if inner.frames[frame_id].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        if inner.frames[frame_id].is_dirty {
            let page_guard = inner.frames[frame_id].page.read();
            self.disk_manager.write_page(&page_guard)?;
        }

        inner.page_table.remove(&page_id);
        inner.reverse_table.remove(&frame_id);
        inner.replacer.pin(frame_id);

        let frame = &mut inner.frames[frame_id];
        frame.page_id = INVALID_PAGE_ID;
        frame.pin_count = 0;
        frame.is_dirty = false;
        frame.page.write().reset();

        inner.free_list.push_back(frame_id);

        Ok(())
    }
}

impl BufferPool for BufferPoolManager {
    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        self.fetch_page_impl(page_id)
    }

    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        self.new_page_impl()
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        self.unpin_page_impl(page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.flush_page_impl(page_id)
    }

    fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        self.flush_all_pages_impl()
    }

    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.delete_page_impl(page_id)
    }
}
