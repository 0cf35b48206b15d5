pub mod error;
pub mod instance;
pub mod parallel;
pub mod replacer;

pub use error::BufferPoolError;
pub use instance::BufferPoolManager;
pub use parallel::ParallelBufferPoolManager;

use crate::common::types::{PageId, PagePtr};

/// The seam indexes consume: a page store that caches fixed-size disk pages.
/// Implemented by both the single-instance manager and the parallel manager.
pub trait BufferPool: Send + Sync {
    /// Fetch a page, reading it from disk on a miss. Fails with
    /// `PoolExhausted` when every frame is pinned.
    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError>;

    /// Allocate a fresh page id, zero the page and pin it
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError>;

    /// Drop one pin. `is_dirty` is a sticky OR: once a page is dirty within
    /// its residency, later unpins with `false` do not clear it.
    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError>;

    /// Write the resident page image to disk regardless of the dirty flag
    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError>;

    /// Flush every resident page
    fn flush_all_pages(&self) -> Result<(), BufferPoolError>;

    /// Drop an unpinned resident page from the pool. Deleting a page that
    /// is not resident succeeds trivially.
    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError>;
}
