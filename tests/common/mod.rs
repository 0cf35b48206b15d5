use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use stratadb::storage::disk::DiskManager;
use stratadb::{BufferPoolManager, ParallelBufferPoolManager};

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk_manager = Arc::new(DiskManager::new(path)?);
    Ok((Arc::new(BufferPoolManager::new(pool_size, disk_manager)), file))
}

// Create a parallel buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_parallel_buffer_pool(
    num_instances: usize,
    pool_size: usize,
) -> Result<(Arc<ParallelBufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk_manager = Arc::new(DiskManager::new(path)?);
    Ok((
        Arc::new(ParallelBufferPoolManager::new(
            num_instances,
            pool_size,
            disk_manager,
        )),
        file,
    ))
}
