use std::sync::Arc;
use std::thread;
use anyhow::Result;

use stratadb::common::types::Rid;
use stratadb::index::hash::bucket::{deserialize_bucket, BucketPage};
use stratadb::index::hash::directory::deserialize_directory;
use stratadb::storage::buffer::BufferPool;
use stratadb::ExtendibleHashTable;

mod common;
use common::{create_parallel_buffer_pool, create_test_buffer_pool};

#[test]
fn test_insert_and_get_value() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let table: ExtendibleHashTable<i64> =
        ExtendibleHashTable::new("test_index", buffer_pool.clone())?;

    for i in 0..10i64 {
        assert!(table.insert(&i, Rid::new(1, i as u32))?);
    }
    for i in 0..10i64 {
        assert_eq!(table.get_value(&i)?, vec![Rid::new(1, i as u32)]);
    }
    assert!(table.get_value(&99)?.is_empty());

    Ok(())
}

#[test]
fn test_duplicate_pairs_and_multi_values() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let table: ExtendibleHashTable<i64> =
        ExtendibleHashTable::new("dup_index", buffer_pool.clone())?;

    // same pair twice is rejected; same key with a new value is fine
    assert!(table.insert(&7, Rid::new(0, 7))?);
    assert!(!table.insert(&7, Rid::new(0, 7))?);
    assert!(table.insert(&7, Rid::new(0, 8))?);

    let mut values = table.get_value(&7)?;
    values.sort();
    assert_eq!(values, vec![Rid::new(0, 7), Rid::new(0, 8)]);

    Ok(())
}

#[test]
fn test_remove() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let table: ExtendibleHashTable<i64> =
        ExtendibleHashTable::new("rm_index", buffer_pool.clone())?;

    assert!(table.insert(&1, Rid::new(0, 1))?);
    assert!(table.remove(&1, Rid::new(0, 1))?);
    assert!(table.get_value(&1)?.is_empty());

    // removing an absent pair reports false
    assert!(!table.remove(&1, Rid::new(0, 1))?);
    assert!(!table.remove(&2, Rid::new(0, 2))?);

    Ok(())
}

#[test]
fn test_splits_grow_the_directory() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(200)?;
    // tiny buckets so splits happen early and often
    let table: ExtendibleHashTable<i64> = ExtendibleHashTable::with_bucket_capacity(
        "split_index",
        buffer_pool.clone(),
        4,
    )?;

    for i in 0..200i64 {
        assert!(table.insert(&i, Rid::new(2, i as u32))?);
    }

    assert!(table.global_depth()? > 1);
    table.verify_integrity()?;

    for i in 0..200i64 {
        assert_eq!(table.get_value(&i)?, vec![Rid::new(2, i as u32)]);
    }

    Ok(())
}

#[test]
fn test_split_doubles_directory_and_redistributes() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    // identity hash so routing is the key's own low bits
    let table: ExtendibleHashTable<i64> = ExtendibleHashTable::with_hasher(
        "even_index",
        buffer_pool.clone(),
        4,
        |key: &i64| *key as u32,
    )?;
    assert_eq!(table.global_depth()?, 1);

    // four even keys all route to slot 0 and fill its bucket
    for k in [0i64, 2, 4, 6] {
        assert!(table.insert(&k, Rid::new(0, k as u32))?);
    }

    // the fifth even key forces a split: local depth 1 -> 2, and the
    // directory doubles to four slots
    assert!(table.insert(&8, Rid::new(0, 8))?);
    assert_eq!(table.global_depth()?, 2);
    table.verify_integrity()?;

    let directory = {
        let page = buffer_pool.fetch_page(table.directory_page_id())?;
        let directory = deserialize_directory(&page.read())?;
        buffer_pool.unpin_page(table.directory_page_id(), false)?;
        directory
    };
    assert_eq!(directory.size(), 4);
    assert_eq!(directory.local_depth(0), 2);
    assert_eq!(directory.local_depth(2), 2);
    assert_ne!(directory.bucket_page_id(0), directory.bucket_page_id(2));
    // the untouched odd-side bucket keeps depth 1 behind both of its slots
    assert_eq!(directory.local_depth(1), 1);
    assert_eq!(directory.local_depth(3), 1);
    assert_eq!(directory.bucket_page_id(1), directory.bucket_page_id(3));

    let keys_in_slot = |dir_index: usize| -> Result<Vec<i64>> {
        let page_id = directory.bucket_page_id(dir_index);
        let page = buffer_pool.fetch_page(page_id)?;
        let bucket: BucketPage<i64> = deserialize_bucket(&page.read())?;
        buffer_pool.unpin_page(page_id, false)?;
        let mut keys: Vec<i64> = bucket.get_all_pairs().into_iter().map(|(k, _)| k).collect();
        keys.sort();
        Ok(keys)
    };

    // keys congruent to 0 mod 4 stay put, the rest move to the split image
    assert_eq!(keys_in_slot(0)?, vec![0, 4, 8]);
    assert_eq!(keys_in_slot(2)?, vec![2, 6]);
    assert!(keys_in_slot(1)?.is_empty());

    for k in [0i64, 2, 4, 6, 8] {
        assert_eq!(table.get_value(&k)?, vec![Rid::new(0, k as u32)]);
    }

    Ok(())
}

#[test]
fn test_removes_merge_and_shrink_the_directory() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(200)?;
    let table: ExtendibleHashTable<i64> = ExtendibleHashTable::with_bucket_capacity(
        "merge_index",
        buffer_pool.clone(),
        4,
    )?;

    for i in 0..200i64 {
        table.insert(&i, Rid::new(2, i as u32))?;
    }
    let grown_depth = table.global_depth()?;
    assert!(grown_depth > 1);

    for i in 0..200i64 {
        assert!(table.remove(&i, Rid::new(2, i as u32))?);
    }

    // empty buckets merged back and the directory collapsed
    assert!(table.global_depth()? < grown_depth);
    table.verify_integrity()?;

    for i in 0..200i64 {
        assert!(table.get_value(&i)?.is_empty());
    }

    Ok(())
}

#[test]
fn test_insert_remove_interleaved_keeps_invariants() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(200)?;
    let table: ExtendibleHashTable<i64> = ExtendibleHashTable::with_bucket_capacity(
        "churn_index",
        buffer_pool.clone(),
        4,
    )?;

    for i in 0..100i64 {
        table.insert(&i, Rid::new(0, i as u32))?;
    }
    for i in (0..100i64).step_by(2) {
        assert!(table.remove(&i, Rid::new(0, i as u32))?);
    }
    for i in 100..150i64 {
        table.insert(&i, Rid::new(0, i as u32))?;
    }

    table.verify_integrity()?;

    for i in 0..150i64 {
        let present = (i % 2 == 1 && i < 100) || i >= 100;
        assert_eq!(!table.get_value(&i)?.is_empty(), present, "key {}", i);
    }

    Ok(())
}

#[test]
fn test_works_over_parallel_buffer_pool() -> Result<()> {
    let (buffer_pool, _temp_file) = create_parallel_buffer_pool(4, 50)?;
    let table: ExtendibleHashTable<i64> = ExtendibleHashTable::with_bucket_capacity(
        "sharded_index",
        buffer_pool.clone(),
        8,
    )?;

    for i in 0..100i64 {
        assert!(table.insert(&i, Rid::new(1, i as u32))?);
    }
    table.verify_integrity()?;
    for i in 0..100i64 {
        assert_eq!(table.get_value(&i)?, vec![Rid::new(1, i as u32)]);
    }

    Ok(())
}

#[test]
fn test_concurrent_readers_and_writers() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(300)?;
    let table: Arc<ExtendibleHashTable<i64>> = Arc::new(ExtendibleHashTable::with_bucket_capacity(
        "mt_index",
        buffer_pool.clone(),
        8,
    )?);

    let mut handles = Vec::new();
    for t in 0..4i64 {
        let table = table.clone();
        handles.push(thread::spawn(move || {
            for i in 0..50i64 {
                let key = t * 1000 + i;
                table.insert(&key, Rid::new(t as i32, i as u32)).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    table.verify_integrity()?;
    for t in 0..4i64 {
        for i in 0..50i64 {
            let key = t * 1000 + i;
            assert_eq!(table.get_value(&key)?, vec![Rid::new(t as i32, i as u32)]);
        }
    }

    Ok(())
}
