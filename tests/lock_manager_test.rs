use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use stratadb::common::types::Rid;
use stratadb::{IsolationLevel, LockManager, Transaction, TransactionManager, TransactionState};

fn txn(id: u32, level: IsolationLevel) -> Arc<Transaction> {
    Arc::new(Transaction::new(id, level))
}

// long enough for a spawned thread to reach its blocking wait
const SETTLE: Duration = Duration::from_millis(100);

#[test]
fn test_shared_shared_compatibility() {
    let lm = LockManager::new();
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);
    let rid = Rid::new(0, 0);

    assert!(lm.lock_shared(&t1, rid));
    assert!(lm.lock_shared(&t2, rid));
    assert_eq!(t1.state(), TransactionState::Growing);
    assert_eq!(t2.state(), TransactionState::Growing);
}

#[test]
fn test_exclusive_blocks_shared_until_unlock() {
    let lm = Arc::new(LockManager::new());
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);
    let rid = Rid::new(0, 1);

    assert!(lm.lock_exclusive(&t1, rid));

    let acquired = Arc::new(AtomicBool::new(false));
    let handle = {
        let lm = lm.clone();
        let t2 = t2.clone();
        let acquired = acquired.clone();
        thread::spawn(move || {
            let granted = lm.lock_shared(&t2, rid);
            acquired.store(true, Ordering::SeqCst);
            granted
        })
    };

    thread::sleep(SETTLE);
    assert!(!acquired.load(Ordering::SeqCst), "reader must wait for the writer");

    assert!(lm.unlock(&t1, rid));
    assert!(handle.join().unwrap());
    assert!(t2.is_shared_locked(rid));
}

#[test]
fn test_exclusive_blocks_exclusive_until_unlock() {
    let lm = Arc::new(LockManager::new());
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);
    let rid = Rid::new(0, 2);

    assert!(lm.lock_exclusive(&t1, rid));

    let acquired = Arc::new(AtomicBool::new(false));
    let handle = {
        let lm = lm.clone();
        let t2 = t2.clone();
        let acquired = acquired.clone();
        thread::spawn(move || {
            let granted = lm.lock_exclusive(&t2, rid);
            acquired.store(true, Ordering::SeqCst);
            granted
        })
    };

    thread::sleep(SETTLE);
    assert!(!acquired.load(Ordering::SeqCst));

    assert!(lm.unlock(&t1, rid));
    assert!(handle.join().unwrap());
    assert!(t2.is_exclusive_locked(rid));
}

#[test]
fn test_two_phase_locking_after_unlock() {
    let lm = LockManager::new();
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let rid = Rid::new(0, 3);
    let other = Rid::new(0, 4);

    assert!(lm.lock_shared(&t1, rid));
    assert!(lm.unlock(&t1, rid));
    assert_eq!(t1.state(), TransactionState::Shrinking);

    // any lock request while shrinking aborts the transaction
    assert!(!lm.lock_shared(&t1, other));
    assert_eq!(t1.state(), TransactionState::Aborted);
}

#[test]
fn test_read_committed_shared_unlock_keeps_growing() {
    // releasing a shared lock under READ_COMMITTED stays GROWING, so a
    // later exclusive lock still succeeds
    let lm = LockManager::new();
    let t1 = txn(1, IsolationLevel::ReadCommitted);
    let rid = Rid::new(0, 5);

    assert!(lm.lock_shared(&t1, rid));
    assert_eq!(t1.state(), TransactionState::Growing);
    assert!(lm.unlock(&t1, rid));
    assert_eq!(t1.state(), TransactionState::Growing);
    assert!(lm.lock_exclusive(&t1, rid));

    // under REPEATABLE_READ the same unlock transitions to SHRINKING
    let t2 = txn(2, IsolationLevel::RepeatableRead);
    let rid2 = Rid::new(0, 6);
    assert!(lm.lock_shared(&t2, rid2));
    assert!(lm.unlock(&t2, rid2));
    assert_eq!(t2.state(), TransactionState::Shrinking);
    assert!(!lm.lock_exclusive(&t2, rid2));
    assert_eq!(t2.state(), TransactionState::Aborted);
}

#[test]
fn test_read_uncommitted_rejects_shared_allows_exclusive() {
    let lm = LockManager::new();
    let t1 = txn(1, IsolationLevel::ReadUncommitted);
    let rid = Rid::new(0, 7);

    assert!(!lm.lock_shared(&t1, rid));
    assert_eq!(t1.state(), TransactionState::Aborted);

    let t2 = txn(2, IsolationLevel::ReadUncommitted);
    assert!(lm.lock_exclusive(&t2, rid));
}

#[test]
fn test_upgrade_waits_for_other_readers() {
    let lm = Arc::new(LockManager::new());
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);
    let rid = Rid::new(0, 8);

    assert!(lm.lock_shared(&t1, rid));
    assert!(lm.lock_shared(&t2, rid));

    let upgraded = Arc::new(AtomicBool::new(false));
    let handle = {
        let lm = lm.clone();
        let t1 = t1.clone();
        let upgraded = upgraded.clone();
        thread::spawn(move || {
            let granted = lm.lock_upgrade(&t1, rid);
            upgraded.store(true, Ordering::SeqCst);
            granted
        })
    };

    thread::sleep(SETTLE);
    assert!(!upgraded.load(Ordering::SeqCst), "upgrade waits for the other reader");

    assert!(lm.unlock(&t2, rid));
    assert!(handle.join().unwrap());
    assert!(t1.is_exclusive_locked(rid));
    assert!(!t1.is_shared_locked(rid));
}

#[test]
fn test_second_concurrent_upgrader_aborts() {
    let lm = Arc::new(LockManager::new());
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);
    let rid = Rid::new(0, 9);

    assert!(lm.lock_shared(&t1, rid));
    assert!(lm.lock_shared(&t2, rid));

    // t1's upgrade blocks behind t2's shared grant
    let handle = {
        let lm = lm.clone();
        let t1 = t1.clone();
        thread::spawn(move || lm.lock_upgrade(&t1, rid))
    };
    thread::sleep(SETTLE);

    // a second upgrade on the same queue aborts immediately
    assert!(!lm.lock_upgrade(&t2, rid));
    assert_eq!(t2.state(), TransactionState::Aborted);

    // t2's cleanup unlock lets the first upgrader through
    assert!(lm.unlock(&t2, rid));
    assert!(handle.join().unwrap());
    assert!(t1.is_exclusive_locked(rid));
}

#[test]
fn test_wound_wait_older_aborts_younger_holder() {
    // an older transaction requesting a lock a younger one holds wounds
    // the holder, then acquires once the victim's locks are cleaned up
    let lm = Arc::new(LockManager::new());
    let t_old = txn(10, IsolationLevel::RepeatableRead);
    let t_young = txn(20, IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lm.lock_exclusive(&t_young, rid));

    let handle = {
        let lm = lm.clone();
        let t_old = t_old.clone();
        thread::spawn(move || lm.lock_shared(&t_old, rid))
    };

    thread::sleep(SETTLE);
    assert_eq!(t_young.state(), TransactionState::Aborted, "younger holder is wounded");

    // the wounded transaction releases its locks as cleanup
    assert!(lm.unlock(&t_young, rid));
    assert!(handle.join().unwrap());
    assert!(t_old.is_shared_locked(rid));
    assert_eq!(t_old.state(), TransactionState::Growing);
}

#[test]
fn test_wound_wait_full_scenario() {
    // T1 (id 10) holds X; T2 (id 20) waits; T3 (id 5) arrives, wounds T1
    // and is granted ahead of the younger T2
    let lm = Arc::new(LockManager::new());
    let t1 = txn(10, IsolationLevel::RepeatableRead);
    let t2 = txn(20, IsolationLevel::RepeatableRead);
    let t3 = txn(5, IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 1);

    assert!(lm.lock_exclusive(&t1, rid));

    let t2_done = Arc::new(AtomicBool::new(false));
    let t2_handle = {
        let lm = lm.clone();
        let t2 = t2.clone();
        let t2_done = t2_done.clone();
        thread::spawn(move || {
            let granted = lm.lock_exclusive(&t2, rid);
            t2_done.store(true, Ordering::SeqCst);
            granted
        })
    };
    thread::sleep(SETTLE);

    let t3_done = Arc::new(AtomicBool::new(false));
    let t3_handle = {
        let lm = lm.clone();
        let t3 = t3.clone();
        let t3_done = t3_done.clone();
        thread::spawn(move || {
            let granted = lm.lock_exclusive(&t3, rid);
            t3_done.store(true, Ordering::SeqCst);
            granted
        })
    };
    thread::sleep(SETTLE);

    // T1 was wounded by the older T3; T2 is untouched and still waiting
    assert_eq!(t1.state(), TransactionState::Aborted);
    assert_eq!(t2.state(), TransactionState::Growing);
    assert!(!t2_done.load(Ordering::SeqCst));
    assert!(!t3_done.load(Ordering::SeqCst));

    // T1 unlocks as cleanup; the oldest waiter T3 is granted, not T2
    assert!(lm.unlock(&t1, rid));
    thread::sleep(SETTLE);
    assert!(t3_done.load(Ordering::SeqCst), "oldest waiter is granted first");
    assert!(!t2_done.load(Ordering::SeqCst), "younger waiter keeps waiting");
    assert_eq!(t3.state(), TransactionState::Growing);
    assert!(t3.is_exclusive_locked(rid));

    // drain the queue so every thread finishes
    assert!(lm.unlock(&t3, rid));
    assert!(t3_handle.join().unwrap());
    assert!(t2_handle.join().unwrap());
}

#[test]
fn test_transaction_manager_commit_releases_for_waiters() {
    let lm = Arc::new(LockManager::new());
    let tm = Arc::new(TransactionManager::new(lm.clone()));
    let rid = Rid::new(2, 0);

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    assert!(lm.lock_exclusive(&t1, rid));

    let handle = {
        let lm = lm.clone();
        let tm = tm.clone();
        thread::spawn(move || {
            let t2 = tm.begin(IsolationLevel::RepeatableRead);
            let granted = lm.lock_shared(&t2, rid);
            (granted, t2.state())
        })
    };

    thread::sleep(SETTLE);
    tm.commit(&t1).unwrap();

    let (granted, state) = handle.join().unwrap();
    assert!(granted);
    assert_eq!(state, TransactionState::Growing);
    assert_eq!(t1.state(), TransactionState::Committed);
}
