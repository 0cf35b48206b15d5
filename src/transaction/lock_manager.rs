use std::collections::HashMap;
use std::sync::Arc;
use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::transaction::{IsolationLevel, Transaction, TransactionState};

/// Record lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
    txn: Arc<Transaction>,
}

struct LockQueue {
    requests: Vec<LockRequest>,
    upgrading: Option<TxnId>,
    cv: Arc<Condvar>,
}

impl LockQueue {
    fn new() -> Self {
        Self {
            requests: Vec::new(),
            upgrading: None,
            cv: Arc::new(Condvar::new()),
        }
    }
}

/// Waiters queue behind the granted requests in transaction-age order
/// (oldest first), so an old transaction that wounds its way to a lock is
/// also first in line for it.
fn insert_position(requests: &[LockRequest], txn_id: TxnId) -> usize {
    requests
        .iter()
        .position(|r| !r.granted && r.txn_id > txn_id)
        .unwrap_or(requests.len())
}

/// A shared request is granted once everything ahead of it is a granted
/// shared request (shared grants batch behind each other)
fn shared_grantable(requests: &[LockRequest], index: usize) -> bool {
    requests[..index]
        .iter()
        .all(|r| r.granted && r.mode == LockMode::Shared)
}

/// An exclusive request is granted once it heads the queue and no other
/// request holds the lock (an upgrader's shared peers may sit behind it)
fn exclusive_grantable(requests: &[LockRequest], index: usize) -> bool {
    index == 0 && requests.iter().skip(1).all(|r| !r.granted)
}

/// Two-phase record lock manager with wound-wait deadlock prevention.
///
/// One global mutex guards the lock table; every queue carries its own
/// condition variable that waiters block on. Lock acquisition while a
/// transaction is shrinking aborts it, as does taking a read lock under
/// READ_UNCOMMITTED. When a request blocks, younger transactions holding
/// conflicting grants are wounded: their state flips to `Aborted` and the
/// queue is woken so any of them that are waiting can bail out.
pub struct LockManager {
    lock_table: Mutex<HashMap<Rid, LockQueue>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            lock_table: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a shared lock on `rid`. Returns false with the transaction
    /// aborted on a two-phase or isolation violation, or when the
    /// transaction is wounded while waiting.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        match txn.state() {
            TransactionState::Aborted => return false,
            TransactionState::Shrinking => {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
            _ => {}
        }
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            // READ_UNCOMMITTED takes no read locks
            txn.set_state(TransactionState::Aborted);
            return false;
        }
        if txn.is_shared_locked(rid) || txn.is_exclusive_locked(rid) {
            return true;
        }

        let mut table = self.lock_table.lock();
        let queue = table.entry(rid).or_insert_with(LockQueue::new);
        let cv = queue.cv.clone();

        let position = insert_position(&queue.requests, txn.id());
        queue.requests.insert(
            position,
            LockRequest {
                txn_id: txn.id(),
                mode: LockMode::Shared,
                granted: false,
                txn: txn.clone(),
            },
        );

        if shared_grantable(&queue.requests, position) {
            queue.requests[position].granted = true;
            txn.add_shared_lock(rid);
            return true;
        }

        self.wound_younger_holders(queue, LockMode::Shared, txn.id());

        loop {
            let queue = table.get_mut(&rid).expect("queue exists while enqueued");
            if txn.state() == TransactionState::Aborted {
                Self::abandon_request(queue, txn.id());
                return false;
            }
            let index = queue
                .requests
                .iter()
                .position(|r| r.txn_id == txn.id())
                .expect("request stays enqueued while waiting");
            if shared_grantable(&queue.requests, index) {
                queue.requests[index].granted = true;
                txn.add_shared_lock(rid);
                return true;
            }
            cv.wait(&mut table);
        }
    }

    /// Acquire an exclusive lock on `rid`
    pub fn lock_exclusive(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        match txn.state() {
            TransactionState::Aborted => return false,
            TransactionState::Shrinking => {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
            _ => {}
        }
        if txn.is_exclusive_locked(rid) {
            return true;
        }

        let mut table = self.lock_table.lock();
        let queue = table.entry(rid).or_insert_with(LockQueue::new);
        let cv = queue.cv.clone();

        let position = insert_position(&queue.requests, txn.id());
        queue.requests.insert(
            position,
            LockRequest {
                txn_id: txn.id(),
                mode: LockMode::Exclusive,
                granted: false,
                txn: txn.clone(),
            },
        );

        if exclusive_grantable(&queue.requests, position) {
            queue.requests[position].granted = true;
            txn.add_exclusive_lock(rid);
            return true;
        }

        self.wound_younger_holders(queue, LockMode::Exclusive, txn.id());

        loop {
            let queue = table.get_mut(&rid).expect("queue exists while enqueued");
            if txn.state() == TransactionState::Aborted {
                Self::abandon_request(queue, txn.id());
                return false;
            }
            let index = queue
                .requests
                .iter()
                .position(|r| r.txn_id == txn.id())
                .expect("request stays enqueued while waiting");
            if exclusive_grantable(&queue.requests, index) {
                queue.requests[index].granted = true;
                txn.add_exclusive_lock(rid);
                return true;
            }
            cv.wait(&mut table);
        }
    }

    /// Upgrade a held shared lock to exclusive. Only one upgrade may be in
    /// flight per queue; a second concurrent upgrader aborts.
    pub fn lock_upgrade(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        match txn.state() {
            TransactionState::Aborted => return false,
            TransactionState::Shrinking => {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
            _ => {}
        }
        if !txn.is_shared_locked(rid) {
            txn.set_state(TransactionState::Aborted);
            return false;
        }

        let mut table = self.lock_table.lock();
        let queue = match table.get_mut(&rid) {
            Some(queue) => queue,
            None => {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
        };
        if queue.upgrading.is_some() {
            // a second concurrent upgrader loses
            txn.set_state(TransactionState::Aborted);
            return false;
        }
        queue.upgrading = Some(txn.id());
        let cv = queue.cv.clone();

        let index = queue
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id())
            .expect("a held shared lock has a queue entry");
        queue.requests[index].mode = LockMode::Exclusive;
        queue.requests[index].granted = false;
        txn.promote_lock(rid);

        if exclusive_grantable(&queue.requests, index) {
            queue.requests[index].granted = true;
            queue.upgrading = None;
            return true;
        }

        loop {
            let queue = table.get_mut(&rid).expect("queue exists while enqueued");
            if txn.state() == TransactionState::Aborted {
                Self::abandon_request(queue, txn.id());
                queue.upgrading = None;
                return false;
            }
            let index = queue
                .requests
                .iter()
                .position(|r| r.txn_id == txn.id())
                .expect("request stays enqueued while waiting");
            if exclusive_grantable(&queue.requests, index) {
                queue.requests[index].granted = true;
                queue.upgrading = None;
                txn.add_exclusive_lock(rid);
                return true;
            }
            cv.wait(&mut table);
        }
    }

    /// Release the lock `txn` holds on `rid`. The first unlock moves the
    /// transaction to SHRINKING, except that releasing a shared lock under
    /// READ_COMMITTED keeps it growing; terminal states never transition.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        txn.remove_shared_lock(rid);
        txn.remove_exclusive_lock(rid);

        let mut table = self.lock_table.lock();
        let queue = match table.get_mut(&rid) {
            Some(queue) => queue,
            None => return false,
        };
        let position = match queue.requests.iter().position(|r| r.txn_id == txn.id()) {
            Some(position) => position,
            None => return false,
        };

        let mode = queue.requests[position].mode;
        let state = txn.state();
        if state != TransactionState::Aborted
            && state != TransactionState::Committed
            && !(mode == LockMode::Shared
                && txn.isolation_level() == IsolationLevel::ReadCommitted)
        {
            txn.set_state(TransactionState::Shrinking);
        }

        queue.requests.remove(position);
        if queue.upgrading == Some(txn.id()) {
            queue.upgrading = None;
        }
        let cv = queue.cv.clone();
        if queue.requests.is_empty() {
            table.remove(&rid);
        }
        cv.notify_all();

        true
    }

    /// Release every lock the transaction still holds; used by commit and
    /// abort cleanup
    pub fn unlock_all(&self, txn: &Arc<Transaction>) {
        for rid in txn.held_locks() {
            self.unlock(txn, rid);
        }
    }

    /// Wound-wait: a blocked requester aborts every younger transaction
    /// holding a conflicting grant, then waits for the grants to drain
    fn wound_younger_holders(&self, queue: &LockQueue, mode: LockMode, txn_id: TxnId) {
        let mut wounded = false;
        for request in &queue.requests {
            if !request.granted || request.txn_id <= txn_id {
                continue;
            }
            let conflicts = mode == LockMode::Exclusive || request.mode == LockMode::Exclusive;
            if conflicts {
                debug!(
                    "wound-wait: txn {} wounds younger txn {}",
                    txn_id, request.txn_id
                );
                request.txn.set_state(TransactionState::Aborted);
                wounded = true;
            }
        }
        if wounded {
            queue.cv.notify_all();
        }
    }

    /// Drop a waiter's queue entry after it observed its own abort
    fn abandon_request(queue: &mut LockQueue, txn_id: TxnId) {
        if let Some(position) = queue.requests.iter().position(|r| r.txn_id == txn_id) {
            queue.requests.remove(position);
        }
        queue.cv.notify_all();
    }
}
