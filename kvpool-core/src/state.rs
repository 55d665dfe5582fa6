//! # Pool State Machine
//!
//! Purpose: All pool bookkeeping (membership, waiters, reservations,
//! lifecycle) in one plain struct that the facade mutates under a single
//! lock. Nothing in here awaits or performs IO.
//!
//! ## Design Principles
//! 1. **Single Source of Truth**: `members` maps each id to an enum slot;
//!    idle transports live only inside `Slot::Idle`.
//! 2. **Identity-Only Queue**: Waiters hold an id and a one-shot sender,
//!    never a reference to a pooled connection.
//! 3. **Direct Hand-Off**: A checked-in connection goes straight to the
//!    oldest live waiter without passing through `Idle`.
//! 4. **Capacity Is Transferable**: Freed capacity is granted to waiters as a
//!    creation reservation, preserving FIFO order.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::connection::{ConnectionId, ConnectionState};
use crate::error::{PoolError, PoolResult};
use crate::status::PoolStatus;

pub(crate) enum Slot<C> {
    Idle { conn: C, idle_since: Instant },
    Borrowed,
}

/// What an acquirer is given: a member to validate, or the right to create one.
pub(crate) enum Grant<C> {
    Existing(ConnectionId, C),
    Reserved,
}

pub(crate) enum Checkout<C> {
    Granted(Grant<C>),
    Wait(WaiterId, oneshot::Receiver<Grant<C>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WaiterId(u64);

struct Waiter<C> {
    id: WaiterId,
    tx: oneshot::Sender<Grant<C>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Open,
    Draining,
    Closed,
}

pub(crate) struct PoolState<C> {
    members: HashMap<ConnectionId, Slot<C>>,
    waiters: VecDeque<Waiter<C>>,
    pending: usize,
    lifecycle: Lifecycle,
    min_size: usize,
    max_size: usize,
    next_connection_id: u64,
    next_waiter_id: u64,
}

impl<C> PoolState<C> {
    pub(crate) fn new(min_size: usize, max_size: usize) -> Self {
        PoolState {
            members: HashMap::with_capacity(max_size),
            waiters: VecDeque::new(),
            pending: 0,
            lifecycle: Lifecycle::Open,
            min_size,
            max_size,
            next_connection_id: 1,
            next_waiter_id: 1,
        }
    }

    /// Members plus reserved creation slots.
    pub(crate) fn size(&self) -> usize {
        self.members.len() + self.pending
    }

    fn idle_count(&self) -> usize {
        self.members
            .values()
            .filter(|slot| matches!(slot, Slot::Idle { .. }))
            .count()
    }

    fn borrowed_count(&self) -> usize {
        self.members.len() - self.idle_count()
    }

    fn ensure_open(&self) -> PoolResult<()> {
        match self.lifecycle {
            Lifecycle::Open => Ok(()),
            Lifecycle::Draining | Lifecycle::Closed => Err(PoolError::Closed),
        }
    }

    fn allocate_id(&mut self) -> ConnectionId {
        let id = ConnectionId::new(self.next_connection_id);
        self.next_connection_id += 1;
        id
    }

    /// Picks an idle member, reserves a creation slot, or enqueues a waiter.
    ///
    /// **Logic**:
    /// 1. Most recently idled member first, so surplus connections age out.
    /// 2. Otherwise grow while `size < max_size`.
    /// 3. Otherwise queue behind existing waiters.
    pub(crate) fn checkout(&mut self) -> PoolResult<Checkout<C>> {
        self.ensure_open()?;

        if let Some(id) = self.most_recent_idle() {
            if let Some(conn) = self.borrow_idle(id) {
                return Ok(Checkout::Granted(Grant::Existing(id, conn)));
            }
        }

        if self.size() < self.max_size {
            self.pending += 1;
            return Ok(Checkout::Granted(Grant::Reserved));
        }

        let (tx, rx) = oneshot::channel();
        let id = WaiterId(self.next_waiter_id);
        self.next_waiter_id += 1;
        self.waiters.push_back(Waiter { id, tx });
        Ok(Checkout::Wait(id, rx))
    }

    fn most_recent_idle(&self) -> Option<ConnectionId> {
        self.members
            .iter()
            .filter_map(|(id, slot)| match slot {
                Slot::Idle { idle_since, .. } => Some((*idle_since, *id)),
                Slot::Borrowed => None,
            })
            .max()
            .map(|(_, id)| id)
    }

    fn borrow_idle(&mut self, id: ConnectionId) -> Option<C> {
        let slot = self.members.get_mut(&id)?;
        match std::mem::replace(slot, Slot::Borrowed) {
            Slot::Idle { conn, .. } => Some(conn),
            Slot::Borrowed => None,
        }
    }

    /// Checks that `id` is a borrowed member of an unclosed pool.
    pub(crate) fn verify_borrowed(&self, id: ConnectionId) -> PoolResult<()> {
        if self.lifecycle == Lifecycle::Closed {
            return Err(PoolError::Closed);
        }
        match self.members.get(&id) {
            Some(Slot::Borrowed) => Ok(()),
            Some(Slot::Idle { .. }) | None => Err(PoolError::NotPoolMember),
        }
    }

    /// Returns a borrowed member: first live waiter gets it, else it idles.
    ///
    /// Hands the transport back when the pool is already closed.
    pub(crate) fn check_in(&mut self, id: ConnectionId, conn: C) -> Option<C> {
        if self.lifecycle == Lifecycle::Closed {
            return Some(conn);
        }

        let mut grant = Grant::Existing(id, conn);
        if self.lifecycle == Lifecycle::Open {
            while let Some(waiter) = self.waiters.pop_front() {
                match waiter.tx.send(grant) {
                    Ok(()) => return None,
                    Err(returned) => grant = returned,
                }
            }
        }

        if let Grant::Existing(id, conn) = grant {
            self.members.insert(
                id,
                Slot::Idle {
                    conn,
                    idle_since: Instant::now(),
                },
            );
        }
        None
    }

    /// Turns a reservation into a borrowed member. `None` once shutdown began.
    pub(crate) fn commit_reserved(&mut self) -> Option<ConnectionId> {
        self.pending = self.pending.saturating_sub(1);
        if self.lifecycle != Lifecycle::Open {
            return None;
        }
        let id = self.allocate_id();
        self.members.insert(id, Slot::Borrowed);
        Some(id)
    }

    /// Drops a reservation whose creation failed or was abandoned.
    pub(crate) fn cancel_reservation(&mut self) {
        self.pending = self.pending.saturating_sub(1);
        self.offer_capacity();
    }

    /// Removes a member (disconnect or failed validation) and frees its capacity.
    pub(crate) fn remove(&mut self, id: ConnectionId) -> bool {
        let removed = self.members.remove(&id).is_some();
        self.offer_capacity();
        removed
    }

    fn offer_capacity(&mut self) {
        if self.lifecycle != Lifecycle::Open {
            return;
        }
        while self.size() < self.max_size {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            self.pending += 1;
            if waiter.tx.send(Grant::Reserved).is_err() {
                self.pending -= 1;
            }
        }
    }

    /// Removes a timed-out or cancelled waiter, giving back anything it was
    /// granted in the meantime.
    pub(crate) fn abandon_wait(
        &mut self,
        id: WaiterId,
        rx: &mut oneshot::Receiver<Grant<C>>,
    ) -> Option<C> {
        if let Some(pos) = self.waiters.iter().position(|waiter| waiter.id == id) {
            self.waiters.remove(pos);
            return None;
        }
        match rx.try_recv() {
            Ok(Grant::Existing(conn_id, conn)) => self.check_in(conn_id, conn),
            Ok(Grant::Reserved) => {
                self.cancel_reservation();
                None
            }
            Err(_) => None,
        }
    }

    /// Reserves one creation slot while the population is below `min_size`.
    pub(crate) fn reserve_below_min(&mut self) -> bool {
        if self.lifecycle != Lifecycle::Open || self.size() >= self.min_size {
            return false;
        }
        self.pending += 1;
        true
    }

    /// Adds a warm-up connection through the normal check-in path.
    pub(crate) fn commit_idle(&mut self, conn: C) -> Result<ConnectionId, C> {
        match self.commit_reserved() {
            Some(id) => match self.check_in(id, conn) {
                None => Ok(id),
                Some(conn) => Err(conn),
            },
            None => Err(conn),
        }
    }

    /// Removes idle members idle longer than `idle_timeout`, oldest first,
    /// never shrinking below `min_size`.
    pub(crate) fn take_expired(&mut self, idle_timeout: Duration) -> Vec<C> {
        if self.lifecycle != Lifecycle::Open {
            return Vec::new();
        }
        let surplus = self.size().saturating_sub(self.min_size);
        if surplus == 0 {
            return Vec::new();
        }

        let now = Instant::now();
        let mut expired: Vec<(Instant, ConnectionId)> = self
            .members
            .iter()
            .filter_map(|(id, slot)| match slot {
                Slot::Idle { idle_since, .. }
                    if now.saturating_duration_since(*idle_since) >= idle_timeout =>
                {
                    Some((*idle_since, *id))
                }
                _ => None,
            })
            .collect();
        expired.sort();
        expired.truncate(surplus);

        expired
            .into_iter()
            .filter_map(|(_, id)| match self.members.remove(&id) {
                Some(Slot::Idle { conn, .. }) => Some(conn),
                Some(slot) => {
                    self.members.insert(id, slot);
                    None
                }
                None => None,
            })
            .collect()
    }

    /// Stops accepting acquirers and wakes queued waiters with `Closed`.
    ///
    /// Returns true for the call that actually started the drain.
    pub(crate) fn begin_drain(&mut self) -> bool {
        if self.lifecycle != Lifecycle::Open {
            return false;
        }
        self.lifecycle = Lifecycle::Draining;
        // Dropping the senders resolves every waiter's receiver with an error.
        self.waiters.clear();
        true
    }

    /// Forgets borrowed members; their borrowers keep (and drop) the transport.
    pub(crate) fn forget_borrowed(&mut self) -> usize {
        let before = self.members.len();
        self.members.retain(|_, slot| matches!(slot, Slot::Idle { .. }));
        before - self.members.len()
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.pending == 0 && self.borrowed_count() == 0
    }

    /// Marks the pool closed and hands back every idle transport for teardown.
    pub(crate) fn finish_close(&mut self) -> Vec<C> {
        self.lifecycle = Lifecycle::Closed;
        self.waiters.clear();
        self.members
            .drain()
            .filter_map(|(_, slot)| match slot {
                Slot::Idle { conn, .. } => Some(conn),
                Slot::Borrowed => None,
            })
            .collect()
    }

    pub(crate) fn state_of(&self, id: ConnectionId) -> ConnectionState {
        match self.members.get(&id) {
            Some(Slot::Idle { .. }) => ConnectionState::Idle,
            Some(Slot::Borrowed) => ConnectionState::Borrowed,
            None => ConnectionState::Disconnected,
        }
    }

    pub(crate) fn status(&self) -> PoolStatus {
        let idle = self.idle_count();
        PoolStatus {
            size: self.size(),
            idle,
            borrowed: self.members.len() - idle,
            pending: self.pending,
            waiting: self.waiters.len(),
            min_size: self.min_size,
            max_size: self.max_size,
            closed: self.lifecycle == Lifecycle::Closed,
        }
    }
}
