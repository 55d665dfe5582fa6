//! # Borrowed Connections
//!
//! Purpose: The handle a borrower holds. It owns the transport while the
//! connection is borrowed and becomes an empty shell once released or
//! disconnected, so a second release is detectable instead of undefined.
//!
//! ## Design Principles
//! 1. **RAII**: Dropping a handle that still owns its transport returns it.
//! 2. **Exclusive Ownership**: The transport lives in exactly one place:
//!    the pool's idle slot, this handle, or nowhere (being destroyed).

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::{PoolError, PoolResult};
use crate::manager::ManageConnection;
use crate::pool::PoolInner;

/// Identity of a pool member, unique within one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(raw: u64) -> Self {
        ConnectionId(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Membership state of a connection as seen by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Idle,
    Borrowed,
    /// Removed from membership; never comes back.
    Disconnected,
}

/// A connection borrowed from a [`Pool`](crate::Pool).
pub struct PooledConnection<M: ManageConnection> {
    pool: Arc<PoolInner<M>>,
    id: ConnectionId,
    conn: Option<M::Connection>,
}

impl<M: ManageConnection> PooledConnection<M> {
    pub(crate) fn new(pool: Arc<PoolInner<M>>, id: ConnectionId, conn: M::Connection) -> Self {
        PooledConnection {
            pool,
            id,
            conn: Some(conn),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// True until the handle is released or disconnected.
    pub fn is_attached(&self) -> bool {
        self.conn.is_some()
    }

    /// Borrows the transport. Fails on a released or disconnected handle.
    pub fn get(&self) -> PoolResult<&M::Connection> {
        self.conn.as_ref().ok_or(PoolError::NotPoolMember)
    }

    pub fn get_mut(&mut self) -> PoolResult<&mut M::Connection> {
        self.conn.as_mut().ok_or(PoolError::NotPoolMember)
    }

    /// Returns the connection to its pool. See [`Pool::release`](crate::Pool::release).
    pub fn release(&mut self) -> PoolResult<()> {
        let pool = Arc::clone(&self.pool);
        pool.release(self)
    }

    /// Retires the connection. See [`Pool::disconnect`](crate::Pool::disconnect).
    pub async fn disconnect(&mut self) -> PoolResult<()> {
        let pool = Arc::clone(&self.pool);
        pool.disconnect(self).await
    }

    pub(crate) fn belongs_to(&self, pool: &Arc<PoolInner<M>>) -> bool {
        Arc::ptr_eq(&self.pool, pool)
    }

    pub(crate) fn take_transport(&mut self) -> Option<M::Connection> {
        self.conn.take()
    }
}

impl<M: ManageConnection> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("attached", &self.conn.is_some())
            .finish()
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if self.conn.is_none() {
            return;
        }
        let pool = Arc::clone(&self.pool);
        if let Err(err) = pool.release(self) {
            // The transport is dropped with the handle, closing it.
            debug!(connection_id = %self.id, error = %err, "dropped connection was not returned");
        }
    }
}
