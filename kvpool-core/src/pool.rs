//! # Connection Pool
//!
//! Purpose: Lend connections to concurrent tasks, bounded by `min_size` and
//! `max_size`, with validation on borrow and explicit retirement.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse connections instead of reconnecting.
//! 2. **Minimal Locking**: The mutex guards bookkeeping only; create,
//!    validate and destroy run with the lock released.
//! 3. **Cancel Safety**: Reservations and waits are held by guards that undo
//!    themselves when an acquire future is dropped or times out.
//! 4. **Fail Loud**: Membership violations surface as `NotPoolMember`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{PoolConfig, ShutdownMode};
use crate::connection::{ConnectionId, ConnectionState, PooledConnection};
use crate::error::{ConnectionError, PoolError, PoolResult};
use crate::manager::ManageConnection;
use crate::state::{Checkout, Grant, PoolState, WaiterId};
use crate::status::PoolStatus;

pub(crate) struct PoolInner<M: ManageConnection> {
    config: PoolConfig,
    manager: M,
    state: Mutex<PoolState<M::Connection>>,
    // Signalled whenever borrowed or pending counts drop.
    drained: Notify,
}

impl<M: ManageConnection> PoolInner<M> {
    fn state(&self) -> MutexGuard<'_, PoolState<M::Connection>> {
        // Critical sections never panic midway, so a poisoned lock still
        // guards consistent bookkeeping.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn release(&self, handle: &mut PooledConnection<M>) -> PoolResult<()> {
        let id = handle.id();
        {
            let mut state = self.state();
            if !handle.is_attached() {
                return Err(PoolError::NotPoolMember);
            }
            state.verify_borrowed(id)?;
            let conn = handle.take_transport().ok_or(PoolError::NotPoolMember)?;
            // An open or draining pool always takes the transport back.
            let _ = state.check_in(id, conn);
        }
        self.drained.notify_waiters();
        debug!(connection_id = %id, "released connection");
        Ok(())
    }

    pub(crate) async fn disconnect(&self, handle: &mut PooledConnection<M>) -> PoolResult<()> {
        let id = handle.id();
        let conn = {
            let mut state = self.state();
            if !handle.is_attached() {
                return Err(PoolError::NotPoolMember);
            }
            state.verify_borrowed(id)?;
            let conn = handle.take_transport().ok_or(PoolError::NotPoolMember)?;
            state.remove(id);
            conn
        };
        self.drained.notify_waiters();
        debug!(connection_id = %id, "disconnected connection");
        self.manager.destroy(conn).await;
        Ok(())
    }

    /// Drops a borrowed member without waiting for its teardown.
    fn retire(self: &Arc<Self>, handle: &mut PooledConnection<M>) {
        let id = handle.id();
        let conn = {
            let mut state = self.state();
            if let Err(err) = state.verify_borrowed(id) {
                // Closed pool: the transport goes away with the handle.
                debug!(connection_id = %id, error = %err, "could not retire connection");
                return;
            }
            let Some(conn) = handle.take_transport() else {
                return;
            };
            state.remove(id);
            conn
        };
        self.drained.notify_waiters();
        self.destroy_detached(vec![conn]);
    }

    /// Destroys connections on a spawned task so no caller waits on teardown.
    fn destroy_detached(self: &Arc<Self>, conns: Vec<M::Connection>) {
        if conns.is_empty() {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            for conn in conns {
                inner.manager.destroy(conn).await;
            }
        });
    }
}

/// A slot reserved for a connection being created. Dropping it unreserves.
struct Reservation<'a, M: ManageConnection> {
    pool: &'a PoolInner<M>,
    armed: bool,
}

impl<'a, M: ManageConnection> Reservation<'a, M> {
    fn new(pool: &'a PoolInner<M>) -> Self {
        Reservation { pool, armed: true }
    }

    fn commit(mut self) -> Option<ConnectionId> {
        self.armed = false;
        let id = self.pool.state().commit_reserved();
        self.pool.drained.notify_waiters();
        id
    }

    fn commit_idle(mut self, conn: M::Connection) -> Result<ConnectionId, M::Connection> {
        self.armed = false;
        let result = self.pool.state().commit_idle(conn);
        self.pool.drained.notify_waiters();
        result
    }
}

impl<M: ManageConnection> Drop for Reservation<'_, M> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.state().cancel_reservation();
            self.pool.drained.notify_waiters();
        }
    }
}

/// A queued acquire call. Dropping it before a grant arrives leaves the queue.
struct WaitGuard<'a, M: ManageConnection> {
    pool: &'a PoolInner<M>,
    waiter: WaiterId,
    rx: oneshot::Receiver<Grant<M::Connection>>,
    settled: bool,
}

impl<M: ManageConnection> Drop for WaitGuard<'_, M> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let leftover = self.pool.state().abandon_wait(self.waiter, &mut self.rx);
        self.pool.drained.notify_waiters();
        if leftover.is_some() {
            debug!("pool closed while a grant was in flight; dropping transport");
        }
    }
}

/// Outcome of checking a reused member before handing it out.
enum Checked<M: ManageConnection> {
    Healthy(PooledConnection<M>),
    Retired,
    TimedOut,
}

/// Once a reused member failed its check, running out of time means no
/// valid connection could be produced, not merely a busy pool.
fn exhausted(err: PoolError, retired: bool) -> PoolError {
    match err {
        PoolError::Timeout(_) if retired => {
            PoolError::Connection(ConnectionError::ValidationFailed)
        }
        other => other,
    }
}

/// Bounded pool of connections produced by a [`ManageConnection`].
///
/// Cloning is cheap and yields another handle to the same pool.
pub struct Pool<M: ManageConnection> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ManageConnection> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Pool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ManageConnection> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}

impl<M: ManageConnection> Pool<M> {
    /// Creates a pool and warms it up to `min_size` idle connections.
    ///
    /// A failed warm-up closes the pool and returns the connection error.
    pub async fn new(config: PoolConfig, manager: M) -> PoolResult<Self> {
        let pool = Self::new_lazy(config, manager)?;
        if let Err(err) = pool.replenish().await {
            pool.end().await;
            return Err(err);
        }
        info!(
            min_size = pool.inner.config.min_size(),
            max_size = pool.inner.config.max_size(),
            "connection pool started"
        );
        Ok(pool)
    }

    /// Creates a pool without opening any connection.
    pub fn new_lazy(config: PoolConfig, manager: M) -> PoolResult<Self> {
        config.validate()?;
        let state = PoolState::new(config.min_size(), config.max_size());
        Ok(Pool {
            inner: Arc::new(PoolInner {
                config,
                manager,
                state: Mutex::new(state),
                drained: Notify::new(),
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    pub fn status(&self) -> PoolStatus {
        self.inner.state().status()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state().status().closed
    }

    /// Membership state of the connection with the given id.
    pub fn connection_state(&self, id: ConnectionId) -> ConnectionState {
        self.inner.state().state_of(id)
    }

    /// Acquires a connection using the configured `acquire_timeout`.
    pub async fn get_connection(&self) -> PoolResult<PooledConnection<M>> {
        self.acquire(self.inner.config.acquire_timeout()).await
    }

    /// Acquires a connection, waiting at most `timeout`.
    ///
    /// **Logic**:
    /// 1. Evict expired idle members (never below `min_size`); their teardown
    ///    runs in the background.
    /// 2. Take an idle member, reserve a slot to grow, or queue as a waiter.
    /// 3. Validate reused members within the deadline; a failed one is
    ///    retired and the loop retries against the same deadline.
    /// 4. A reserved slot creates a fresh connection, which is not re-validated.
    /// 5. Running out of time after a failed validation reports
    ///    `ConnectionError::ValidationFailed` instead of `Timeout`.
    pub async fn acquire(&self, timeout: Duration) -> PoolResult<PooledConnection<M>> {
        let deadline = Instant::now() + timeout;
        self.evict_idle_detached();
        // Set once a reused member fails its check.
        let mut retired = false;

        loop {
            let checkout = self.inner.state().checkout()?;
            let grant = match checkout {
                Checkout::Granted(grant) => grant,
                Checkout::Wait(waiter, rx) => self
                    .wait_for_grant(waiter, rx, deadline, timeout)
                    .await
                    .map_err(|err| exhausted(err, retired))?,
            };

            match grant {
                Grant::Existing(id, conn) => {
                    let handle = PooledConnection::new(Arc::clone(&self.inner), id, conn);
                    match self.checked(handle, deadline).await {
                        Checked::Healthy(handle) => return Ok(handle),
                        Checked::Retired => retired = true,
                        Checked::TimedOut => {
                            return Err(exhausted(PoolError::Timeout(timeout), retired));
                        }
                    }
                }
                Grant::Reserved => {
                    let reservation = Reservation::new(&self.inner);
                    return self
                        .create_borrowed(reservation, deadline, timeout)
                        .await
                        .map_err(|err| exhausted(err, retired));
                }
            }

            if Instant::now() >= deadline {
                return Err(exhausted(PoolError::Timeout(timeout), retired));
            }
        }
    }

    async fn wait_for_grant(
        &self,
        waiter: WaiterId,
        rx: oneshot::Receiver<Grant<M::Connection>>,
        deadline: Instant,
        timeout: Duration,
    ) -> PoolResult<Grant<M::Connection>> {
        let mut wait = WaitGuard {
            pool: &self.inner,
            waiter,
            rx,
            settled: false,
        };

        match tokio::time::timeout_at(deadline, &mut wait.rx).await {
            Ok(Ok(grant)) => {
                wait.settled = true;
                Ok(grant)
            }
            Ok(Err(_)) => {
                wait.settled = true;
                Err(PoolError::Closed)
            }
            Err(_) => {
                debug!(?timeout, "acquire timed out while queued");
                Err(PoolError::Timeout(timeout))
            }
        }
    }

    /// Validates a reused member within the acquire deadline.
    ///
    /// A member that fails, or whose check outlasts the deadline, is retired
    /// and destroyed in the background.
    async fn checked(&self, mut handle: PooledConnection<M>, deadline: Instant) -> Checked<M> {
        if !self.inner.config.validate_on_acquire() {
            return Checked::Healthy(handle);
        }
        let verdict = match handle.get_mut() {
            Ok(conn) => {
                tokio::time::timeout_at(deadline, self.inner.manager.validate(conn)).await
            }
            Err(_) => Ok(false),
        };
        let timed_out = match verdict {
            Ok(true) => return Checked::Healthy(handle),
            Ok(false) => {
                warn!(connection_id = %handle.id(), "connection failed validation; retiring");
                false
            }
            Err(_) => {
                warn!(
                    connection_id = %handle.id(),
                    "validation outlasted the acquire deadline; retiring"
                );
                true
            }
        };

        self.inner.retire(&mut handle);
        if timed_out {
            Checked::TimedOut
        } else {
            Checked::Retired
        }
    }

    async fn create_borrowed(
        &self,
        reservation: Reservation<'_, M>,
        deadline: Instant,
        timeout: Duration,
    ) -> PoolResult<PooledConnection<M>> {
        let conn = match tokio::time::timeout_at(deadline, self.inner.manager.create()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(err)) => {
                warn!(error = %err, "failed to create connection");
                return Err(PoolError::Connection(err));
            }
            Err(_) => return Err(PoolError::Timeout(timeout)),
        };

        match reservation.commit() {
            Some(id) => {
                debug!(connection_id = %id, "created connection");
                Ok(PooledConnection::new(Arc::clone(&self.inner), id, conn))
            }
            None => {
                self.inner.manager.destroy(conn).await;
                Err(PoolError::Closed)
            }
        }
    }

    /// Returns a borrowed connection.
    ///
    /// The oldest waiter receives it directly; otherwise it becomes idle.
    /// Fails with `NotPoolMember` for a handle that was already released or
    /// disconnected, or that belongs to another pool.
    pub fn release(&self, conn: &mut PooledConnection<M>) -> PoolResult<()> {
        if !conn.belongs_to(&self.inner) {
            return Err(PoolError::NotPoolMember);
        }
        self.inner.release(conn)
    }

    /// Removes a borrowed connection from the pool and destroys it.
    pub async fn disconnect(&self, conn: &mut PooledConnection<M>) -> PoolResult<()> {
        if !conn.belongs_to(&self.inner) {
            return Err(PoolError::NotPoolMember);
        }
        self.inner.disconnect(conn).await
    }

    /// Runs `f` on a pooled connection and releases it on every exit path.
    ///
    /// `f`'s error is returned unchanged; a failed release is only logged.
    ///
    /// ```ignore
    /// let value = pool
    ///     .execute(|conn| Box::pin(async move { conn.get(b"key").await }))
    ///     .await?;
    /// ```
    pub async fn execute<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut M::Connection) -> BoxFuture<'c, Result<T, E>>,
        E: From<PoolError>,
    {
        let mut handle = self.get_connection().await?;
        let result = match handle.get_mut() {
            Ok(conn) => f(conn).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = self.release(&mut handle) {
            warn!(
                connection_id = %handle.id(),
                error = %err,
                "failed to release connection after execute"
            );
        }
        result
    }

    /// Creates idle connections until the population reaches `min_size`.
    ///
    /// Returns the number of connections added.
    pub async fn replenish(&self) -> PoolResult<usize> {
        let mut created = 0;
        loop {
            let reserved = self.inner.state().reserve_below_min();
            if !reserved {
                return Ok(created);
            }
            let reservation = Reservation::new(&self.inner);
            let conn = self.inner.manager.create().await?;
            match reservation.commit_idle(conn) {
                Ok(id) => {
                    debug!(connection_id = %id, "warmed up connection");
                    created += 1;
                }
                Err(conn) => {
                    self.inner.manager.destroy(conn).await;
                    return Err(PoolError::Closed);
                }
            }
        }
    }

    /// Destroys idle connections older than `idle_timeout`, keeping `min_size`.
    pub async fn evict_idle(&self) -> usize {
        let Some(idle_timeout) = self.inner.config.idle_timeout() else {
            return 0;
        };
        let expired = self.inner.state().take_expired(idle_timeout);
        let evicted = expired.len();
        for conn in expired {
            self.inner.manager.destroy(conn).await;
        }
        if evicted > 0 {
            debug!(evicted, "evicted idle connections");
        }
        evicted
    }

    fn evict_idle_detached(&self) {
        let Some(idle_timeout) = self.inner.config.idle_timeout() else {
            return;
        };
        let expired = self.inner.state().take_expired(idle_timeout);
        if !expired.is_empty() {
            debug!(evicted = expired.len(), "evicting idle connections");
            self.inner.destroy_detached(expired);
        }
    }

    /// Shuts the pool down. Idempotent.
    ///
    /// **Logic**:
    /// 1. Stop accepting acquirers; queued waiters fail with `Closed`.
    /// 2. Wait for borrowed connections (graceful) or forget them (force).
    /// 3. Destroy every idle member and mark the pool closed.
    pub async fn end(&self) {
        let started = self.inner.state().begin_drain();
        if started {
            info!("draining connection pool");
        }

        let mode = self.inner.config.shutdown_mode();
        let drained = match (mode, mode.drain_timeout()) {
            (ShutdownMode::Force, _) => false,
            (ShutdownMode::Graceful { .. }, Some(limit)) => {
                tokio::time::timeout(limit, self.wait_drained()).await.is_ok()
            }
            (ShutdownMode::Graceful { .. }, None) => {
                self.wait_drained().await;
                true
            }
        };
        if !drained {
            let forgotten = self.inner.state().forget_borrowed();
            if forgotten > 0 {
                warn!(forgotten, "closing pool with connections still borrowed");
            }
        }

        let idle = self.inner.state().finish_close();
        self.inner.drained.notify_waiters();
        for conn in idle {
            self.inner.manager.destroy(conn).await;
        }
        if started {
            info!("connection pool closed");
        }
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let drained = self.inner.state().is_drained();
            if drained {
                return;
            }
            notified.await;
        }
    }
}
