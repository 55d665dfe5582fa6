//! # kvpool core
//!
//! Purpose: A bounded, async connection pool that is generic over how
//! connections are made. It tracks which connections are idle or borrowed,
//! validates on borrow, retires explicitly disconnected connections, and
//! rejects double releases.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse live sessions to skip reconnects.
//! 2. **Single Lock Domain**: Membership, waiters and counters share one mutex.
//! 3. **Facade Pattern**: `Pool` hides the state machine behind
//!    acquire/release/disconnect/execute/end.
//! 4. **No Globals**: Every pool owns its state; pools never interfere.

mod config;
mod connection;
mod error;
mod manager;
mod pool;
mod state;
mod status;

pub use config::{PoolConfig, ShutdownMode};
pub use connection::{ConnectionId, ConnectionState, PooledConnection};
pub use error::{ConfigError, ConnectionError, PoolError, PoolResult};
pub use manager::ManageConnection;
pub use pool::Pool;
pub use status::PoolStatus;

pub use async_trait::async_trait;
pub use futures::future::BoxFuture;
