//! # kvpool RESP client
//!
//! Purpose: Pool connections to a Redis-compatible store over RESP2 so
//! callers skip the TCP and AUTH handshake on every command.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `RespConnectionManager` is the only piece the
//!    generic pool knows about.
//! 2. **Builder Pattern**: `PoolOptions` validates once and hands the pool
//!    plain configuration values.
//! 3. **Minimal Allocation**: Reuse buffers for RESP framing and parsing.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.

mod connection;
mod error;
mod manager;
mod options;
pub mod resp;

pub use connection::{ClientTtl, RespConnection};
pub use error::{ClientError, ClientResult};
pub use manager::RespConnectionManager;
pub use options::{ClientConfig, ClientOptions, PoolOptions, PoolSizing};

pub use kvpool_core::{
    BoxFuture, ConfigError, ConnectionError, ConnectionId, ConnectionState, PoolConfig, PoolError,
    PoolResult, PoolStatus, ShutdownMode,
};

/// A pool of RESP connections.
pub type KvPool = kvpool_core::Pool<RespConnectionManager>;

/// A RESP connection borrowed from a [`KvPool`].
pub type KvConnection = kvpool_core::PooledConnection<RespConnectionManager>;
