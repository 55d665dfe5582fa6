//! # Error Taxonomy
//!
//! Purpose: One error enum per failure domain so callers can tell a
//! configuration mistake from a dead endpoint from a lifecycle bug.
//!
//! ## Design Principles
//! 1. **Fail Fast**: Configuration problems surface at build time only.
//! 2. **Never Silent**: Membership violations are always reported.
//! 3. **Typed Sources**: IO failures keep their `std::io::Error` source.

use std::time::Duration;

use thiserror::Error;

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Invalid pool or connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `min_size` is larger than `max_size`.
    #[error("min_size ({min}) cannot exceed max_size ({max})")]
    MinExceedsMax { min: usize, max: usize },
    /// A pool that can hold zero connections can never serve a caller.
    #[error("max_size must be greater than 0")]
    ZeroMaxSize,
    /// Port 0 cannot be dialed.
    #[error("port {0} is out of range")]
    InvalidPort(u16),
    /// Host is empty or malformed.
    #[error("invalid host: {0:?}")]
    InvalidHost(String),
    /// Connection URL could not be parsed.
    #[error("invalid connection url: {0}")]
    InvalidUrl(String),
    /// URL scheme is not `redis`.
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
    /// Database index in the URL path is not a number.
    #[error("invalid database index: {0:?}")]
    InvalidDatabase(String),
}

/// The connection factory could not establish or use a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Network or IO failure while connecting, reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP framing or parse error.
    #[error("protocol error: {0}")]
    Protocol(&'static str),
    /// Server returned an error reply.
    #[error("server error: {0}")]
    Server(String),
    /// Server rejected the credentials.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// A post-connect setup command (SELECT, CLIENT SETNAME) failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// Connecting or a round trip took longer than allowed.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    /// Reused connections kept failing validation until the acquire deadline.
    #[error("no connection passed validation before the deadline")]
    ValidationFailed,
    /// Response type did not match the command that was sent.
    #[error("unexpected response")]
    UnexpectedResponse,
}

/// Errors surfaced by the pool facade.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
    /// No connection became available before the deadline.
    #[error("timed out after {0:?} waiting for a pooled connection")]
    Timeout(Duration),
    /// Double release, release after disconnect, or a handle from another pool.
    #[error("resource not currently part of this pool")]
    NotPoolMember,
    /// The pool has been shut down with `end()`.
    #[error("pool is closed")]
    Closed,
}

impl PoolError {
    /// Returns true for caller-side lifecycle bugs.
    pub fn is_not_pool_member(&self) -> bool {
        matches!(self, PoolError::NotPoolMember)
    }

    /// Returns true when the caller gave up waiting.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::Timeout(_))
    }
}
