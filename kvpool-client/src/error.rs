//! Errors from commands issued through a pooled connection.

use thiserror::Error;

use kvpool_core::{ConnectionError, PoolError};

/// Result type for pooled client calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Either the pool could not lend a connection or the command failed on it.
///
/// Usable as the error type of [`Pool::execute`](kvpool_core::Pool::execute).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
