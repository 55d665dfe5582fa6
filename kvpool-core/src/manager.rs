//! # Connection Factory
//!
//! Purpose: The only capability the pool needs from the outside world:
//! make a live connection, check it, and tear it down.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: The pool is generic over the factory.
//! 2. **Best-Effort Teardown**: `destroy` never fails; errors are the
//!    implementor's to log.
//! 3. **Cheap Validation**: `validate` answers a bool instead of an error so
//!    the pool can decide to recycle.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ConnectionError;

/// Creates, validates and destroys connections for a pool.
#[async_trait]
pub trait ManageConnection: Send + Sync + 'static {
    /// The live session handed to borrowers.
    type Connection: Send + 'static;

    /// Establishes a new connection.
    async fn create(&self) -> Result<Self::Connection, ConnectionError>;

    /// Releases the connection's resources. Must tolerate closed transports.
    async fn destroy(&self, conn: Self::Connection);

    /// Liveness check. Returns false when the connection is unusable.
    async fn validate(&self, conn: &mut Self::Connection) -> bool;
}

#[async_trait]
impl<T: ManageConnection> ManageConnection for Arc<T> {
    type Connection = T::Connection;

    async fn create(&self) -> Result<Self::Connection, ConnectionError> {
        (**self).create().await
    }

    async fn destroy(&self, conn: Self::Connection) {
        (**self).destroy(conn).await
    }

    async fn validate(&self, conn: &mut Self::Connection) -> bool {
        (**self).validate(conn).await
    }
}
