//! RESP connection factory plugged into the generic pool.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use kvpool_core::{ConnectionError, ManageConnection};

use crate::connection::RespConnection;
use crate::options::ClientConfig;

/// Bound on the health PING and the closing QUIT when round trips are unbounded.
const FALLBACK_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Dials, pings and closes RESP connections for a [`KvPool`](crate::KvPool).
#[derive(Debug, Clone)]
pub struct RespConnectionManager {
    config: ClientConfig,
}

impl RespConnectionManager {
    pub fn new(config: ClientConfig) -> Self {
        RespConnectionManager { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn check_timeout(&self) -> Duration {
        self.config
            .command_timeout()
            .unwrap_or(FALLBACK_CHECK_TIMEOUT)
    }
}

#[async_trait]
impl ManageConnection for RespConnectionManager {
    type Connection = RespConnection;

    async fn create(&self) -> Result<RespConnection, ConnectionError> {
        let conn = RespConnection::connect(&self.config).await?;
        debug!(endpoint = %self.config.endpoint(), "opened connection");
        Ok(conn)
    }

    async fn destroy(&self, conn: RespConnection) {
        let limit = self.check_timeout();
        if tokio::time::timeout(limit, conn.close()).await.is_err() {
            debug!(endpoint = %self.config.endpoint(), ?limit, "close timed out; dropping socket");
            return;
        }
        debug!(endpoint = %self.config.endpoint(), "closed connection");
    }

    async fn validate(&self, conn: &mut RespConnection) -> bool {
        let limit = self.check_timeout();
        match tokio::time::timeout(limit, conn.ping(None)).await {
            Ok(Ok(reply)) => reply == b"PONG",
            Ok(Err(err)) => {
                debug!(error = %err, "ping failed");
                false
            }
            Err(_) => {
                debug!(?limit, "ping timed out");
                false
            }
        }
    }
}
