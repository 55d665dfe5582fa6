//! # RESP Connection
//!
//! Purpose: One TCP session to a Redis-compatible store, with the typed
//! command helpers borrowers use while they hold it.
//!
//! ## Design Principles
//! 1. **Borrow-Friendly API**: Accept `&[u8]` to avoid unnecessary copies.
//! 2. **Buffer Reuse**: Each connection keeps its own read and write buffers.
//! 3. **Fail Fast**: Protocol violations surface immediately as errors.
//! 4. **Bounded Waits**: Every round trip honours the command timeout.

use std::borrow::Cow;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use kvpool_core::ConnectionError;

use crate::options::ClientConfig;
use crate::resp::{encode_command, read_response, RespValue};

type ConnResult<T> = Result<T, ConnectionError>;

/// TTL state returned by the server, mirroring Redis semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTtl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

/// Single TCP connection with reusable buffers.
pub struct RespConnection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
    key_prefix: Vec<u8>,
    command_timeout: Option<Duration>,
}

impl RespConnection {
    /// Dials the endpoint and runs the AUTH / SELECT / SETNAME handshake.
    pub async fn connect(config: &ClientConfig) -> ConnResult<Self> {
        let dial = TcpStream::connect((config.host.as_str(), config.port));
        let stream = match config.connect_timeout() {
            Some(limit) => tokio::time::timeout(limit, dial)
                .await
                .map_err(|_| ConnectionError::Timeout(limit))??,
            None => dial.await?,
        };
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        let mut conn = RespConnection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
            key_prefix: config.key_prefix.as_bytes().to_vec(),
            command_timeout: config.command_timeout(),
        };
        conn.handshake(config).await?;
        Ok(conn)
    }

    async fn handshake(&mut self, config: &ClientConfig) -> ConnResult<()> {
        if let Some(password) = &config.password {
            let reply = match &config.username {
                Some(user) => {
                    self.exec(&[b"AUTH", user.as_bytes(), password.as_bytes()])
                        .await?
                }
                None => self.exec(&[b"AUTH", password.as_bytes()]).await?,
            };
            expect_ok(reply).map_err(ConnectionError::Auth)?;
        }

        if config.db != 0 {
            let db = config.db.to_string();
            let reply = self.exec(&[b"SELECT", db.as_bytes()]).await?;
            expect_ok(reply).map_err(ConnectionError::Handshake)?;
        }

        if let Some(name) = &config.name {
            let reply = self.exec(&[b"CLIENT", b"SETNAME", name.as_bytes()]).await?;
            expect_ok(reply).map_err(ConnectionError::Handshake)?;
        }

        debug!(endpoint = %config.endpoint(), db = config.db, "handshake complete");
        Ok(())
    }

    /// Sends one raw RESP command and returns the parsed reply.
    ///
    /// Error replies are returned as `RespValue::Error`, not as `Err`.
    pub async fn exec(&mut self, args: &[&[u8]]) -> ConnResult<RespValue> {
        match self.command_timeout {
            Some(limit) => tokio::time::timeout(limit, self.round_trip(args))
                .await
                .map_err(|_| ConnectionError::Timeout(limit))?,
            None => self.round_trip(args).await,
        }
    }

    async fn round_trip(&mut self, args: &[&[u8]]) -> ConnResult<RespValue> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf).await?;
        stream.flush().await?;

        read_response(&mut self.reader, &mut self.line_buf).await
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub async fn get(&mut self, key: &[u8]) -> ConnResult<Option<Vec<u8>>> {
        let key = self.prefixed(key);
        match self.exec(&[b"GET", &*key]).await?.into_result()? {
            RespValue::Bulk(data) => Ok(data),
            _ => Err(ConnectionError::UnexpectedResponse),
        }
    }

    /// Sets a value for a key without expiration.
    pub async fn set(&mut self, key: &[u8], value: &[u8]) -> ConnResult<()> {
        let key = self.prefixed(key);
        match self.exec(&[b"SET", &*key, value]).await?.into_result()? {
            RespValue::Simple(_) => Ok(()),
            _ => Err(ConnectionError::UnexpectedResponse),
        }
    }

    /// Sets a value and attaches an expiration in seconds.
    pub async fn set_with_ttl(
        &mut self,
        key: &[u8],
        value: &[u8],
        ttl: Duration,
    ) -> ConnResult<()> {
        let key = self.prefixed(key);
        let seconds = ttl.as_secs().to_string();
        match self
            .exec(&[b"SET", &*key, value, b"EX", seconds.as_bytes()])
            .await?
            .into_result()?
        {
            RespValue::Simple(_) => Ok(()),
            _ => Err(ConnectionError::UnexpectedResponse),
        }
    }

    /// Deletes a key. Returns true when a key was removed.
    pub async fn del(&mut self, key: &[u8]) -> ConnResult<bool> {
        let key = self.prefixed(key);
        match self.exec(&[b"DEL", &*key]).await?.into_result()? {
            RespValue::Integer(count) => Ok(count > 0),
            _ => Err(ConnectionError::UnexpectedResponse),
        }
    }

    /// Sets a time-to-live on a key. Returns true when the TTL was set.
    pub async fn expire(&mut self, key: &[u8], ttl: Duration) -> ConnResult<bool> {
        let key = self.prefixed(key);
        let seconds = ttl.as_secs().to_string();
        match self
            .exec(&[b"EXPIRE", &*key, seconds.as_bytes()])
            .await?
            .into_result()?
        {
            RespValue::Integer(value) => Ok(value == 1),
            _ => Err(ConnectionError::UnexpectedResponse),
        }
    }

    /// Returns TTL status for a key.
    pub async fn ttl(&mut self, key: &[u8]) -> ConnResult<ClientTtl> {
        let key = self.prefixed(key);
        match self.exec(&[b"TTL", &*key]).await?.into_result()? {
            RespValue::Integer(-2) => Ok(ClientTtl::Missing),
            RespValue::Integer(-1) => Ok(ClientTtl::NoExpiry),
            RespValue::Integer(value) if value >= 0 => {
                Ok(ClientTtl::ExpiresIn(Duration::from_secs(value as u64)))
            }
            _ => Err(ConnectionError::UnexpectedResponse),
        }
    }

    /// Pings the server. Returns the raw response payload.
    pub async fn ping(&mut self, payload: Option<&[u8]>) -> ConnResult<Vec<u8>> {
        let reply = match payload {
            Some(data) => self.exec(&[b"PING", data]).await?,
            None => self.exec(&[b"PING"]).await?,
        };
        match reply.into_result()? {
            RespValue::Simple(text) => Ok(text),
            RespValue::Bulk(Some(data)) => Ok(data),
            _ => Err(ConnectionError::UnexpectedResponse),
        }
    }

    /// Fetches server INFO output.
    pub async fn info(&mut self) -> ConnResult<Vec<u8>> {
        match self.exec(&[b"INFO"]).await?.into_result()? {
            RespValue::Bulk(Some(data)) => Ok(data),
            _ => Err(ConnectionError::UnexpectedResponse),
        }
    }

    /// Sends QUIT and shuts the socket down. Errors are only logged.
    pub async fn close(mut self) {
        if let Err(err) = self.exec(&[b"QUIT"]).await {
            debug!(error = %err, "QUIT failed");
        }
        if let Err(err) = self.reader.get_mut().shutdown().await {
            debug!(error = %err, "socket shutdown failed");
        }
    }

    fn prefixed<'k>(&self, key: &'k [u8]) -> Cow<'k, [u8]> {
        if self.key_prefix.is_empty() {
            return Cow::Borrowed(key);
        }
        let mut full = Vec::with_capacity(self.key_prefix.len() + key.len());
        full.extend_from_slice(&self.key_prefix);
        full.extend_from_slice(key);
        Cow::Owned(full)
    }
}

fn expect_ok(reply: RespValue) -> Result<(), String> {
    match reply {
        RespValue::Simple(_) => Ok(()),
        RespValue::Error(message) => Err(String::from_utf8_lossy(&message).into_owned()),
        other => Err(format!("unexpected reply {other:?}")),
    }
}
