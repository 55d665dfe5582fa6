//! # Pool Options Builder
//!
//! Purpose: Turn a host/port pair or a `redis://` URL plus optional
//! overrides into the two configurations a pool needs: how to dial the
//! store (`ClientConfig`) and how many connections to keep (`PoolConfig`).
//!
//! ## Design Principles
//! 1. **Builder Pattern**: Chain overrides, validate once in `build()`.
//! 2. **Equivalent Entry Points**: Host/port and URL produce the same base.
//! 3. **Serde-Friendly**: Option structs use millisecond integers so they
//!    load from any serde format.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use kvpool_core::{ConfigError, Pool, PoolConfig, PoolResult, ShutdownMode};

use crate::manager::RespConnectionManager;
use crate::KvPool;

const DEFAULT_PORT: u16 = 6379;
const DEFAULT_MAX_SIZE: usize = 10;
const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5_000;

/// Everything needed to open and prepare one RESP connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Host name or IP literal.
    pub host: String,
    pub port: u16,
    /// Username for `AUTH`; only sent together with a password.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Logical database selected after connecting.
    pub db: u32,
    /// Connection name reported through `CLIENT SETNAME`.
    pub name: Option<String>,
    /// Prepended to every key passed to the typed helpers.
    pub key_prefix: String,
    pub connect_timeout_ms: Option<u64>,
    /// Bound on each command round trip. `None` waits indefinitely.
    pub command_timeout_ms: Option<u64>,
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }

    /// `host:port`, for logging.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidHost(self.host.clone()));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            db: 0,
            name: None,
            key_prefix: String::new(),
            connect_timeout_ms: None,
            command_timeout_ms: Some(DEFAULT_COMMAND_TIMEOUT_MS),
        }
    }
}

/// Optional factory overrides. `Some` replaces the base value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: Option<u32>,
    pub name: Option<String>,
    pub key_prefix: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub command_timeout_ms: Option<u64>,
}

/// Optional pool bounds. `None` keeps the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSizing {
    pub min: Option<usize>,
    pub max: Option<usize>,
    pub acquire_timeout_ms: Option<u64>,
}

/// Builder for a RESP connection pool.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    client: ClientConfig,
    sizing: PoolSizing,
    idle_timeout: Option<Duration>,
    validate_on_acquire: bool,
    shutdown_mode: ShutdownMode,
}

impl PoolOptions {
    fn with_client(client: ClientConfig) -> Result<Self, ConfigError> {
        client.validate()?;
        Ok(PoolOptions {
            client,
            sizing: PoolSizing::default(),
            idle_timeout: None,
            validate_on_acquire: true,
            shutdown_mode: ShutdownMode::default(),
        })
    }

    pub fn from_host_and_port(host: impl Into<String>, port: u16) -> Result<Self, ConfigError> {
        Self::with_client(ClientConfig {
            host: host.into(),
            port,
            ..ClientConfig::default()
        })
    }

    /// Parses `redis://[[username]:password@]host[:port][/db]`.
    pub fn from_url(url: &str) -> Result<Self, ConfigError> {
        let parsed = Url::parse(url).map_err(|err| ConfigError::InvalidUrl(err.to_string()))?;
        if parsed.scheme() != "redis" {
            return Err(ConfigError::UnsupportedScheme(parsed.scheme().to_string()));
        }

        let host = match parsed.host_str() {
            Some(host) if !host.is_empty() => host.trim_matches(|c| c == '[' || c == ']'),
            _ => return Err(ConfigError::InvalidHost(String::new())),
        };
        let username = Some(parsed.username())
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        let password = parsed.password().map(str::to_string);

        let path = parsed.path().trim_start_matches('/');
        let db = if path.is_empty() {
            0
        } else {
            path.parse::<u32>()
                .map_err(|_| ConfigError::InvalidDatabase(path.to_string()))?
        };

        Self::with_client(ClientConfig {
            host: host.to_string(),
            port: parsed.port().unwrap_or(DEFAULT_PORT),
            username,
            password,
            db,
            ..ClientConfig::default()
        })
    }

    pub fn with_client_options(mut self, options: ClientOptions) -> Self {
        let client = &mut self.client;
        if let Some(username) = options.username {
            client.username = Some(username);
        }
        if let Some(password) = options.password {
            client.password = Some(password);
        }
        if let Some(db) = options.db {
            client.db = db;
        }
        if let Some(name) = options.name {
            client.name = Some(name);
        }
        if let Some(prefix) = options.key_prefix {
            client.key_prefix = prefix;
        }
        if let Some(ms) = options.connect_timeout_ms {
            client.connect_timeout_ms = Some(ms);
        }
        if let Some(ms) = options.command_timeout_ms {
            client.command_timeout_ms = Some(ms);
        }
        self
    }

    pub fn with_pool_options(mut self, sizing: PoolSizing) -> Self {
        if sizing.min.is_some() {
            self.sizing.min = sizing.min;
        }
        if sizing.max.is_some() {
            self.sizing.max = sizing.max;
        }
        if sizing.acquire_timeout_ms.is_some() {
            self.sizing.acquire_timeout_ms = sizing.acquire_timeout_ms;
        }
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_validate_on_acquire(mut self, validate: bool) -> Self {
        self.validate_on_acquire = validate;
        self
    }

    pub fn with_shutdown_mode(mut self, mode: ShutdownMode) -> Self {
        self.shutdown_mode = mode;
        self
    }

    pub fn client_config(&self) -> &ClientConfig {
        &self.client
    }

    /// Validates and splits into factory and pool configuration.
    pub fn build(&self) -> Result<(ClientConfig, PoolConfig), ConfigError> {
        self.client.validate()?;

        let min = self.sizing.min.unwrap_or(0);
        let max = self.sizing.max.unwrap_or(DEFAULT_MAX_SIZE.max(min));
        let mut pool = PoolConfig::new(min, max)?
            .with_idle_timeout(self.idle_timeout)
            .with_validate_on_acquire(self.validate_on_acquire)
            .with_shutdown_mode(self.shutdown_mode);
        if let Some(ms) = self.sizing.acquire_timeout_ms {
            pool = pool.with_acquire_timeout(Duration::from_millis(ms));
        }

        Ok((self.client.clone(), pool))
    }

    /// Builds the configuration and opens a warmed-up pool.
    pub async fn connect(&self) -> PoolResult<KvPool> {
        let (client, pool) = self.build()?;
        Pool::new(pool, RespConnectionManager::new(client)).await
    }
}
