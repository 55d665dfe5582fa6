//! Pool sizing, timeout and shutdown configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_MAX_SIZE: usize = 10;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;

/// How `end()` treats connections that are still borrowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Wait for borrowers to release, optionally bounded.
    Graceful { timeout_ms: Option<u64> },
    /// Forget borrowed members immediately.
    Force,
}

impl ShutdownMode {
    /// Drain bound for graceful shutdown, if any.
    pub fn drain_timeout(&self) -> Option<Duration> {
        match self {
            ShutdownMode::Graceful { timeout_ms } => timeout_ms.map(Duration::from_millis),
            ShutdownMode::Force => None,
        }
    }
}

impl Default for ShutdownMode {
    fn default() -> Self {
        ShutdownMode::Graceful { timeout_ms: None }
    }
}

/// Immutable pool configuration.
///
/// Durations are stored as milliseconds so the struct can be loaded from any
/// serde format. Deserialized values are checked again by `Pool::new`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections kept alive even when idle.
    min_size: usize,
    /// Hard cap on idle + borrowed + in-flight creations.
    max_size: usize,
    /// Default wait bound for `get_connection`.
    acquire_timeout_ms: u64,
    /// Idle members older than this are evicted down to `min_size`.
    idle_timeout_ms: Option<u64>,
    /// Ping idle connections before handing them out.
    validate_on_acquire: bool,
    shutdown_mode: ShutdownMode,
}

impl PoolConfig {
    /// Creates a configuration with the given bounds.
    pub fn new(min_size: usize, max_size: usize) -> Result<Self, ConfigError> {
        let config = PoolConfig {
            min_size,
            max_size,
            ..PoolConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks `min_size <= max_size` and `max_size > 0`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::ZeroMaxSize);
        }
        if self.min_size > self.max_size {
            return Err(ConfigError::MinExceedsMax {
                min: self.min_size,
                max: self.max_size,
            });
        }
        Ok(())
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = duration_to_ms(timeout);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout_ms = timeout.map(duration_to_ms);
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

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate_on_acquire(&self) -> bool {
        self.validate_on_acquire
    }

    pub fn shutdown_mode(&self) -> ShutdownMode {
        self.shutdown_mode
    }
}

impl Default for PoolConfig {
    /// Defaults: min 0, max 10, 30s acquire timeout, no eviction, validation on.
    fn default() -> Self {
        PoolConfig {
            min_size: 0,
            max_size: DEFAULT_MAX_SIZE,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            idle_timeout_ms: None,
            validate_on_acquire: true,
            shutdown_mode: ShutdownMode::default(),
        }
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
