//! # Client Configuration
//!
//! Purpose: Describe which server to talk to and how the pool behaves, with
//! defaults that work against a local server out of the box.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Session parameters for one server. Two equal values name the same pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Sent with AUTH after connecting.
    pub password: Option<String>,
    /// Database index selected after connecting.
    pub database: u32,
    /// Connect, read and write timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            database: 0,
            timeout_ms: 5_000,
        }
    }
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ServerConfig {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Pool sizing and validation policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Period of the idle validation sweep; 0 disables the sweep.
    pub eviction_interval_ms: u64,
    /// Probe idle connections before handing them out.
    pub test_on_borrow: bool,
    /// Probe idle connections from the background sweep.
    pub test_while_idle: bool,
    /// How long a borrow may wait on an exhausted pool; `None` waits forever.
    pub borrow_timeout_ms: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_total: 330,
            eviction_interval_ms: 30_000,
            test_on_borrow: true,
            test_while_idle: true,
            borrow_timeout_ms: None,
        }
    }
}

impl PoolConfig {
    pub fn eviction_interval(&self) -> Option<Duration> {
        match self.eviction_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn borrow_timeout(&self) -> Option<Duration> {
        self.borrow_timeout_ms.map(Duration::from_millis)
    }
}

/// Configuration for the client and its pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    #[serde(flatten)]
    pub server: ServerConfig,
    #[serde(flatten)]
    pub pool: PoolConfig,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ClientConfig {
            server: ServerConfig::new(host, port),
            pool: PoolConfig::default(),
        }
    }

    /// Loads configuration from `RKV_*` environment variables on top of the
    /// defaults.
    pub fn from_env() -> ClientResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ClientResult<Self> {
        let mut config = ClientConfig::default();

        if let Some(host) = lookup("RKV_HOST") {
            config.server.host = host;
        }
        if let Some(port) = lookup("RKV_PORT") {
            config.server.port = parse_var("RKV_PORT", &port)?;
        }
        if let Some(password) = lookup("RKV_PASSWORD") {
            config.server.password = Some(password);
        }
        if let Some(db) = lookup("RKV_DATABASE") {
            config.server.database = parse_var("RKV_DATABASE", &db)?;
        }
        if let Some(timeout) = lookup("RKV_TIMEOUT_MS") {
            config.server.timeout_ms = parse_var("RKV_TIMEOUT_MS", &timeout)?;
        }
        if let Some(size) = lookup("RKV_MAX_POOL_SIZE") {
            config.pool.max_total = parse_var("RKV_MAX_POOL_SIZE", &size)?;
        }
        if let Some(interval) = lookup("RKV_EVICTION_INTERVAL_MS") {
            config.pool.eviction_interval_ms = parse_var("RKV_EVICTION_INTERVAL_MS", &interval)?;
        }
        if let Some(timeout) = lookup("RKV_BORROW_TIMEOUT_MS") {
            config.pool.borrow_timeout_ms = Some(parse_var("RKV_BORROW_TIMEOUT_MS", &timeout)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.server.host.trim().is_empty() {
            return Err(ClientError::Config("host must not be empty".to_string()));
        }
        if self.pool.max_total == 0 {
            return Err(ClientError::Config("max_total must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> ClientResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ClientError::Config(format!("{} has an invalid value: {:?}", name, value)))
}
