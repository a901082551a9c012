//! # Synchronous Client API
//!
//! Purpose: Expose a compact, blocking API for issuing commands over a pooled
//! set of connections.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides pooling and protocol details.
//! 2. **Lazy Pool**: Nothing connects until the first command; the pool is
//!    built exactly once per client.
//! 3. **Table-Driven Commands**: Typed wrappers go through `call`, which takes
//!    arity, encoding and reply shape from the command table.

use std::sync::OnceLock;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::command::{lookup, Arg, Encoding};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::pool::{ConnectionPool, PooledConnection};
use crate::resp::Reply;
use crate::subscribe::{listen, CancelToken};

/// TTL state returned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTtl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

/// Synchronous client with connection pooling.
///
/// Each call borrows a connection, executes one command, reads one reply, and
/// returns the connection to the pool.
pub struct Client {
    config: ClientConfig,
    pool: OnceLock<ConnectionPool>,
    init: Mutex<()>,
}

impl Client {
    /// Creates a client for `host:port` with default settings.
    pub fn connect(host: impl Into<String>, port: u16) -> ClientResult<Self> {
        Self::with_config(ClientConfig::new(host, port))
    }

    /// Creates a client with a custom configuration. Does not connect.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        Ok(Client {
            config,
            pool: OnceLock::new(),
            init: Mutex::new(()),
        })
    }

    /// Wraps an existing pool, e.g. one handed out by a `PoolRegistry`.
    pub fn from_pool(pool: ConnectionPool) -> Self {
        let config = ClientConfig {
            server: pool.server().clone(),
            ..Default::default()
        };
        let cell = OnceLock::new();
        let _ = cell.set(pool);
        Client {
            config,
            pool: cell,
            init: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the pool, creating it on first use.
    pub fn pool(&self) -> ClientResult<&ConnectionPool> {
        if let Some(pool) = self.pool.get() {
            return Ok(pool);
        }

        let _guard = self.init.lock();
        if let Some(pool) = self.pool.get() {
            return Ok(pool);
        }
        let pool = ConnectionPool::new(self.config.server.clone(), self.config.pool.clone())?;
        Ok(self.pool.get_or_init(|| pool))
    }

    /// Sends one command with an explicit encoding and returns its reply.
    pub fn execute(&self, name: &str, args: &[Arg], encoding: Encoding) -> ClientResult<Reply> {
        self.with_pooled_connection(|conn| conn.execute(name, args, encoding))
    }

    /// Runs a command from the command table.
    ///
    /// Arity is checked before anything is sent, and the reply must have the
    /// shape the table declares.
    pub fn call(&self, name: &str, args: &[Arg]) -> ClientResult<Reply> {
        let spec = lookup(name)
            .ok_or_else(|| ClientError::InvalidArgument(format!("unknown command {}", name)))?;
        if !spec.arity.accepts(args.len()) {
            return Err(ClientError::InvalidArgument(format!(
                "wrong number of arguments for {}: {}",
                spec.name,
                args.len()
            )));
        }

        let reply = self.execute(spec.name, args, spec.encoding)?;
        if spec.reply.matches(&reply) {
            Ok(reply)
        } else {
            Err(ClientError::UnexpectedResponse)
        }
    }

    /// Borrows a connection for the duration of `body`.
    ///
    /// The connection goes back to the pool on every exit path; a fatal error
    /// or panic destroys it instead.
    pub fn with_pooled_connection<T>(
        &self,
        body: impl FnOnce(&mut PooledConnection) -> ClientResult<T>,
    ) -> ClientResult<T> {
        self.pool()?.with_connection(body)
    }

    /// Listens on `channel` until `cancel` fires, calling `on_message(key,
    /// value)` for every push.
    ///
    /// Holds one pooled connection for the whole call and destroys it after
    /// unsubscribing.
    pub fn subscribe<F>(&self, channel: &str, cancel: &CancelToken, on_message: F) -> ClientResult<()>
    where
        F: FnMut(&[u8], &[u8]),
    {
        let mut conn = self.pool()?.acquire()?;
        let result = listen(conn.connection(), channel, cancel, on_message);
        conn.invalidate();
        result
    }

    /// Shuts the pool down if it was ever created.
    pub fn shutdown(&self) {
        if let Some(pool) = self.pool.get() {
            pool.shutdown();
        }
    }

    /// Pings the server. Returns the status line.
    pub fn ping(&self) -> ClientResult<Bytes> {
        match self.call("PING", &[])? {
            Reply::Simple(text) => Ok(text),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub fn echo(&self, message: impl Into<Arg>) -> ClientResult<Bytes> {
        into_bulk(self.call("ECHO", &[message.into()])?)?.ok_or(ClientError::UnexpectedResponse)
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub fn get(&self, key: &str) -> ClientResult<Option<Bytes>> {
        into_bulk(self.call("GET", &[key.into()])?)
    }

    /// Sets a value for a key without expiration.
    pub fn set(&self, key: &str, value: impl Into<Arg>) -> ClientResult<()> {
        self.call("SET", &[key.into(), value.into()]).map(|_| ())
    }

    /// Deletes keys. Returns how many were removed.
    pub fn del(&self, keys: &[&str]) -> ClientResult<i64> {
        let args: Vec<Arg> = keys.iter().map(|&key| key.into()).collect();
        into_integer(self.call("DEL", &args)?)
    }

    pub fn exists(&self, key: &str) -> ClientResult<bool> {
        into_integer(self.call("EXISTS", &[key.into()])?).map(|n| n == 1)
    }

    pub fn incr(&self, key: &str) -> ClientResult<i64> {
        into_integer(self.call("INCR", &[key.into()])?)
    }

    pub fn incr_by(&self, key: &str, delta: i64) -> ClientResult<i64> {
        into_integer(self.call("INCRBY", &[key.into(), delta.into()])?)
    }

    /// Sets a time-to-live on a key. Returns true when the TTL was set.
    pub fn expire(&self, key: &str, ttl: Duration) -> ClientResult<bool> {
        let seconds = i64::try_from(ttl.as_secs())
            .map_err(|_| ClientError::InvalidArgument("ttl out of range".to_string()))?;
        into_integer(self.call("EXPIRE", &[key.into(), seconds.into()])?).map(|n| n == 1)
    }

    /// Returns TTL status for a key.
    pub fn ttl(&self, key: &str) -> ClientResult<ClientTtl> {
        match into_integer(self.call("TTL", &[key.into()])?)? {
            -2 => Ok(ClientTtl::Missing),
            -1 => Ok(ClientTtl::NoExpiry),
            value if value >= 0 => Ok(ClientTtl::ExpiresIn(Duration::from_secs(value as u64))),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Publishes a message. Returns the number of receivers.
    pub fn publish(&self, channel: &str, message: impl Into<Arg>) -> ClientResult<i64> {
        into_integer(self.call("PUBLISH", &[channel.into(), message.into()])?)
    }

    pub fn keys(&self, pattern: &str) -> ClientResult<Vec<Bytes>> {
        match self.call("KEYS", &[pattern.into()])? {
            Reply::Array(items) => items
                .into_iter()
                .map(|item| into_bulk(item)?.ok_or(ClientError::UnexpectedResponse))
                .collect(),
            _ => Ok(Vec::new()),
        }
    }

    /// Fetches server INFO output.
    pub fn info(&self) -> ClientResult<Bytes> {
        into_bulk(self.call("INFO", &[])?)?.ok_or(ClientError::UnexpectedResponse)
    }

    pub fn flush_db(&self) -> ClientResult<()> {
        self.call("FLUSHDB", &[]).map(|_| ())
    }
}

fn into_bulk(reply: Reply) -> ClientResult<Option<Bytes>> {
    match reply {
        Reply::Bulk(data) => Ok(Some(data)),
        Reply::Nil => Ok(None),
        _ => Err(ClientError::UnexpectedResponse),
    }
}

fn into_integer(reply: Reply) -> ClientResult<i64> {
    reply.as_integer().ok_or(ClientError::UnexpectedResponse)
}
