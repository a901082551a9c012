//! # Connection Pool
//!
//! Purpose: Reuse TCP connections across callers, proving each one alive
//! before it is reused and never letting two callers share one.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving connections in or
//!    out of the idle set; probes and connects run unlocked.
//! 3. **Block, Don't Fail**: An exhausted pool parks the caller until a
//!    connection comes back (or the optional borrow timeout expires).
//! 4. **Discard on Doubt**: A connection that failed mid-use or failed a probe
//!    is closed, never returned to idle.
//!
//! ## Lifecycle
//!
//! ```text
//! Created -> Active -> Idle -> Active -> ... -> Destroyed
//!                        \-> (sweep probe) -> Idle | Destroyed
//! ```
//!
//! `total` counts every connection the pool is responsible for: idle, checked
//! out, being created, or being probed by the sweep. It never exceeds
//! `max_total`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::command::{Arg, Encoding};
use crate::config::{ClientConfig, PoolConfig, ServerConfig};
use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};
use crate::resp::Reply;

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub active: usize,
    pub max_total: usize,
}

struct PoolState {
    // Most recently returned at the back; the sweep probes from the front.
    idle: VecDeque<Connection>,
    total: usize,
    in_sweep: usize,
    closed: bool,
}

struct PoolInner {
    server: ServerConfig,
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
    stop: Arc<StopSignal>,
    evictor: Mutex<Option<JoinHandle<()>>>,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

enum Checkout {
    Idle(Connection),
    Create,
}

impl ConnectionPool {
    /// Creates an empty pool. Connections are opened on demand.
    ///
    /// Starts the idle sweep thread when `test_while_idle` is set and the
    /// eviction interval is non-zero.
    pub fn new(server: ServerConfig, config: PoolConfig) -> ClientResult<Self> {
        if config.max_total == 0 {
            return Err(ClientError::Config("max_total must be at least 1".to_string()));
        }

        let inner = Arc::new(PoolInner {
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                total: 0,
                in_sweep: 0,
                closed: false,
            }),
            available: Condvar::new(),
            stop: Arc::new(StopSignal::default()),
            evictor: Mutex::new(None),
            server,
            config,
        });

        if inner.config.test_while_idle {
            if let Some(interval) = inner.config.eviction_interval() {
                let handle = spawn_evictor(&inner, interval)?;
                *inner.evictor.lock() = Some(handle);
            }
        }

        info!(
            host = %inner.server.host,
            port = inner.server.port,
            max_total = inner.config.max_total,
            "connection pool created"
        );
        Ok(ConnectionPool { inner })
    }

    pub fn server(&self) -> &ServerConfig {
        &self.inner.server
    }

    /// Borrows a connection, blocking while the pool is exhausted.
    pub fn acquire(&self) -> ClientResult<PooledConnection> {
        let deadline = self.inner.config.borrow_timeout().map(|t| Instant::now() + t);

        loop {
            match self.checkout(deadline)? {
                Checkout::Idle(mut conn) => {
                    if self.inner.config.test_on_borrow && !conn.validate() {
                        warn!(peer = %conn.peer(), "idle connection failed validation on borrow");
                        self.inner.destroy(conn);
                        continue;
                    }
                    return Ok(PooledConnection::new(self.inner.clone(), conn));
                }
                Checkout::Create => match Connection::connect(&self.inner.server) {
                    Ok(conn) => return Ok(PooledConnection::new(self.inner.clone(), conn)),
                    Err(err) => {
                        self.inner.release_slot();
                        return Err(err);
                    }
                },
            }
        }
    }

    /// Runs `body` with a borrowed connection and always hands it back.
    ///
    /// A fatal error from `body` (or a panic) destroys the connection instead
    /// of returning it to idle.
    pub fn with_connection<T>(
        &self,
        body: impl FnOnce(&mut PooledConnection) -> ClientResult<T>,
    ) -> ClientResult<T> {
        let mut conn = self.acquire()?;
        let result = body(&mut conn);
        if let Err(err) = &result {
            if err.is_fatal() {
                conn.invalidate();
            }
        }
        result
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            idle: state.idle.len(),
            active: state.total - state.idle.len() - state.in_sweep,
            max_total: self.inner.config.max_total,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Probes every connection that is idle when the sweep starts and destroys
    /// the ones that fail. Returns the number destroyed.
    ///
    /// The background thread calls this on its interval; it is public so
    /// callers can force a sweep.
    pub fn evict_idle(&self) -> usize {
        self.inner.evict_idle()
    }

    /// Closes idle connections, wakes blocked borrowers with `PoolClosed`, and
    /// stops the sweep thread. Connections still checked out are closed when
    /// they come back.
    pub fn shutdown(&self) {
        let drained: Vec<Connection> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let drained: Vec<Connection> = state.idle.drain(..).collect();
            state.total -= drained.len();
            drained
        };
        self.inner.available.notify_all();

        for conn in drained {
            conn.close();
        }

        self.inner.stop.stop();
        let handle = self.inner.evictor.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }

        info!(
            host = %self.inner.server.host,
            port = self.inner.server.port,
            "connection pool shut down"
        );
    }

    fn checkout(&self, deadline: Option<Instant>) -> ClientResult<Checkout> {
        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return Err(ClientError::PoolClosed);
            }
            if let Some(conn) = state.idle.pop_back() {
                return Ok(Checkout::Idle(conn));
            }
            if state.total < self.inner.config.max_total {
                state.total += 1;
                return Ok(Checkout::Create);
            }

            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(ClientError::PoolTimeout);
                    }
                    self.inner.available.wait_until(&mut state, deadline);
                }
                None => self.inner.available.wait(&mut state),
            }
        }
    }
}

impl PoolInner {
    fn release_slot(&self) {
        let mut state = self.state.lock();
        state.total = state.total.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }

    fn destroy(&self, conn: Connection) {
        conn.close();
        self.release_slot();
    }

    fn return_connection(&self, conn: Connection) {
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            self.destroy(conn);
            return;
        }
        state.idle.push_back(conn);
        drop(state);
        self.available.notify_one();
    }

    fn evict_idle(&self) -> usize {
        let pending = self.state.lock().idle.len();
        let mut evicted = 0;

        for _ in 0..pending {
            let mut conn = {
                let mut state = self.state.lock();
                if state.closed {
                    break;
                }
                match state.idle.pop_front() {
                    Some(conn) => {
                        state.in_sweep += 1;
                        conn
                    }
                    None => break,
                }
            };

            let alive = conn.validate();

            let mut state = self.state.lock();
            state.in_sweep -= 1;
            if alive && !state.closed {
                state.idle.push_back(conn);
                drop(state);
                self.available.notify_one();
            } else {
                drop(state);
                if !alive {
                    warn!(peer = %conn.peer(), "idle connection failed validation");
                    evicted += 1;
                }
                self.destroy(conn);
            }
        }

        debug!(probed = pending, evicted, "idle sweep finished");
        evicted
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

/// Wakes the sweep thread early on shutdown.
#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }

    /// Sleeps for `period` unless stopped first. Returns true once stopped.
    fn sleep(&self, period: Duration) -> bool {
        let deadline = Instant::now() + period;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.wake.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

fn spawn_evictor(inner: &Arc<PoolInner>, interval: Duration) -> ClientResult<JoinHandle<()>> {
    let pool: Weak<PoolInner> = Arc::downgrade(inner);
    let stop = inner.stop.clone();

    let handle = thread::Builder::new()
        .name("rkv-pool-evictor".to_string())
        .spawn(move || loop {
            if stop.sleep(interval) {
                break;
            }
            let Some(inner) = pool.upgrade() else {
                break;
            };
            inner.evict_idle();
        })?;
    Ok(handle)
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// Executes a command and returns the parsed reply.
    pub fn execute(&mut self, name: &str, args: &[Arg], encoding: Encoding) -> ClientResult<Reply> {
        let response = self.connection().execute(name, args, encoding);
        if let Err(err) = &response {
            // If IO/protocol fails, do not return this connection to the pool.
            if err.is_fatal() {
                self.valid = false;
            }
        }
        response
    }

    /// Marks the connection so it is destroyed instead of returned.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn connection(&mut self) -> &mut Connection {
        self.conn
            .as_mut()
            .expect("connection is present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        // A panic may have left a reply half-read.
        if self.valid && !thread::panicking() {
            self.pool.return_connection(conn);
        } else {
            self.pool.destroy(conn);
        }
    }
}

/// One pool per distinct server configuration, created on first use.
#[derive(Default)]
pub struct PoolRegistry {
    pools: Mutex<HashMap<ServerConfig, ConnectionPool>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pool for `config.server`, creating it if needed.
    ///
    /// Pool settings only take effect on creation; later calls for the same
    /// server reuse the existing pool unchanged.
    pub fn get_or_create(&self, config: &ClientConfig) -> ClientResult<ConnectionPool> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(&config.server) {
            return Ok(pool.clone());
        }
        let pool = ConnectionPool::new(config.server.clone(), config.pool.clone())?;
        pools.insert(config.server.clone(), pool.clone());
        Ok(pool)
    }

    /// Borrows from the pool for `config.server`, runs `body`, and returns the
    /// connection on every exit path.
    pub fn with_pooled_connection<T>(
        &self,
        config: &ClientConfig,
        body: impl FnOnce(&mut PooledConnection) -> ClientResult<T>,
    ) -> ClientResult<T> {
        self.get_or_create(config)?.with_connection(body)
    }

    pub fn len(&self) -> usize {
        self.pools.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.lock().is_empty()
    }

    /// Shuts down and forgets every pool.
    pub fn shutdown_all(&self) {
        let pools: Vec<ConnectionPool> = self.pools.lock().drain().map(|(_, pool)| pool).collect();
        for pool in pools {
            pool.shutdown();
        }
    }
}
