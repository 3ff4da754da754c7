//! # Connection Pool
//!
//! Purpose: Reuse Redis connections across task-queue callers so dial and
//! handshake latency is paid once per connection, not once per command.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: A bounded set of reusable connections.
//! 2. **Minimal Locking**: The mutex only guards bookkeeping; dialing and
//!    probing run with it released.
//! 3. **Blocking or Fail Fast**: At capacity, `acquire` either waits on a
//!    condvar or returns `PoolExhausted`, per `PoolOptions::wait`.
//! 4. **Lazy Reaping**: Expired idle connections are pruned on acquire; there
//!    is no background thread.
//!
//! ## Notes
//! - `open` counts idle and checked-out connections together. `max_active`
//!   bounds that total, so the checked-out count can never exceed it either.
//! - The idle deque is most-recently-released first; pruning and overflow
//!   trim from the back (oldest).

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tq_common::RedisConfig;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::dial::{dial, DialOptions};
use crate::error::{RedisError, RedisResult};
use crate::resp::{Command, Reply};

/// Idle time after which a connection is pinged before reuse.
pub const PING_AFTER_IDLE: Duration = Duration::from_secs(10);

/// Time source for idle bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by `Instant::now`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Pool bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// Maximum idle connections kept.
    pub max_idle: usize,
    /// Maximum open connections (idle + in use). 0 = unbounded.
    pub max_active: usize,
    /// Block instead of failing when `max_active` is reached.
    pub wait: bool,
    /// Idle connections older than this are closed. `None` = never.
    pub idle_timeout: Option<Duration>,
}

impl From<&RedisConfig> for PoolOptions {
    fn from(config: &RedisConfig) -> Self {
        PoolOptions {
            max_idle: config.max_idle,
            max_active: config.max_active,
            wait: config.wait,
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Idle plus checked-out connections.
    pub open: usize,
    pub idle: usize,
    /// Checked-out connections.
    pub active: usize,
    /// Acquires that had to block for capacity.
    pub wait_count: u64,
    /// Total time spent blocked in those acquires.
    pub wait_duration: Duration,
}

struct IdleConnection {
    conn: Connection,
    since: Instant,
}

struct PoolState {
    idle: VecDeque<IdleConnection>,
    open: usize,
    closed: bool,
    wait_count: u64,
    wait_duration: Duration,
}

impl PoolState {
    /// Pops idle connections past `idle_timeout`, oldest first.
    fn take_expired(&mut self, now: Instant, idle_timeout: Option<Duration>) -> Vec<Connection> {
        let mut expired = Vec::new();
        let Some(timeout) = idle_timeout else {
            return expired;
        };
        while let Some(oldest) = self.idle.back() {
            // Expire only once idle strictly longer than the timeout.
            if now.saturating_duration_since(oldest.since) <= timeout {
                break;
            }
            if let Some(entry) = self.idle.pop_back() {
                expired.push(entry.conn);
                self.open -= 1;
            }
        }
        expired
    }
}

struct PoolInner {
    options: PoolOptions,
    dial_options: DialOptions,
    clock: Arc<dyn Clock>,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PoolInner {
    // Bookkeeping stays consistent across a panicking borrower, so a
    // poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_slot(&self) {
        let mut state = self.lock();
        state.open = state.open.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }

    fn return_connection(&self, conn: Connection) {
        let now = self.clock.now();
        let mut state = self.lock();
        if state.closed {
            state.open = state.open.saturating_sub(1);
            drop(state);
            drop(conn);
            self.available.notify_one();
            return;
        }

        state.idle.push_front(IdleConnection { conn, since: now });
        let overflow = if state.idle.len() > self.options.max_idle {
            state.open -= 1;
            state.idle.pop_back()
        } else {
            None
        };
        drop(state);
        drop(overflow);
        self.available.notify_one();
    }
}

/// Shared, thread-safe connection pool.
///
/// Cloning is cheap and every clone refers to the same pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

enum Next {
    Reuse(IdleConnection),
    Dial,
}

impl Pool {
    /// Creates a pool. No connection is opened until the first `acquire`.
    pub fn new(options: PoolOptions, dial_options: DialOptions) -> Self {
        Self::with_clock(options, dial_options, Arc::new(SystemClock))
    }

    /// Creates a pool that reads time from `clock`.
    pub fn with_clock(options: PoolOptions, dial_options: DialOptions, clock: Arc<dyn Clock>) -> Self {
        let state = PoolState {
            idle: VecDeque::with_capacity(options.max_idle),
            open: 0,
            closed: false,
            wait_count: 0,
            wait_duration: Duration::ZERO,
        };
        Pool {
            inner: Arc::new(PoolInner {
                options,
                dial_options,
                clock,
                state: Mutex::new(state),
                available: Condvar::new(),
            }),
        }
    }

    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }

    pub fn dial_options(&self) -> &DialOptions {
        &self.inner.dial_options
    }

    /// Borrows a connection.
    ///
    /// Reuses the most recently released idle connection when one is left
    /// after pruning expired ones. A connection idle for at least
    /// `PING_AFTER_IDLE` is pinged first and dropped if the ping fails. With
    /// nothing reusable, a new connection is dialed if `max_active` allows it.
    /// Otherwise the call blocks (`wait = true`) or fails with
    /// `PoolExhausted`.
    pub fn acquire(&self) -> RedisResult<PooledConnection> {
        loop {
            match self.next_candidate()? {
                Next::Reuse(mut idle) => {
                    let idle_for = self.inner.clock.now().saturating_duration_since(idle.since);
                    if idle_for < PING_AFTER_IDLE {
                        return Ok(PooledConnection::new(self.inner.clone(), idle.conn));
                    }
                    match idle.conn.ping() {
                        Ok(()) => return Ok(PooledConnection::new(self.inner.clone(), idle.conn)),
                        Err(err) => {
                            debug!(error = %err, idle_secs = idle_for.as_secs(), "discarding idle redis connection");
                            drop(idle);
                            self.inner.release_slot();
                        }
                    }
                }
                Next::Dial => {
                    return match dial(&self.inner.dial_options) {
                        Ok(conn) => Ok(PooledConnection::new(self.inner.clone(), conn)),
                        Err(err) => {
                            self.inner.release_slot();
                            Err(err)
                        }
                    };
                }
            }
        }
    }

    /// Takes an idle connection or reserves a dial slot, waiting if allowed.
    fn next_candidate(&self) -> RedisResult<Next> {
        let inner = &self.inner;
        let mut state = inner.lock();
        let mut wait_started: Option<Instant> = None;

        loop {
            if state.closed {
                return Err(RedisError::PoolClosed);
            }

            let expired = state.take_expired(inner.clock.now(), inner.options.idle_timeout);
            if !expired.is_empty() {
                debug!(count = expired.len(), "closing expired idle redis connections");
                // Freed slots may unblock other waiters.
                inner.available.notify_all();
            }

            let next = if let Some(idle) = state.idle.pop_front() {
                Some(Next::Reuse(idle))
            } else if inner.options.max_active == 0 || state.open < inner.options.max_active {
                state.open += 1;
                Some(Next::Dial)
            } else {
                None
            };

            if let Some(next) = next {
                if let Some(started) = wait_started {
                    state.wait_count += 1;
                    state.wait_duration += started.elapsed();
                }
                drop(state);
                drop(expired);
                return Ok(next);
            }

            if !inner.options.wait {
                drop(state);
                drop(expired);
                return Err(RedisError::PoolExhausted);
            }

            wait_started.get_or_insert_with(Instant::now);
            drop(expired);
            state = inner
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Closes the pool.
    ///
    /// Idle connections are dropped now; checked-out ones are dropped when
    /// released. Blocked and future `acquire` calls fail with `PoolClosed`.
    pub fn close(&self) {
        let mut state = self.inner.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let idle: Vec<IdleConnection> = state.idle.drain(..).collect();
        state.open -= idle.len();
        drop(state);

        debug!(idle = idle.len(), "closing redis pool");
        drop(idle);
        self.inner.available.notify_all();
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            open: state.open,
            idle: state.idle.len(),
            active: state.open - state.idle.len(),
            wait_count: state.wait_count,
            wait_duration: state.wait_duration,
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("options", &self.inner.options)
            .field("dial_options", &self.inner.dial_options)
            .field("stats", &self.stats())
            .finish()
    }
}

/// RAII guard returning the connection to the pool on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    broken: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            broken: false,
        }
    }

    /// Sends a command and returns the raw reply, including error replies.
    pub fn send(&mut self, command: &Command) -> RedisResult<Reply> {
        let result = self.connection()?.send(command);
        self.track(result)
    }

    /// Sends a command, turning an error reply into `RedisError::Server`.
    pub fn query(&mut self, command: &Command) -> RedisResult<Reply> {
        let result = self.connection()?.query(command);
        self.track(result)
    }

    pub fn ping(&mut self) -> RedisResult<()> {
        let result = self.connection()?.ping();
        // A failed ping says nothing good about the socket.
        if result.is_err() {
            self.broken = true;
        }
        result
    }

    /// Returns the connection to the pool. Same as dropping the guard.
    pub fn release(self) {
        drop(self);
    }

    /// Closes the connection instead of returning it to the pool.
    pub fn discard(mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    fn connection(&mut self) -> RedisResult<&mut Connection> {
        if self.broken {
            return Err(RedisError::Protocol("connection is broken".into()));
        }
        self.conn
            .as_mut()
            .ok_or_else(|| RedisError::Protocol("connection already released".into()))
    }

    // IO or framing errors leave the stream in an unknown state.
    fn track(&mut self, result: RedisResult<Reply>) -> RedisResult<Reply> {
        if let Err(err) = &result {
            if err.is_fatal() {
                warn!(error = %err, "redis connection broken; it will not be reused");
                self.broken = true;
            }
        }
        result
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        if self.broken {
            drop(conn);
            self.pool.release_slot();
        } else {
            self.pool.return_connection(conn);
        }
    }
}
