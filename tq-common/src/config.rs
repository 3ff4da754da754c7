//! # Redis Pool Configuration
//!
//! Purpose: Describe how the task queue's Redis connection pool is bounded and
//! how long each connection may wait on the network.
//!
//! ## Design Principles
//! 1. **Immutable Defaults**: `RedisConfig::default()` is the single source of
//!    the documented defaults; nothing mutates shared state.
//! 2. **Config-File Friendly**: Plain integer fields with `#[serde(default)]`,
//!    so a host application can embed the struct and omit any key.
//! 3. **Zero Means Off**: A zero timeout or `max_active` disables that bound.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of idle connections kept per pool.
pub const DEFAULT_MAX_IDLE: usize = 3;
/// Default idle expiry, in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 240;
/// Default read, write and connect timeout, in seconds.
pub const DEFAULT_IO_TIMEOUT_SECS: u64 = 15;
/// Default poll period for delayed tasks, in milliseconds.
pub const DEFAULT_DELAYED_TASKS_POLL_PERIOD_MS: u64 = 20;
/// Default poll period for normal tasks, in milliseconds.
pub const DEFAULT_NORMAL_TASKS_POLL_PERIOD_MS: u64 = 15;

/// Connection pool policy for one Redis target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Maximum number of idle connections retained by the pool.
    pub max_idle: usize,
    /// Maximum number of open connections (idle + in use). 0 = unbounded.
    pub max_active: usize,
    /// Block in `acquire` when `max_active` is reached instead of failing.
    pub wait: bool,
    /// Close connections idle longer than this. 0 = never.
    pub idle_timeout_secs: u64,
    /// Socket read timeout. 0 = none.
    pub read_timeout_secs: u64,
    /// Socket write timeout. 0 = none.
    pub write_timeout_secs: u64,
    /// Dial timeout. 0 = none.
    pub connect_timeout_secs: u64,
    /// How often consumers poll for normal tasks. Not used by the pool.
    ///
    /// Consumers block on reads for up to this long, so it should stay below
    /// the read timeout.
    pub normal_tasks_poll_period_ms: u64,
    /// How often consumers poll for delayed tasks. Not used by the pool.
    pub delayed_tasks_poll_period_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            max_idle: DEFAULT_MAX_IDLE,
            max_active: 0,
            wait: false,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_IO_TIMEOUT_SECS,
            write_timeout_secs: DEFAULT_IO_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_IO_TIMEOUT_SECS,
            normal_tasks_poll_period_ms: DEFAULT_NORMAL_TASKS_POLL_PERIOD_MS,
            delayed_tasks_poll_period_ms: DEFAULT_DELAYED_TASKS_POLL_PERIOD_MS,
        }
    }
}

impl RedisConfig {
    /// Idle expiry, or `None` when idle connections never expire.
    pub fn idle_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.idle_timeout_secs)
    }

    /// Socket read timeout, or `None` for blocking reads.
    pub fn read_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.read_timeout_secs)
    }

    /// Socket write timeout, or `None` for blocking writes.
    pub fn write_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.write_timeout_secs)
    }

    /// Dial timeout, or `None` to wait for the OS.
    pub fn connect_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.connect_timeout_secs)
    }

    pub fn normal_tasks_poll_period(&self) -> Duration {
        Duration::from_millis(self.normal_tasks_poll_period_ms)
    }

    pub fn delayed_tasks_poll_period(&self) -> Duration {
        Duration::from_millis(self.delayed_tasks_poll_period_ms)
    }
}

// std sockets reject a zero timeout, so zero maps to "no timeout".
fn non_zero_secs(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}
