//! # Pool Factory
//!
//! Purpose: The single entry point the broker and result backend use to get a
//! Redis pool from their raw settings.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `RedisConnector` hides how settings split into pool
//!    bounds and dial options.
//! 2. **No Shared Defaults**: A missing config becomes a fresh
//!    `RedisConfig::default()`; nothing global is read or written.

use tq_common::RedisConfig;

use crate::dial::{DialOptions, TlsConfig};
use crate::pool::{Pool, PoolOptions};

/// Builds connection pools for the task queue.
#[derive(Debug, Default, Clone, Copy)]
pub struct RedisConnector;

impl RedisConnector {
    pub fn new() -> Self {
        RedisConnector
    }

    /// Returns a pool for one Redis target. Nothing is dialed yet.
    ///
    /// - `socket_path` wins over `host` when both are non-empty.
    /// - An empty `password` skips `AUTH`; `db == 0` skips `SELECT`.
    /// - `config = None` applies `RedisConfig::default()`.
    /// - `tls = None` keeps the transport in plaintext.
    ///
    /// With neither a socket path nor a host, every acquire fails with
    /// `RedisError::NoTarget`.
    pub fn new_pool(
        &self,
        socket_path: &str,
        host: &str,
        password: &str,
        db: u32,
        config: Option<&RedisConfig>,
        tls: Option<TlsConfig>,
    ) -> Pool {
        let default_config;
        let config = match config {
            Some(config) => config,
            None => {
                default_config = RedisConfig::default();
                &default_config
            }
        };

        let dial_options = Self::dial_options(socket_path, host, password, db, config, tls);
        Pool::new(PoolOptions::from(config), dial_options)
    }

    /// The per-connection half of `new_pool`.
    pub fn dial_options(
        socket_path: &str,
        host: &str,
        password: &str,
        db: u32,
        config: &RedisConfig,
        tls: Option<TlsConfig>,
    ) -> DialOptions {
        DialOptions::from_parts(socket_path, host)
            .with_password(password)
            .with_database(db)
            .with_connect_timeout(config.connect_timeout())
            .with_read_timeout(config.read_timeout())
            .with_write_timeout(config.write_timeout())
            .with_tls(tls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dial::Target;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn missing_config_applies_defaults() {
        let pool = RedisConnector::new().new_pool("", "127.0.0.1:6379", "", 0, None, None);

        let options = pool.options();
        assert_eq!(options.max_idle, 3);
        assert_eq!(options.max_active, 0);
        assert!(!options.wait);
        assert_eq!(options.idle_timeout, Some(Duration::from_secs(240)));

        let dial = pool.dial_options();
        assert_eq!(dial.connect_timeout, Some(Duration::from_secs(15)));
        assert_eq!(dial.read_timeout, Some(Duration::from_secs(15)));
        assert_eq!(dial.write_timeout, Some(Duration::from_secs(15)));
        assert_eq!(dial.password, None);
        assert_eq!(dial.database, 0);
        assert!(dial.tls.is_none());

        assert_eq!(pool.stats().open, 0);
    }

    #[test]
    fn supplied_config_is_used_as_is() {
        let config = RedisConfig {
            max_idle: 7,
            max_active: 20,
            wait: true,
            idle_timeout_secs: 0,
            read_timeout_secs: 2,
            ..RedisConfig::default()
        };
        let pool = RedisConnector::new().new_pool("", "redis:6379", "pw", 4, Some(&config), None);

        assert_eq!(
            pool.options(),
            &PoolOptions {
                max_idle: 7,
                max_active: 20,
                wait: true,
                idle_timeout: None,
            }
        );
        let dial = pool.dial_options();
        assert_eq!(dial.read_timeout, Some(Duration::from_secs(2)));
        assert_eq!(dial.password.as_deref(), Some("pw"));
        assert_eq!(dial.database, 4);
    }

    #[test]
    fn socket_path_wins_over_host() {
        let pool = RedisConnector::new().new_pool("/tmp/redis.sock", "127.0.0.1:6379", "", 0, None, None);
        assert_eq!(
            pool.dial_options().target,
            Some(Target::Unix(PathBuf::from("/tmp/redis.sock")))
        );
    }
}
