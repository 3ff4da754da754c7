//! # Task Queue Redis Transport
//!
//! Purpose: Hand the broker and result backend pooled, ready-to-use Redis
//! connections so no caller pays the dial and handshake cost per command.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse connections behind a bounded pool.
//! 2. **Lazy Dialing**: Nothing touches the network until the first acquire.
//! 3. **Test-on-Borrow**: Connections idle for a while are pinged before reuse.
//! 4. **Explicit Options**: One `DialOptions` value describes every dial.

mod connection;
mod connector;
mod dial;
mod error;
mod pool;
mod resp;

pub use connection::Connection;
pub use connector::RedisConnector;
pub use dial::{dial, DialOptions, Target, TlsConfig};
pub use error::{RedisError, RedisResult};
pub use pool::{Clock, Pool, PoolOptions, PoolStats, PooledConnection, SystemClock, PING_AFTER_IDLE};
pub use resp::{read_reply, Command, Reply, ToArg};
