//! Error type shared by dialing, the pool and command execution.

use std::io;

/// Result type for the Redis transport.
pub type RedisResult<T> = Result<T, RedisError>;

/// Errors surfaced by the Redis transport.
#[derive(Debug, thiserror::Error)]
pub enum RedisError {
    /// Neither a socket path nor a host was configured.
    #[error("no redis target configured")]
    NoTarget,

    /// Network-level dial failure: resolution, refusal or timeout.
    #[error("failed to connect to {target}: {source}")]
    TargetUnreachable {
        target: String,
        #[source]
        source: io::Error,
    },

    /// The server rejected `AUTH`.
    #[error("authentication rejected: {message}")]
    AuthRejected { message: String },

    /// The server rejected `SELECT`.
    #[error("selecting database {database} rejected: {message}")]
    DatabaseSelectionRejected { database: u32, message: String },

    /// TLS could not be negotiated.
    #[error("tls negotiation with {domain} failed: {message}")]
    EncryptionNegotiationFailed { domain: String, message: String },

    /// The pool is at `max_active` and is configured not to wait.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// The pool was closed.
    #[error("connection pool closed")]
    PoolClosed,

    /// An idle connection failed its `PING`. Handled inside the pool.
    #[error("liveness check failed: {0}")]
    LivenessCheckFailed(String),

    /// Network or IO failure on an established connection.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// RESP2 framing or parse error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server returned an error reply.
    #[error("server error: {0}")]
    Server(String),

    /// Reply type did not match what the command returns.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl RedisError {
    /// Whether the connection that produced this error can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RedisError::Io(_) | RedisError::Protocol(_))
    }
}
