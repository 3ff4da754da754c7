//! # Dialing
//!
//! Purpose: Turn one `DialOptions` value into a connected, authenticated
//! `Connection` pointed at the right logical database.
//!
//! ## Design Principles
//! 1. **Explicit Options**: Every knob lives on `DialOptions`; there is no
//!    ordering between options.
//! 2. **All or Nothing**: Any failed step drops the socket; a half-set-up
//!    connection never escapes this module.
//! 3. **Socket Path Wins**: A non-empty Unix socket path overrides the host.
//!
//! Handshake order is fixed: transport, TLS, `AUTH`, `SELECT`.

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use native_tls::{Certificate, TlsConnector, TlsStream};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{RedisError, RedisResult};

/// Where a pool connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Local Unix domain socket.
    Unix(PathBuf),
    /// `host:port`, resolved on every dial.
    Tcp(String),
}

impl Target {
    /// Picks the transport from the two mutually exclusive descriptors.
    ///
    /// A non-empty `socket_path` takes priority over `host`. Returns `None`
    /// when both are empty.
    pub fn from_parts(socket_path: &str, host: &str) -> Option<Target> {
        if !socket_path.is_empty() {
            Some(Target::Unix(PathBuf::from(socket_path)))
        } else if !host.is_empty() {
            Some(Target::Tcp(host.to_string()))
        } else {
            None
        }
    }

    /// Host part used as the TLS server name when none is configured.
    fn default_domain(&self) -> &str {
        match self {
            Target::Unix(_) => "localhost",
            Target::Tcp(addr) => host_part(addr),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Unix(path) => write!(f, "unix:{}", path.display()),
            Target::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

// "[::1]:6379" -> "::1", "redis.local:6379" -> "redis.local".
fn host_part(addr: &str) -> &str {
    let host = match addr.rsplit_once(':') {
        Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

/// TLS settings for encrypted connections.
#[derive(Clone)]
pub struct TlsConfig {
    connector: TlsConnector,
    server_name: Option<String>,
}

impl TlsConfig {
    /// Wraps a prepared connector.
    pub fn new(connector: TlsConnector) -> Self {
        TlsConfig {
            connector,
            server_name: None,
        }
    }

    /// Builds a connector that also trusts the PEM CA certificate at `path`.
    pub fn from_ca_pem(path: impl AsRef<Path>) -> RedisResult<Self> {
        let path = path.as_ref();
        let pem = fs::read(path)?;
        let cert = Certificate::from_pem(&pem).map_err(|err| tls_error(path.display(), err))?;
        let connector = TlsConnector::builder()
            .add_root_certificate(cert)
            .build()
            .map_err(|err| tls_error(path.display(), err))?;
        Ok(TlsConfig::new(connector))
    }

    /// Overrides the name checked against the server certificate.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

fn tls_error(domain: impl fmt::Display, err: impl fmt::Display) -> RedisError {
    RedisError::EncryptionNegotiationFailed {
        domain: domain.to_string(),
        message: err.to_string(),
    }
}

/// Everything needed to open one connection.
#[derive(Clone)]
pub struct DialOptions {
    /// `None` when neither a socket path nor a host was given.
    pub target: Option<Target>,
    /// Sent with `AUTH` when set.
    pub password: Option<String>,
    /// Sent with `SELECT` when non-zero.
    pub database: u32,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    /// Wraps the transport in TLS when set.
    pub tls: Option<TlsConfig>,
}

impl DialOptions {
    /// Plaintext, unauthenticated, database 0, no timeouts.
    pub fn new(target: Target) -> Self {
        Self::for_target(Some(target))
    }

    /// Like `new`, choosing the target with `Target::from_parts`.
    pub fn from_parts(socket_path: &str, host: &str) -> Self {
        Self::for_target(Target::from_parts(socket_path, host))
    }

    fn for_target(target: Option<Target>) -> Self {
        DialOptions {
            target,
            password: None,
            database: 0,
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
            tls: None,
        }
    }

    /// Sets the `AUTH` password. An empty string means no authentication.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        let password = password.into();
        self.password = if password.is_empty() { None } else { Some(password) };
        self
    }

    pub fn with_database(mut self, database: u32) -> Self {
        self.database = database;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_tls(mut self, tls: Option<TlsConfig>) -> Self {
        self.tls = tls;
        self
    }
}

impl fmt::Debug for DialOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialOptions")
            .field("target", &self.target)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("tls", &self.tls)
            .finish()
    }
}

/// Opens one connection and runs the handshake.
///
/// Steps, in order: connect (bounded by `connect_timeout`), apply read/write
/// timeouts, TLS if configured, `AUTH` if a password is set, `SELECT` if the
/// database is non-zero. The first failure is returned and the socket is
/// closed.
pub fn dial(options: &DialOptions) -> RedisResult<Connection> {
    let target = options.target.as_ref().ok_or(RedisError::NoTarget)?;
    debug!(target_addr = %target, tls = options.tls.is_some(), "dialing redis");

    let transport = Transport::connect(target, options.connect_timeout)?;
    transport.set_timeouts(options.read_timeout, options.write_timeout)?;

    let stream = match &options.tls {
        Some(tls) => {
            let domain = tls
                .server_name
                .as_deref()
                .unwrap_or_else(|| target.default_domain());
            let session = tls.connector.connect(domain, transport).map_err(|err| {
                warn!(target_addr = %target, domain, error = %err, "tls negotiation failed");
                tls_error(domain, err)
            })?;
            Stream::Tls(Box::new(session))
        }
        None => Stream::Plain(transport),
    };

    let mut conn = Connection::new(stream);
    if let Some(password) = &options.password {
        conn.auth(password).inspect_err(|err| {
            warn!(target_addr = %target, error = %err, "redis authentication failed");
        })?;
    }
    if options.database != 0 {
        conn.select(options.database).inspect_err(|err| {
            warn!(target_addr = %target, error = %err, "redis database selection failed");
        })?;
    }

    debug!(target_addr = %target, database = options.database, "redis connection ready");
    Ok(conn)
}

/// Raw socket before any TLS layer.
#[derive(Debug)]
pub(crate) enum Transport {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Transport {
    fn connect(target: &Target, timeout: Option<Duration>) -> RedisResult<Self> {
        let unreachable = |source: io::Error| RedisError::TargetUnreachable {
            target: target.to_string(),
            source,
        };

        match target {
            Target::Tcp(addr) => connect_tcp(addr, timeout).map(Transport::Tcp).map_err(unreachable),
            #[cfg(unix)]
            Target::Unix(path) => UnixStream::connect(path).map(Transport::Unix).map_err(unreachable),
            #[cfg(not(unix))]
            Target::Unix(_) => Err(unreachable(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            ))),
        }
    }

    fn set_timeouts(&self, read: Option<Duration>, write: Option<Duration>) -> io::Result<()> {
        match self {
            Transport::Tcp(stream) => {
                stream.set_read_timeout(read)?;
                stream.set_write_timeout(write)?;
                // Commands are small request/response pairs.
                stream.set_nodelay(true)
            }
            #[cfg(unix)]
            Transport::Unix(stream) => {
                stream.set_read_timeout(read)?;
                stream.set_write_timeout(write)
            }
        }
    }
}

fn connect_tcp(addr: &str, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let Some(timeout) = timeout else {
        return TcpStream::connect(addr);
    };

    let mut last_err = None;
    for socket_addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&socket_addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
    }))
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Transport::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Transport::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Transport::Unix(stream) => stream.flush(),
        }
    }
}

/// Transport as seen by a `Connection`: plain or TLS-wrapped.
#[derive(Debug)]
pub(crate) enum Stream {
    Plain(Transport),
    Tls(Box<TlsStream<Transport>>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(transport) => transport.read(buf),
            Stream::Tls(session) => session.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(transport) => transport.write(buf),
            Stream::Tls(session) => session.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(transport) => transport.flush(),
            Stream::Tls(session) => session.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_takes_priority_over_host() {
        let target = Target::from_parts("/var/run/redis.sock", "127.0.0.1:6379");
        assert_eq!(target, Some(Target::Unix(PathBuf::from("/var/run/redis.sock"))));
    }

    #[test]
    fn host_used_when_socket_path_empty() {
        let target = Target::from_parts("", "redis:6379");
        assert_eq!(target, Some(Target::Tcp("redis:6379".into())));
        assert_eq!(Target::from_parts("", ""), None);
    }

    #[test]
    fn default_domain_strips_port_and_brackets() {
        assert_eq!(Target::Tcp("redis.internal:6380".into()).default_domain(), "redis.internal");
        assert_eq!(Target::Tcp("[::1]:6379".into()).default_domain(), "::1");
        assert_eq!(Target::Tcp("cache".into()).default_domain(), "cache");
        assert_eq!(Target::Unix("/tmp/r.sock".into()).default_domain(), "localhost");
    }

    #[test]
    fn empty_password_means_no_auth() {
        let options = DialOptions::new(Target::Tcp("h:1".into())).with_password("");
        assert_eq!(options.password, None);
        let options = options.with_password("secret");
        assert_eq!(options.password.as_deref(), Some("secret"));
    }

    #[test]
    fn debug_redacts_password() {
        let options = DialOptions::new(Target::Tcp("h:1".into())).with_password("hunter2");
        let rendered = format!("{:?}", options);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn missing_ca_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TlsConfig::from_ca_pem(dir.path().join("absent.pem")).unwrap_err();
        assert!(matches!(err, RedisError::Io(_)), "{err}");
    }

    #[test]
    fn invalid_ca_pem_fails_tls_setup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca.pem");
        fs::write(&path, b"not a certificate").unwrap();

        let err = TlsConfig::from_ca_pem(&path).unwrap_err();
        assert!(matches!(err, RedisError::EncryptionNegotiationFailed { .. }), "{err}");
    }

    #[test]
    fn dial_without_target_fails() {
        let err = dial(&DialOptions::from_parts("", "")).unwrap_err();
        assert!(matches!(err, RedisError::NoTarget));
    }

    #[test]
    fn refused_dial_is_target_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let options = DialOptions::new(Target::Tcp(addr))
            .with_connect_timeout(Some(Duration::from_secs(1)));
        let err = dial(&options).unwrap_err();
        assert!(matches!(err, RedisError::TargetUnreachable { .. }), "{err}");
    }
}
