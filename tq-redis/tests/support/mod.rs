#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
#[cfg(unix)]
use std::os::unix::net::UnixListener;
#[cfg(unix)]
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

use tq_redis::Clock;

/// Builds the raw reply for one command.
pub type Handler = Arc<dyn Fn(&[Vec<u8>]) -> Vec<u8> + Send + Sync>;

/// One command observed by the fake server, tagged with its connection.
#[derive(Debug, Clone)]
pub struct Seen {
    pub conn: usize,
    pub args: Vec<Vec<u8>>,
}

impl Seen {
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.args[0]).to_ascii_uppercase()
    }
}

/// RESP2 server on a background thread that records every command.
///
/// Each accepted connection gets its own thread and an id in accept order.
/// A command is recorded before its reply is written, so once the client has
/// the reply the log already holds the command.
pub struct FakeServer {
    pub addr: String,
    log: Arc<Mutex<Vec<Seen>>>,
}

impl FakeServer {
    pub fn tcp(handler: Handler) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let log = Arc::new(Mutex::new(Vec::new()));
        let next_id = Arc::new(AtomicUsize::new(0));

        let shared = log.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
                spawn_session(stream, next_id.fetch_add(1, Ordering::SeqCst), handler.clone(), shared.clone());
            }
        });

        FakeServer { addr, log }
    }

    #[cfg(unix)]
    pub fn unix(path: &Path, handler: Handler) -> Self {
        let listener = UnixListener::bind(path).expect("bind unix");
        let log = Arc::new(Mutex::new(Vec::new()));
        let next_id = Arc::new(AtomicUsize::new(0));

        let shared = log.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
                spawn_session(stream, next_id.fetch_add(1, Ordering::SeqCst), handler.clone(), shared.clone());
            }
        });

        FakeServer {
            addr: path.display().to_string(),
            log,
        }
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.log.lock().unwrap().clone()
    }

    /// Upper-cased command names in arrival order.
    pub fn names(&self) -> Vec<String> {
        self.seen().iter().map(Seen::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().iter().filter(|seen| seen.as_str() == name).count()
    }
}

fn spawn_session<S>(stream: S, id: usize, handler: Handler, log: Arc<Mutex<Vec<Seen>>>)
where
    S: Read + Write + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        // Any framing error (including a TLS hello) ends the session.
        while let Ok(args) = read_command(&mut reader) {
            log.lock().unwrap().push(Seen { conn: id, args: args.clone() });
            let reply = handler(&args);
            let stream = reader.get_mut();
            if stream.write_all(&reply).and_then(|_| stream.flush()).is_err() {
                break;
            }
        }
    });
}

/// Replies like a Redis that wants password `secret` and has 16 databases.
pub fn redis_like() -> Handler {
    Arc::new(|args: &[Vec<u8>]| {
        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        match name.as_str() {
            "PING" => b"+PONG\r\n".to_vec(),
            "AUTH" if args.get(1).map(Vec::as_slice) == Some(b"secret".as_slice()) => b"+OK\r\n".to_vec(),
            "AUTH" => b"-WRONGPASS invalid username-password pair\r\n".to_vec(),
            "SELECT" => {
                let db: u32 = String::from_utf8_lossy(&args[1]).parse().unwrap_or(u32::MAX);
                if db < 16 {
                    b"+OK\r\n".to_vec()
                } else {
                    b"-ERR DB index is out of range\r\n".to_vec()
                }
            }
            "ECHO" => bulk(&args[1]),
            _ => b"-ERR unknown command\r\n".to_vec(),
        }
    })
}

/// Like `redis_like`, but every PING fails.
pub fn failing_ping() -> Handler {
    let inner = redis_like();
    Arc::new(move |args: &[Vec<u8>]| {
        if args[0].eq_ignore_ascii_case(b"PING") {
            b"-LOADING Redis is loading the dataset in memory\r\n".to_vec()
        } else {
            inner(args)
        }
    })
}

fn bulk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

fn read_command<R: BufRead>(reader: &mut R) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?;
    if line.first() != Some(&b'*') {
        return Err(invalid("expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?;
        if line.first() != Some(&b'$') {
            return Err(invalid("expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data)?;
        data.truncate(len);
        args.push(data);
    }
    Ok(args)
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
    }
    if !buf.ends_with(b"\r\n") {
        return Err(invalid("invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| invalid("digit"))
}

fn invalid(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(ManualClock {
            now: Mutex::new(Instant::now()),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}

/// Routes `tracing` output through the test harness; filter with `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
