//! # RESP2 Commands and Replies
//!
//! Purpose: Encode outbound commands and decode server replies for the small
//! command set the transport issues itself (AUTH, SELECT, PING) and whatever
//! callers send through a pooled connection.
//!
//! ## Design Principles
//! 1. **Owned Commands**: A `Command` is built once and can be resent.
//! 2. **Buffer Reuse**: Encoding and line reads go through caller buffers.
//! 3. **Binary-Safe**: Bulk strings are raw bytes; only status and error
//!    lines are decoded as text.
//! 4. **Bounded Input**: Lengths and nesting are capped so a confused peer
//!    cannot make us allocate without limit.

use std::fmt;
use std::io::{BufRead, Read};

use crate::error::{RedisError, RedisResult};

/// Largest bulk string Redis itself will send (512 MiB).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
const MAX_DEPTH: usize = 32;
/// Longest status, error or length line accepted, CRLF excluded.
const MAX_LINE_LEN: usize = 64 * 1024;

/// One decoded server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK`, `+PONG`.
    Status(String),
    /// `-ERR ...`.
    Error(String),
    /// `:42`.
    Integer(i64),
    /// `$5\r\nhello`, `None` for `$-1`.
    Bulk(Option<Vec<u8>>),
    /// `*2\r\n...`, `None` for `*-1`.
    Array(Option<Vec<Reply>>),
}

impl Reply {
    /// Converts an error reply into `RedisError::Server`.
    pub fn into_result(self) -> RedisResult<Reply> {
        match self {
            Reply::Error(message) => Err(RedisError::Server(message)),
            other => Ok(other),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Status(status) if status == "OK")
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(status) => write!(f, "+{}", status),
            Reply::Error(message) => write!(f, "-{}", message),
            Reply::Integer(value) => write!(f, ":{}", value),
            Reply::Bulk(Some(data)) => write!(f, "${}", String::from_utf8_lossy(data)),
            Reply::Bulk(None) => f.write_str("(nil)"),
            Reply::Array(Some(items)) => write!(f, "array({})", items.len()),
            Reply::Array(None) => f.write_str("(nil array)"),
        }
    }
}

/// Anything that can be written as one bulk-string argument.
pub trait ToArg {
    fn to_arg(&self) -> Vec<u8>;
}

impl ToArg for &str {
    fn to_arg(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl ToArg for &[u8] {
    fn to_arg(&self) -> Vec<u8> {
        self.to_vec()
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Vec<u8> {
        self.clone()
    }
}

macro_rules! int_arg {
    ($($ty:ty),*) => {
        $(impl ToArg for $ty {
            fn to_arg(&self) -> Vec<u8> {
                self.to_string().into_bytes()
            }
        })*
    };
}

int_arg!(u32, u64, usize, i64);

/// A command ready to be written to a connection.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Vec<u8>>,
}

impl Command {
    /// Starts a command with its name, e.g. `Command::new("SELECT")`.
    pub fn new(name: &str) -> Self {
        Command {
            args: vec![name.as_bytes().to_vec()],
        }
    }

    /// Appends one argument.
    pub fn arg<A: ToArg>(mut self, arg: A) -> Self {
        self.args.push(arg.to_arg());
        self
    }

    /// Command name as sent on the wire.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.args[0]).into_owned()
    }

    /// Appends the RESP2 array encoding of this command to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(b'*');
        push_decimal(out, self.args.len());
        out.extend_from_slice(b"\r\n");
        for arg in &self.args {
            out.push(b'$');
            push_decimal(out, arg.len());
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(arg);
            out.extend_from_slice(b"\r\n");
        }
    }
}

// Arguments may carry credentials, so only the name is printed.
impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name())
            .field("argc", &(self.args.len() - 1))
            .finish()
    }
}

/// Reads one reply from `reader`, using `line` as scratch space.
pub fn read_reply<R: BufRead>(reader: &mut R, line: &mut Vec<u8>) -> RedisResult<Reply> {
    read_at_depth(reader, line, 0)
}

fn read_at_depth<R: BufRead>(reader: &mut R, line: &mut Vec<u8>, depth: usize) -> RedisResult<Reply> {
    if depth > MAX_DEPTH {
        return Err(RedisError::Protocol("reply nested too deeply".into()));
    }

    read_line(reader, line)?;
    let (&marker, body) = line
        .split_first()
        .ok_or_else(|| RedisError::Protocol("empty reply line".into()))?;

    match marker {
        b'+' => Ok(Reply::Status(text(body))),
        b'-' => Ok(Reply::Error(text(body))),
        b':' => Ok(Reply::Integer(parse_int(body)?)),
        b'$' => {
            let len = parse_int(body)?;
            read_bulk(reader, len)
        }
        b'*' => {
            let len = parse_int(body)?;
            if len < 0 {
                return Ok(Reply::Array(None));
            }
            if len > MAX_BULK_LEN {
                return Err(RedisError::Protocol(format!("array length {} too large", len)));
            }
            let mut items = Vec::with_capacity((len as usize).min(1024));
            for _ in 0..len {
                items.push(read_at_depth(reader, line, depth + 1)?);
            }
            Ok(Reply::Array(Some(items)))
        }
        other => Err(RedisError::Protocol(format!(
            "unknown reply marker {:?}",
            other as char
        ))),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> RedisResult<Reply> {
    if len < 0 {
        return Ok(Reply::Bulk(None));
    }
    if len > MAX_BULK_LEN {
        return Err(RedisError::Protocol(format!("bulk length {} too large", len)));
    }

    let mut data = vec![0u8; len as usize + 2];
    reader.read_exact(&mut data)?;
    if !data.ends_with(b"\r\n") {
        return Err(RedisError::Protocol("bulk string missing CRLF".into()));
    }
    data.truncate(len as usize);
    Ok(Reply::Bulk(Some(data)))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> RedisResult<()> {
    buf.clear();
    let limit = (MAX_LINE_LEN + 2) as u64;
    if reader.by_ref().take(limit).read_until(b'\n', buf)? == 0 {
        return Err(RedisError::Protocol("connection closed by server".into()));
    }
    if buf.len() as u64 >= limit && !buf.ends_with(b"\r\n") {
        return Err(RedisError::Protocol(format!(
            "reply line longer than {} bytes",
            MAX_LINE_LEN
        )));
    }
    if !buf.ends_with(b"\r\n") {
        return Err(RedisError::Protocol("reply line missing CRLF".into()));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_int(data: &[u8]) -> RedisResult<i64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| RedisError::Protocol(format!("invalid integer {:?}", text(data))))
}

fn text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

fn push_decimal(out: &mut Vec<u8>, mut value: usize) {
    let mut digits = [0u8; 20];
    let mut len = 0;
    loop {
        digits[len] = b'0' + (value % 10) as u8;
        value /= 10;
        len += 1;
        if value == 0 {
            break;
        }
    }
    out.extend(digits[..len].iter().rev());
}
