//! # Redis Connection
//!
//! Purpose: One physical connection with its own read and write buffers,
//! plus the handshake and liveness commands the pool depends on.

use std::io::{BufReader, Write};

use crate::dial::Stream;
use crate::error::{RedisError, RedisResult};
use crate::resp::{read_reply, Command, Reply};

/// Single connection to a Redis server.
///
/// Buffers live on the connection so repeated commands do not allocate
/// framing space.
#[derive(Debug)]
pub struct Connection {
    reader: BufReader<Stream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    pub(crate) fn new(stream: Stream) -> Self {
        Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        }
    }

    /// Sends a command and returns the raw reply, including error replies.
    pub fn send(&mut self, command: &Command) -> RedisResult<Reply> {
        self.write_buf.clear();
        command.encode(&mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        read_reply(&mut self.reader, &mut self.line_buf)
    }

    /// Sends a command, turning an error reply into `RedisError::Server`.
    pub fn query(&mut self, command: &Command) -> RedisResult<Reply> {
        self.send(command)?.into_result()
    }

    /// Liveness check used by test-on-borrow.
    pub fn ping(&mut self) -> RedisResult<()> {
        match self.send(&Command::new("PING")) {
            Ok(Reply::Status(status)) if status == "PONG" => Ok(()),
            Ok(other) => Err(RedisError::LivenessCheckFailed(format!("PING returned {}", other))),
            Err(err) => Err(RedisError::LivenessCheckFailed(err.to_string())),
        }
    }

    pub(crate) fn auth(&mut self, password: &str) -> RedisResult<()> {
        match self.send(&Command::new("AUTH").arg(password))? {
            Reply::Status(_) => Ok(()),
            Reply::Error(message) => Err(RedisError::AuthRejected { message }),
            other => Err(RedisError::UnexpectedReply(format!("AUTH returned {}", other))),
        }
    }

    pub(crate) fn select(&mut self, database: u32) -> RedisResult<()> {
        match self.send(&Command::new("SELECT").arg(database))? {
            Reply::Status(_) => Ok(()),
            Reply::Error(message) => Err(RedisError::DatabaseSelectionRejected { database, message }),
            other => Err(RedisError::UnexpectedReply(format!("SELECT returned {}", other))),
        }
    }
}
