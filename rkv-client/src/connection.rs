//! # Connection
//!
//! Purpose: One TCP session to the server with its own buffers, so the pool can
//! hand it to exactly one caller at a time.

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use socket2::SockRef;
use tracing::debug;

use crate::command::{encode, Arg, Encoding};
use crate::config::ServerConfig;
use crate::error::{is_timeout_kind, ClientError, ClientResult, ProtocolError};
use crate::resp::{read_reply, Reply};

/// Single TCP connection with reusable buffers.
///
/// The buffers are stored on the connection to avoid per-call allocations.
pub struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
    peer: SocketAddr,
    created_at: Instant,
}

impl Connection {
    /// Opens a session with keep-alive and no-delay set, then runs AUTH /
    /// SELECT as configured.
    pub fn connect(config: &ServerConfig) -> ClientResult<Self> {
        let timeout = config.timeout();
        let (stream, peer) = connect_stream(config, timeout)?;
        if !timeout.is_zero() {
            stream.set_read_timeout(Some(timeout))?;
            stream.set_write_timeout(Some(timeout))?;
        }
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;
        SockRef::from(&stream).set_keepalive(true)?;

        let mut conn = Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
            peer,
            created_at: Instant::now(),
        };

        if let Some(password) = &config.password {
            conn.expect_ok("AUTH", &[Arg::Text(password.clone())])?;
        }
        if config.database != 0 {
            conn.expect_ok("SELECT", &[Arg::Int(i64::from(config.database))])?;
        }

        debug!(peer = %conn.peer, database = config.database, "connection established");
        Ok(conn)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Sends one command and reads exactly one reply.
    pub fn execute(&mut self, name: &str, args: &[Arg], encoding: Encoding) -> ClientResult<Reply> {
        self.send(name, args, encoding)?;
        self.read_reply()
    }

    /// Encodes and writes a command without waiting for the reply.
    pub fn send(&mut self, name: &str, args: &[Arg], encoding: Encoding) -> ClientResult<()> {
        encode(name, args, encoding, &mut self.write_buf)?;

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;
        Ok(())
    }

    pub fn read_reply(&mut self) -> ClientResult<Reply> {
        read_reply(&mut self.reader, &mut self.line_buf)
    }

    /// Blocks until the next reply starts arriving.
    ///
    /// Returns `Ok(false)` when the read timeout fires before any byte of a
    /// reply has been received, leaving the stream untouched.
    pub(crate) fn wait_readable(&mut self) -> ClientResult<bool> {
        match self.reader.fill_buf() {
            Ok([]) => Err(ProtocolError::UnexpectedEof.into()),
            Ok(_) => Ok(true),
            Err(err) if is_timeout_kind(err.kind()) => Ok(false),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Liveness probe: PING must answer exactly `+PONG`.
    pub fn validate(&mut self) -> bool {
        match self.execute("PING", &[], Encoding::Inline) {
            Ok(Reply::Simple(text)) if text == "PONG" => true,
            Ok(other) => {
                debug!(peer = %self.peer, reply = ?other, "unexpected ping reply");
                false
            }
            Err(err) => {
                debug!(peer = %self.peer, error = %err, "ping failed");
                false
            }
        }
    }

    /// Closes the socket. Errors are ignored: the server may already have
    /// dropped an idle session.
    pub fn close(self) {
        let _ = self.reader.get_ref().shutdown(Shutdown::Both);
        debug!(
            peer = %self.peer,
            age_ms = self.age().as_millis() as u64,
            "connection closed"
        );
    }

    fn expect_ok(&mut self, name: &str, args: &[Arg]) -> ClientResult<()> {
        match self.execute(name, args, Encoding::Inline)? {
            Reply::Simple(text) if text == "OK" => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

fn connect_stream(config: &ServerConfig, timeout: Duration) -> ClientResult<(TcpStream, SocketAddr)> {
    let addrs = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|_| ClientError::InvalidAddress)?;

    let mut last_err = None;
    for addr in addrs {
        let attempt = if timeout.is_zero() {
            TcpStream::connect(addr)
        } else {
            TcpStream::connect_timeout(&addr, timeout)
        };
        match attempt {
            Ok(stream) => return Ok((stream, addr)),
            Err(err) => last_err = Some(err),
        }
    }

    match last_err {
        Some(err) => Err(err.into()),
        None => Err(ClientError::InvalidAddress),
    }
}
