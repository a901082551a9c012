//! # RESP Reply Parsing
//!
//! Purpose: Decode exactly one reply from a buffered byte stream, leaving the
//! stream positioned at the first byte of the next reply.
//!
//! ## Design Principles
//! 1. **Tag Dispatch**: One `match` over the five reply tags plus an error arm.
//! 2. **Strict Framing**: Lines end in CR LF and nothing else; lone CR fails.
//! 3. **Binary-Safe**: Bulk strings are length-framed raw bytes.
//! 4. **Stay In Sync**: A server error nested in an array is raised only after
//!    the whole array has been consumed.

use std::io::{BufRead, ErrorKind};

use bytes::Bytes;

use crate::error::{ClientError, ClientResult, ProtocolError};

/// Largest bulk payload accepted from the server (512 MiB).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Decoded server reply.
///
/// Error replies never appear here; they surface as [`ClientError::Server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// +OK or +PONG style responses, as sent.
    Simple(Bytes),
    /// :123 responses.
    Integer(i64),
    /// $n bulk strings.
    Bulk(Bytes),
    /// *n arrays.
    Array(Vec<Reply>),
    /// $-1 or *-1.
    Nil,
}

impl Reply {
    /// Returns true for a null bulk string or null array.
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    /// Raw bytes of a status or bulk reply.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Simple(data) | Reply::Bulk(data) => Some(&data[..]),
            _ => None,
        }
    }

    /// Status or bulk reply as UTF-8 text.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|data| std::str::from_utf8(data).ok())
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(value) => Some(*value),
            _ => None,
        }
    }
}

/// Reads one reply from the buffered reader.
///
/// `line_buf` is scratch space reused across calls.
pub fn read_reply<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<Reply> {
    let mut server_error = None;
    let reply = read_value(reader, line_buf, &mut server_error)?;
    match server_error {
        Some(message) => Err(ClientError::Server { message }),
        None => Ok(reply),
    }
}

fn read_value<R: BufRead>(
    reader: &mut R,
    line_buf: &mut Vec<u8>,
    server_error: &mut Option<Bytes>,
) -> ClientResult<Reply> {
    let mut tag = [0u8; 1];
    read_exact(reader, &mut tag)?;

    match tag[0] {
        b'+' => {
            read_line(reader, line_buf)?;
            Ok(Reply::Simple(Bytes::copy_from_slice(line_buf)))
        }
        b'-' => {
            read_line(reader, line_buf)?;
            if server_error.is_none() {
                *server_error = Some(Bytes::copy_from_slice(line_buf));
            }
            Ok(Reply::Nil)
        }
        b':' => {
            read_line(reader, line_buf)?;
            Ok(Reply::Integer(parse_i64(line_buf)?))
        }
        b'$' => {
            read_line(reader, line_buf)?;
            let len = parse_i64(line_buf)?;
            read_bulk(reader, len)
        }
        b'*' => {
            read_line(reader, line_buf)?;
            let count = parse_i64(line_buf)?;
            read_array(reader, count, line_buf, server_error)
        }
        other => Err(ProtocolError::UnknownReplyType(other).into()),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> ClientResult<Reply> {
    if len < 0 {
        return Ok(Reply::Nil);
    }
    if len > MAX_BULK_LEN {
        return Err(ProtocolError::BulkTooLarge(len).into());
    }

    // read_exact loops over short reads until the payload is complete.
    let mut data = vec![0u8; len as usize];
    read_exact(reader, &mut data)?;

    let mut crlf = [0u8; 2];
    read_exact(reader, &mut crlf)?;
    if crlf != *b"\r\n" {
        return Err(ProtocolError::BulkTerminator.into());
    }

    Ok(Reply::Bulk(Bytes::from(data)))
}

fn read_array<R: BufRead>(
    reader: &mut R,
    count: i64,
    line_buf: &mut Vec<u8>,
    server_error: &mut Option<Bytes>,
) -> ClientResult<Reply> {
    if count < 0 {
        return Ok(Reply::Nil);
    }

    let mut items = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        items.push(read_value(reader, line_buf, server_error)?);
    }
    Ok(Reply::Array(items))
}

/// Reads a line into `buf`, excluding the CR LF terminator.
fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if available.is_empty() {
            return Err(ProtocolError::UnexpectedEof.into());
        }

        match available.iter().position(|&b| b == b'\r') {
            Some(idx) => {
                buf.extend_from_slice(&available[..idx]);
                reader.consume(idx + 1);
                break;
            }
            None => {
                let len = available.len();
                buf.extend_from_slice(available);
                reader.consume(len);
            }
        }
    }

    let mut lf = [0u8; 1];
    read_exact(reader, &mut lf)?;
    if lf[0] != b'\n' {
        return Err(ProtocolError::MissingLineFeed.into());
    }
    Ok(())
}

fn read_exact<R: BufRead>(reader: &mut R, buf: &mut [u8]) -> ClientResult<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
            Err(ProtocolError::UnexpectedEof.into())
        }
        Err(err) => Err(err.into()),
    }
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.trim().parse::<i64>().ok())
        .ok_or_else(|| ProtocolError::InvalidInteger.into())
}
