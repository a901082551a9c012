//! # Command Encoding
//!
//! Purpose: Turn a command name plus ordered arguments into request bytes,
//! and describe the commands the client knows about as plain data.
//!
//! ## Encodings
//!
//! ```text
//! Inline:     SET key 5\r\n                     (space-joined tokens)
//! Bulk:       SET key 5\r\nhello\r\n            (last argument framed by length)
//! MultiBulk:  *3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nhello\r\n
//! ```
//!
//! Keyword arguments are checked against a fixed set of protocol modifiers and
//! always leave as uppercase tokens. Every check runs before a byte is written.

use std::borrow::Cow;

use bytes::Bytes;

use crate::error::{ClientError, ClientResult};
use crate::resp::Reply;

/// Protocol modifiers accepted as keyword arguments.
const KEYWORDS: &[&str] = &[
    "AFTER", "AGGREGATE", "ALPHA", "ASC", "BEFORE", "BY", "COUNT", "DESC", "EX", "GET",
    "LIMIT", "MATCH", "MAX", "MIN", "NOSORT", "NX", "PX", "STORE", "SUM", "WEIGHTS",
    "WITHSCORES", "XX",
];

/// Wire encoding for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Space-joined tokens terminated by CR LF.
    Inline,
    /// Inline tokens plus a trailing length-framed payload (the last argument).
    Bulk,
    /// RESP array of bulk strings.
    MultiBulk,
}

/// Single command argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Text(String),
    Bytes(Bytes),
    Int(i64),
    /// Protocol modifier such as `WITHSCORES` or `LIMIT`.
    Keyword(String),
}

impl Arg {
    pub fn keyword(name: impl Into<String>) -> Self {
        Arg::Keyword(name.into())
    }

    /// Wire form of the argument, with keywords validated and uppercased.
    fn token(&self) -> ClientResult<Cow<'_, [u8]>> {
        match self {
            Arg::Text(text) => Ok(Cow::Borrowed(text.as_bytes())),
            Arg::Bytes(data) => Ok(Cow::Borrowed(&data[..])),
            Arg::Int(value) => Ok(Cow::Owned(value.to_string().into_bytes())),
            Arg::Keyword(name) => normalize_keyword(name)
                .map(|kw| Cow::Borrowed(kw.as_bytes()))
                .ok_or_else(|| ClientError::UnknownKeyword(name.clone())),
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Text(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Text(value)
    }
}

impl From<&[u8]> for Arg {
    fn from(value: &[u8]) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<Vec<u8>> for Arg {
    fn from(value: Vec<u8>) -> Self {
        Arg::Bytes(Bytes::from(value))
    }
}

impl From<Bytes> for Arg {
    fn from(value: Bytes) -> Self {
        Arg::Bytes(value)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

/// Returns the canonical uppercase keyword, if `name` is one.
pub fn normalize_keyword(name: &str) -> Option<&'static str> {
    KEYWORDS
        .iter()
        .copied()
        .find(|kw| kw.eq_ignore_ascii_case(name))
}

/// Encodes a command into `out`, which is cleared first.
///
/// On error `out` may hold a partial request and must not be sent.
pub fn encode(name: &str, args: &[Arg], encoding: Encoding, out: &mut Vec<u8>) -> ClientResult<()> {
    out.clear();
    let name = name.to_ascii_uppercase();
    match encoding {
        Encoding::Inline => {
            push_inline_token(out, name.as_bytes())?;
            for arg in args {
                out.push(b' ');
                push_inline_token(out, &arg.token()?)?;
            }
            out.extend_from_slice(b"\r\n");
        }
        Encoding::Bulk => {
            let (payload, head) = args.split_last().ok_or_else(|| {
                ClientError::InvalidArgument(format!("{} needs a payload argument", name))
            })?;
            let payload = payload.token()?;

            push_inline_token(out, name.as_bytes())?;
            for arg in head {
                out.push(b' ');
                push_inline_token(out, &arg.token()?)?;
            }
            out.push(b' ');
            // Byte length, not character count, so multi-byte text frames correctly.
            out.extend_from_slice(payload.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(&payload);
            out.extend_from_slice(b"\r\n");
        }
        Encoding::MultiBulk => {
            push_header(out, b'*', args.len() + 1);
            push_bulk(out, name.as_bytes());
            for arg in args {
                push_bulk(out, &arg.token()?);
            }
        }
    }
    Ok(())
}

fn push_inline_token(out: &mut Vec<u8>, token: &[u8]) -> ClientResult<()> {
    if token.is_empty() {
        return Err(ClientError::InvalidArgument(
            "inline arguments cannot be empty".to_string(),
        ));
    }
    if token.iter().any(|&b| matches!(b, b' ' | b'\r' | b'\n')) {
        return Err(ClientError::InvalidArgument(format!(
            "inline argument contains whitespace: {:?}",
            String::from_utf8_lossy(token)
        )));
    }
    out.extend_from_slice(token);
    Ok(())
}

fn push_bulk(out: &mut Vec<u8>, data: &[u8]) {
    push_header(out, b'$', data.len());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

fn push_header(out: &mut Vec<u8>, tag: u8, len: usize) {
    out.push(tag);
    out.extend_from_slice(len.to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Number of arguments (excluding the name) a command accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Range(usize, usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Range(min, max) => (min..=max).contains(&count),
        }
    }
}

/// Reply shape a command is expected to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// +OK style status line.
    Status,
    Integer,
    /// Integer 0 or 1.
    Boolean,
    /// Bulk string or nil.
    Bulk,
    /// Array or nil.
    MultiBulk,
}

impl ReplyKind {
    pub fn matches(self, reply: &Reply) -> bool {
        match (self, reply) {
            (ReplyKind::Status, Reply::Simple(_)) => true,
            (ReplyKind::Integer, Reply::Integer(_)) => true,
            (ReplyKind::Boolean, Reply::Integer(value)) => *value == 0 || *value == 1,
            (ReplyKind::Bulk, Reply::Bulk(_) | Reply::Nil) => true,
            (ReplyKind::MultiBulk, Reply::Array(_) | Reply::Nil) => true,
            _ => false,
        }
    }
}

/// Declarative description of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub arity: Arity,
    pub encoding: Encoding,
    pub reply: ReplyKind,
}

const fn spec(name: &'static str, arity: Arity, encoding: Encoding, reply: ReplyKind) -> CommandSpec {
    CommandSpec {
        name,
        arity,
        encoding,
        reply,
    }
}

/// Commands known to the client.
pub const COMMANDS: &[CommandSpec] = &[
    // connection
    spec("AUTH", Arity::Exact(1), Encoding::Inline, ReplyKind::Status),
    spec("ECHO", Arity::Exact(1), Encoding::Bulk, ReplyKind::Bulk),
    spec("PING", Arity::Exact(0), Encoding::Inline, ReplyKind::Status),
    spec("QUIT", Arity::Exact(0), Encoding::Inline, ReplyKind::Status),
    spec("SELECT", Arity::Exact(1), Encoding::Inline, ReplyKind::Status),
    // keys
    spec("DEL", Arity::AtLeast(1), Encoding::Inline, ReplyKind::Integer),
    spec("EXISTS", Arity::Exact(1), Encoding::Inline, ReplyKind::Boolean),
    spec("EXPIRE", Arity::Exact(2), Encoding::Inline, ReplyKind::Boolean),
    spec("KEYS", Arity::Exact(1), Encoding::Inline, ReplyKind::MultiBulk),
    spec("RENAME", Arity::Exact(2), Encoding::Inline, ReplyKind::Status),
    spec("TTL", Arity::Exact(1), Encoding::Inline, ReplyKind::Integer),
    spec("TYPE", Arity::Exact(1), Encoding::Inline, ReplyKind::Status),
    // strings
    spec("DECR", Arity::Exact(1), Encoding::Inline, ReplyKind::Integer),
    spec("DECRBY", Arity::Exact(2), Encoding::Inline, ReplyKind::Integer),
    spec("GET", Arity::Exact(1), Encoding::Inline, ReplyKind::Bulk),
    spec("GETSET", Arity::Exact(2), Encoding::Bulk, ReplyKind::Bulk),
    spec("INCR", Arity::Exact(1), Encoding::Inline, ReplyKind::Integer),
    spec("INCRBY", Arity::Exact(2), Encoding::Inline, ReplyKind::Integer),
    spec("MGET", Arity::AtLeast(1), Encoding::Inline, ReplyKind::MultiBulk),
    spec("SET", Arity::Exact(2), Encoding::Bulk, ReplyKind::Status),
    spec("SETNX", Arity::Exact(2), Encoding::Bulk, ReplyKind::Boolean),
    // lists
    spec("LLEN", Arity::Exact(1), Encoding::Inline, ReplyKind::Integer),
    spec("LPOP", Arity::Exact(1), Encoding::Inline, ReplyKind::Bulk),
    spec("LPUSH", Arity::Exact(2), Encoding::Bulk, ReplyKind::Integer),
    spec("LRANGE", Arity::Exact(3), Encoding::Inline, ReplyKind::MultiBulk),
    spec("RPOP", Arity::Exact(1), Encoding::Inline, ReplyKind::Bulk),
    spec("RPUSH", Arity::Exact(2), Encoding::Bulk, ReplyKind::Integer),
    // sets
    spec("SADD", Arity::Exact(2), Encoding::Bulk, ReplyKind::Boolean),
    spec("SCARD", Arity::Exact(1), Encoding::Inline, ReplyKind::Integer),
    spec("SISMEMBER", Arity::Exact(2), Encoding::Bulk, ReplyKind::Boolean),
    spec("SMEMBERS", Arity::Exact(1), Encoding::Inline, ReplyKind::MultiBulk),
    spec("SREM", Arity::Exact(2), Encoding::Bulk, ReplyKind::Boolean),
    // sorted sets
    spec("ZADD", Arity::Exact(3), Encoding::Bulk, ReplyKind::Boolean),
    spec("ZRANGE", Arity::Range(3, 4), Encoding::Inline, ReplyKind::MultiBulk),
    spec("ZREVRANGE", Arity::Range(3, 4), Encoding::Inline, ReplyKind::MultiBulk),
    spec("ZSCORE", Arity::Exact(2), Encoding::Bulk, ReplyKind::Bulk),
    spec("SORT", Arity::AtLeast(1), Encoding::Inline, ReplyKind::MultiBulk),
    // pub/sub
    spec("PUBLISH", Arity::Exact(2), Encoding::Bulk, ReplyKind::Integer),
    // server
    spec("DBSIZE", Arity::Exact(0), Encoding::Inline, ReplyKind::Integer),
    spec("FLUSHDB", Arity::Exact(0), Encoding::Inline, ReplyKind::Status),
    spec("INFO", Arity::Exact(0), Encoding::Inline, ReplyKind::Bulk),
];

/// Finds a command by name, ignoring case.
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|cmd| cmd.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(name: &str, args: &[Arg], encoding: Encoding) -> ClientResult<Vec<u8>> {
        let mut buf = Vec::new();
        encode(name, args, encoding, &mut buf).map(|_| buf)
    }

    #[test]
    fn encodes_inline_command() {
        let buf = encoded("get", &["key".into()], Encoding::Inline).unwrap();
        assert_eq!(&buf, b"GET key\r\n");
    }

    #[test]
    fn encodes_bulk_command() {
        let buf = encoded("SET", &["key".into(), "hello".into()], Encoding::Bulk).unwrap();
        assert_eq!(&buf, b"SET key 5\r\nhello\r\n");
    }

    #[test]
    fn bulk_length_counts_utf8_bytes() {
        let buf = encoded("SET", &["k".into(), "héllo✓".into()], Encoding::Bulk).unwrap();
        let payload = "héllo✓".as_bytes();
        let mut expected = format!("SET k {}\r\n", payload.len()).into_bytes();
        expected.extend_from_slice(payload);
        expected.extend_from_slice(b"\r\n");
        assert_eq!(buf, expected);
        assert_eq!(payload.len(), 9);
    }

    #[test]
    fn bulk_payload_may_hold_crlf() {
        let payload: &[u8] = b"a\r\nb";
        let buf = encoded("SET", &["k".into(), payload.into()], Encoding::Bulk).unwrap();
        assert_eq!(&buf, b"SET k 4\r\na\r\nb\r\n");
    }

    #[test]
    fn encodes_multibulk_command() {
        let buf = encoded("get", &["key".into()], Encoding::MultiBulk).unwrap();
        assert_eq!(&buf, b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn normalizes_keywords() {
        let args = vec![
            "scores".into(),
            Arg::Int(0),
            Arg::Int(-1),
            Arg::keyword("withscores"),
        ];
        let buf = encoded("zrange", &args, Encoding::Inline).unwrap();
        assert_eq!(&buf, b"ZRANGE scores 0 -1 WITHSCORES\r\n");
    }

    #[test]
    fn rejects_unknown_keywords() {
        let mut buf = Vec::new();
        let err = encode("SORT", &["list".into(), Arg::keyword("sideways")], Encoding::Inline, &mut buf)
            .unwrap_err();
        assert!(matches!(err, ClientError::UnknownKeyword(ref kw) if kw == "sideways"));
    }

    #[test]
    fn rejects_unsafe_inline_tokens() {
        assert!(matches!(
            encoded("GET", &["two words".into()], Encoding::Inline),
            Err(ClientError::InvalidArgument(_))
        ));
        assert!(matches!(
            encoded("GET", &["".into()], Encoding::Inline),
            Err(ClientError::InvalidArgument(_))
        ));
        assert!(matches!(
            encoded("GET", &["a\r\nFLUSHDB".into()], Encoding::Inline),
            Err(ClientError::InvalidArgument(_))
        ));
    }

    #[test]
    fn bulk_requires_payload() {
        assert!(matches!(
            encoded("SET", &[], Encoding::Bulk),
            Err(ClientError::InvalidArgument(_))
        ));
    }

    #[test]
    fn looks_up_commands_case_insensitively() {
        let cmd = lookup("set").expect("SET is known");
        assert_eq!(cmd.encoding, Encoding::Bulk);
        assert!(cmd.arity.accepts(2));
        assert!(!cmd.arity.accepts(1));
        assert!(lookup("NOPE").is_none());
    }

    #[test]
    fn reply_kinds_check_shape() {
        assert!(ReplyKind::Status.matches(&Reply::Simple(Bytes::from_static(b"OK"))));
        assert!(ReplyKind::Bulk.matches(&Reply::Nil));
        assert!(ReplyKind::Boolean.matches(&Reply::Integer(1)));
        assert!(!ReplyKind::Boolean.matches(&Reply::Integer(3)));
        assert!(!ReplyKind::Integer.matches(&Reply::Simple(Bytes::from_static(b"OK"))));
    }
}
