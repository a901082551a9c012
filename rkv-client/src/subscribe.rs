//! # Subscription Loop
//!
//! Purpose: Hold one connection in pub/sub mode, hand every pushed message for
//! a single channel to a callback, and always leave the channel on exit.
//!
//! ## Notes
//! - Cancellation is cooperative. The token is checked before each blocking
//!   read, so a cancel lands at the next message boundary or the next read
//!   timeout, whichever comes first.
//! - A push for any other channel means the stream is out of sync and ends the
//!   loop with an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::command::{Arg, Encoding};
use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};
use crate::resp::Reply;

/// Shared flag that stops a subscription loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Message pushed by the server to a subscriber.
///
/// Pushes arrive as `[kind, channel, key, value]`. A three-element push
/// `[kind, channel, payload]` reports `kind` as the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub kind: Bytes,
    pub channel: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl PushMessage {
    pub fn from_reply(reply: Reply) -> ClientResult<Self> {
        let items = match reply {
            Reply::Array(items) => items,
            _ => return Err(ClientError::UnexpectedResponse),
        };

        let mut fields = items.into_iter().map(|item| match item {
            Reply::Bulk(data) => Ok(data),
            Reply::Simple(data) => Ok(data),
            _ => Err(ClientError::UnexpectedResponse),
        });

        match (
            fields.next().transpose()?,
            fields.next().transpose()?,
            fields.next().transpose()?,
            fields.next().transpose()?,
            fields.next().transpose()?,
        ) {
            (Some(kind), Some(channel), Some(value), None, None) => Ok(PushMessage {
                key: kind.clone(),
                kind,
                channel,
                value,
            }),
            (Some(kind), Some(channel), Some(key), Some(value), None) => Ok(PushMessage {
                kind,
                channel,
                key,
                value,
            }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

/// Subscribes `conn` to `channel` and feeds `(key, value)` of every push to
/// `on_message` until `cancel` fires or a read fails.
///
/// An UNSUBSCRIBE for `channel` is written before returning on every path.
/// The connection is left in pub/sub state and should not be reused for
/// ordinary commands.
pub fn listen<F>(
    conn: &mut Connection,
    channel: &str,
    cancel: &CancelToken,
    mut on_message: F,
) -> ClientResult<()>
where
    F: FnMut(&[u8], &[u8]),
{
    let mut guard = Unsubscribe { conn, channel };
    guard
        .conn
        .send("SUBSCRIBE", &[Arg::from(channel)], Encoding::Inline)?;
    // Subscription confirmation.
    guard.conn.read_reply()?;
    info!(channel, "subscribed");

    loop {
        if cancel.is_cancelled() {
            debug!(channel, "subscription cancelled");
            return Ok(());
        }
        if !guard.conn.wait_readable()? {
            continue;
        }

        let push = PushMessage::from_reply(guard.conn.read_reply()?)?;
        if push.channel != channel.as_bytes() {
            let actual = String::from_utf8_lossy(&push.channel).into_owned();
            warn!(expected = channel, actual = %actual, "push for unexpected channel");
            return Err(ClientError::OutOfSync {
                expected: channel.to_string(),
                actual,
            });
        }
        on_message(&push.key, &push.value);
    }
}

/// Sends UNSUBSCRIBE when the loop exits, however it exits.
struct Unsubscribe<'a> {
    conn: &'a mut Connection,
    channel: &'a str,
}

impl Drop for Unsubscribe<'_> {
    fn drop(&mut self) {
        match self
            .conn
            .send("UNSUBSCRIBE", &[Arg::from(self.channel)], Encoding::Inline)
        {
            Ok(()) => info!(channel = self.channel, "unsubscribed"),
            Err(err) => debug!(channel = self.channel, error = %err, "unsubscribe failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(data: &'static [u8]) -> Reply {
        Reply::Bulk(Bytes::from_static(data))
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn parses_keyed_push() {
        let reply = Reply::Array(vec![bulk(b"message"), bulk(b"news"), bulk(b"k1"), bulk(b"v1")]);
        let push = PushMessage::from_reply(reply).unwrap();
        assert_eq!(&push.channel[..], b"news");
        assert_eq!(&push.key[..], b"k1");
        assert_eq!(&push.value[..], b"v1");
    }

    #[test]
    fn parses_plain_push() {
        let reply = Reply::Array(vec![bulk(b"message"), bulk(b"news"), bulk(b"hello")]);
        let push = PushMessage::from_reply(reply).unwrap();
        assert_eq!(&push.key[..], b"message");
        assert_eq!(&push.value[..], b"hello");
    }

    #[test]
    fn rejects_malformed_push() {
        assert!(PushMessage::from_reply(Reply::Integer(1)).is_err());
        assert!(PushMessage::from_reply(Reply::Array(vec![bulk(b"message"), bulk(b"news")])).is_err());
        assert!(PushMessage::from_reply(Reply::Array(vec![
            bulk(b"message"),
            bulk(b"news"),
            Reply::Integer(3),
        ]))
        .is_err());
    }
}
