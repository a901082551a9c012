//! # RKV Sync Client
//!
//! Purpose: Provide a lightweight, synchronous RESP client with a validated
//! connection pool and a blocking pub/sub listener.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections, probing them before reuse.
//! 2. **One Reply Per Request**: Every command consumes exactly one reply.
//! 3. **Minimal Allocation**: Reuse buffers for framing and parsing.
//! 4. **Protocol Clarity**: Encode and parse the wire format explicitly.

mod client;
mod command;
mod config;
mod connection;
mod error;
mod pool;
mod resp;
mod subscribe;

pub use client::{Client, ClientTtl};
pub use command::{encode, lookup, normalize_keyword, Arg, Arity, CommandSpec, Encoding, ReplyKind, COMMANDS};
pub use config::{ClientConfig, PoolConfig, ServerConfig};
pub use connection::Connection;
pub use error::{ClientError, ClientResult, ProtocolError};
pub use pool::{ConnectionPool, PoolRegistry, PoolStatus, PooledConnection};
pub use resp::{read_reply, Reply};
pub use subscribe::{listen, CancelToken, PushMessage};
