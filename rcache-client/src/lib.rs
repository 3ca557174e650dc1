//! # Cache Client
//!
//! Purpose: A small blocking client for a RESP-speaking key/value cache. It
//! pins itself to one server chosen at random from a configured pool,
//! authenticates, selects a logical database and then runs strictly
//! sequential request/response exchanges.
//!
//! ## Design Principles
//! 1. **One Session, One Socket**: No pooling, pipelining or failover; a
//!    client owns exactly one connection for its lifetime.
//! 2. **Bounded Retries**: Connect, write and read steps retry up to a
//!    clamped count (0-5) with no backoff.
//! 3. **Opaque Values**: Values are bytes. Serialization belongs to the caller.
//! 4. **Protocol Clarity**: Commands and replies are encoded and decoded
//!    explicitly in `resp`.

mod client;
mod resp;
mod selector;
mod session;
mod store;
mod transport;

#[cfg(test)]
mod testing;

pub use client::CacheClient;
pub use rcache_common::{
    CacheConfig, CacheError, CacheResult, LastError, ServerDescriptor, TransportProtocol,
};
pub use resp::{encode_command, read_response, ReplySource, RespValue, DIAGNOSTICS};
pub use selector::select_server;
pub use session::Session;
pub use store::{CacheArithmetic, CacheStore};
pub use transport::{Connector, NetConnector, NetStream, Transport};
