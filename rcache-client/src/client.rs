//! # Synchronous Cache Client
//!
//! Purpose: Expose a compact, blocking API for the cache operations a caching
//! framework needs, on top of one pinned session.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `CacheClient` hides the session, codec and retry
//!    details behind typed operations.
//! 2. **Borrow-Friendly API**: Keys and values are `&[u8]`; callers own
//!    serialization.
//! 3. **One Request at a Time**: A mutex around the session keeps every
//!    request/response pair (and multi-command operations such as `set`)
//!    from interleaving on the wire.
//! 4. **Escape Hatch**: `execute` sends any command verbatim for cases the
//!    typed wrappers do not cover.

use parking_lot::Mutex;
use rand::Rng;

use rcache_common::{CacheConfig, CacheError, CacheResult, LastError, ServerDescriptor};

use crate::resp::RespValue;
use crate::session::Session;
use crate::store::{CacheArithmetic, CacheStore};
use crate::transport::{Connector, NetConnector};

/// Blocking client pinned to one server of the pool.
///
/// `&self` methods may be called from several threads; calls are serialized.
pub struct CacheClient<C: Connector = NetConnector> {
    session: Mutex<Session<C>>,
    default_expire: u64,
}

impl CacheClient<NetConnector> {
    /// Picks a server from the pool, connects and bootstraps the session.
    pub fn connect(config: &CacheConfig) -> CacheResult<Self> {
        let session = Session::open(config)?;
        Ok(CacheClient::from_session(session, config.default_expire))
    }
}

impl<C: Connector> CacheClient<C> {
    /// Same as `connect`, with an explicit connector and random source.
    pub fn connect_with<R: Rng + ?Sized>(config: &CacheConfig, connector: C, rng: &mut R) -> CacheResult<Self> {
        let session = Session::open_with(config, connector, rng)?;
        Ok(CacheClient::from_session(session, config.default_expire))
    }

    pub fn from_session(session: Session<C>, default_expire: u64) -> Self {
        CacheClient {
            session: Mutex::new(session),
            default_expire,
        }
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub fn get(&self, key: &[u8]) -> CacheResult<Option<Vec<u8>>> {
        match self.session.lock().execute(&[b"GET", key])? {
            RespValue::Bulk(data) => Ok(data),
            RespValue::Error(message) => Err(remote(message)),
            _ => Err(unexpected("GET")),
        }
    }

    /// Fetches a value, returning `default` when the key is missing.
    pub fn get_or(&self, key: &[u8], default: Vec<u8>) -> CacheResult<Vec<u8>> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Stores a value with the configured default expiry.
    pub fn set(&self, key: &[u8], value: &[u8]) -> CacheResult<()> {
        self.set_with_ttl(key, value, self.default_expire)
    }

    /// Stores a value, then sets its expiry in seconds.
    ///
    /// This is two round-trips (`SET`, then `EXPIRE`) and is not atomic: if
    /// the second one never reaches the server, the key has no expiry.
    pub fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl_secs: u64) -> CacheResult<()> {
        let (seconds, len) = encode_u64(ttl_secs);
        let mut session = self.session.lock();
        let set_reply = session.execute(&[b"SET", key, value])?;
        let expire_reply = session.execute(&[b"EXPIRE", key, &seconds[..len]])?;
        drop(session);

        match set_reply {
            RespValue::Status(_) => {}
            RespValue::Error(message) => return Err(remote(message)),
            _ => return Err(unexpected("SET")),
        }
        match expire_reply {
            RespValue::Integer(_) => Ok(()),
            RespValue::Error(message) => Err(remote(message)),
            _ => Err(unexpected("EXPIRE")),
        }
    }

    /// Sets a time-to-live on a key. Returns true when the TTL was set.
    pub fn expire(&self, key: &[u8], ttl_secs: u64) -> CacheResult<bool> {
        let (seconds, len) = encode_u64(ttl_secs);
        match self.session.lock().execute(&[b"EXPIRE", key, &seconds[..len]])? {
            RespValue::Integer(value) => Ok(value == 1),
            RespValue::Error(message) => Err(remote(message)),
            _ => Err(unexpected("EXPIRE")),
        }
    }

    /// Deletes keys with one `DEL`, returning the server's reply (normally the
    /// number of keys removed).
    pub fn delete(&self, keys: &[&[u8]]) -> CacheResult<RespValue> {
        if keys.is_empty() {
            return Err(CacheError::InvalidArgument("DEL needs at least one key".to_string()));
        }
        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"DEL");
        args.extend_from_slice(keys);
        self.session.lock().execute(&args)?.into_result()
    }

    /// Clears the whole selected database with `FLUSHDB`. Irreversible.
    pub fn delete_all(&self) -> CacheResult<()> {
        match self.session.lock().execute(&[b"FLUSHDB"])? {
            RespValue::Status(_) => Ok(()),
            RespValue::Error(message) => Err(remote(message)),
            _ => Err(unexpected("FLUSHDB")),
        }
    }

    /// Issues `INCR` `step` times and returns the final value.
    pub fn increment(&self, key: &[u8], step: u64) -> CacheResult<i64> {
        self.step_counter(b"INCR", key, step)
    }

    /// Issues `DECR` `step` times and returns the final value.
    pub fn decrement(&self, key: &[u8], step: u64) -> CacheResult<i64> {
        self.step_counter(b"DECR", key, step)
    }

    fn step_counter(&self, command: &'static [u8], key: &[u8], step: u64) -> CacheResult<i64> {
        if step == 0 {
            return Err(CacheError::InvalidArgument("step must be at least 1".to_string()));
        }

        let name = String::from_utf8_lossy(command);
        let mut session = self.session.lock();
        let mut value = 0;
        for _ in 0..step {
            value = match session.execute(&[command, key])? {
                RespValue::Integer(value) => value,
                RespValue::Error(message) => return Err(remote(message)),
                _ => return Err(unexpected(&name)),
            };
        }
        Ok(value)
    }

    /// Pings the server. Returns the raw reply.
    pub fn ping(&self) -> CacheResult<RespValue> {
        self.session.lock().execute(&[b"PING"])?.into_result()
    }

    /// Sends `name` followed by `args` verbatim and returns the raw reply.
    ///
    /// Error replies are returned as `RespValue::Error`, not converted.
    pub fn execute(&self, name: &[u8], args: &[&[u8]]) -> CacheResult<RespValue> {
        if name.is_empty() {
            return Err(CacheError::InvalidArgument("command name is empty".to_string()));
        }
        let mut command: Vec<&[u8]> = Vec::with_capacity(args.len() + 1);
        command.push(name);
        command.extend_from_slice(args);
        self.session.lock().execute(&command)
    }

    /// Re-runs the bootstrap after a transport failure closed the session.
    pub fn reconnect(&self) -> CacheResult<()> {
        self.session.lock().reconnect()
    }

    pub fn is_alive(&self) -> bool {
        self.session.lock().is_alive()
    }

    pub fn server(&self) -> ServerDescriptor {
        self.session.lock().server().clone()
    }

    /// Reply to the `SELECT` sent while bootstrapping.
    pub fn bootstrap_reply(&self) -> Option<RespValue> {
        self.session.lock().bootstrap_reply().cloned()
    }

    pub fn last_error(&self) -> Option<LastError> {
        self.session.lock().last_error().cloned()
    }

    pub fn default_expire(&self) -> u64 {
        self.default_expire
    }
}

impl<C: Connector> CacheStore for CacheClient<C> {
    fn get(&self, key: &[u8]) -> CacheResult<Option<Vec<u8>>> {
        CacheClient::get(self, key)
    }

    fn set(&self, key: &[u8], value: &[u8], ttl_secs: u64) -> CacheResult<()> {
        self.set_with_ttl(key, value, ttl_secs)
    }

    fn delete(&self, key: &[u8]) -> CacheResult<bool> {
        match CacheClient::delete(self, &[key])? {
            RespValue::Integer(count) => Ok(count > 0),
            _ => Err(unexpected("DEL")),
        }
    }

    fn delete_all(&self) -> CacheResult<()> {
        CacheClient::delete_all(self)
    }
}

impl<C: Connector> CacheArithmetic for CacheClient<C> {
    fn increment(&self, key: &[u8], step: u64) -> CacheResult<i64> {
        CacheClient::increment(self, key, step)
    }

    fn decrement(&self, key: &[u8], step: u64) -> CacheResult<i64> {
        CacheClient::decrement(self, key, step)
    }
}

fn remote(message: Vec<u8>) -> CacheError {
    CacheError::Remote(String::from_utf8_lossy(&message).into_owned())
}

fn unexpected(command: &str) -> CacheError {
    CacheError::UnexpectedResponse(command.to_string())
}

fn encode_u64(mut value: u64) -> ([u8; 20], usize) {
    // Stack buffer keeps conversion allocation-free.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        return (buf, 1);
    }
    while value > 0 {
        buf[len] = b'0' + (value % 10) as u8;
        value /= 10;
        len += 1;
    }
    buf[..len].reverse();
    (buf, len)
}
