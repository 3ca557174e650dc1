//! # Client Session
//!
//! Purpose: Own the single connection a client is pinned to and run the
//! bootstrap sequence (select server, connect, AUTH, SELECT) that makes it
//! usable.
//!
//! ## Lifecycle
//! - `open` either returns a fully bootstrapped session or an error; nothing
//!   half-open escapes.
//! - A transport failure during any command drops the socket. The session
//!   then answers `SessionClosed` until `reconnect` re-runs the bootstrap
//!   against the same server.
//! - Remote error replies and decode failures leave the connection in place.
//!
//! A session serves one request at a time and takes `&mut self`; share it
//! across threads only behind a lock (see `CacheClient`).

use std::time::Duration;

use rand::Rng;

use rcache_common::{CacheConfig, CacheError, CacheResult, LastError, ServerDescriptor};

use crate::resp::RespValue;
use crate::selector::select_server;
use crate::transport::{Connector, NetConnector, Transport};

pub struct Session<C: Connector = NetConnector> {
    connector: C,
    server: ServerDescriptor,
    strict_auth: bool,
    deadline: Option<Duration>,
    transport: Option<Transport<C::Stream>>,
    bootstrap_reply: Option<RespValue>,
    last_error: Option<LastError>,
}

impl Session<NetConnector> {
    /// Opens a session over real sockets against a random server from the pool.
    pub fn open(config: &CacheConfig) -> CacheResult<Self> {
        let connector = NetConnector::with_io_timeout(config.command_timeout());
        Session::open_with(config, connector, &mut rand::thread_rng())
    }
}

impl<C: Connector> Session<C> {
    /// Opens a session with an explicit connector and random source.
    pub fn open_with<R: Rng + ?Sized>(config: &CacheConfig, connector: C, rng: &mut R) -> CacheResult<Self> {
        config.validate()?;
        let server = select_server(&config.servers, rng)?.clone();

        let mut session = Session {
            connector,
            server,
            strict_auth: config.strict_auth,
            deadline: config.command_timeout(),
            transport: None,
            bootstrap_reply: None,
            last_error: None,
        };
        session.bootstrap()?;
        Ok(session)
    }

    fn bootstrap(&mut self) -> CacheResult<()> {
        tracing::info!(server = %self.server, "opening cache session");

        let transport = match Transport::connect(&mut self.connector, &self.server, self.deadline) {
            Ok(transport) => transport,
            Err(err) => {
                self.last_error = Some(LastError::from(&err));
                return Err(err);
            }
        };
        self.transport = Some(transport);

        if let Some(secret) = self.server.auth.clone() {
            let reply = self.execute(&[b"AUTH", secret.as_bytes()])?;
            if let RespValue::Error(message) = reply {
                let message = String::from_utf8_lossy(&message).into_owned();
                if self.strict_auth {
                    self.transport = None;
                    return Err(CacheError::Remote(message));
                }
                tracing::warn!(
                    server = %self.server,
                    reply = %message,
                    "AUTH rejected, continuing unauthenticated"
                );
            }
        }

        let database = self.server.database.to_string();
        let reply = self.execute(&[b"SELECT", database.as_bytes()])?;
        self.bootstrap_reply = Some(reply);
        Ok(())
    }

    /// Sends one command and returns its raw reply.
    ///
    /// Error replies come back as `Ok(RespValue::Error(..))`.
    pub fn execute(&mut self, args: &[&[u8]]) -> CacheResult<RespValue> {
        let transport = self.transport.as_mut().ok_or(CacheError::SessionClosed)?;
        match transport.exchange(args) {
            Ok(reply) => {
                if let Some(message) = reply.error_message() {
                    self.last_error = Some(LastError { code: 0, message });
                }
                Ok(reply)
            }
            Err(err) => {
                if err.is_transport_failure() {
                    tracing::warn!(server = %self.server, error = %err, "dropping connection after transport or decode failure");
                    self.transport = None;
                }
                self.last_error = Some(LastError::from(&err));
                Err(err)
            }
        }
    }

    /// Drops any current connection and re-runs connect, AUTH and SELECT
    /// against the same server.
    pub fn reconnect(&mut self) -> CacheResult<()> {
        self.transport = None;
        self.bootstrap()
    }

    /// Closes the connection. Later commands fail with `SessionClosed`.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            tracing::debug!(server = %self.server, "cache session closed");
        }
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_some()
    }

    /// Server this session is pinned to.
    pub fn server(&self) -> &ServerDescriptor {
        &self.server
    }

    /// Reply to the SELECT issued during the last bootstrap.
    pub fn bootstrap_reply(&self) -> Option<&RespValue> {
        self.bootstrap_reply.as_ref()
    }

    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    /// Effective per-step retry budget.
    pub fn max_retries(&self) -> u32 {
        self.server.max_retries()
    }
}
