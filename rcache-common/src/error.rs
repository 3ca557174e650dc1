//! # Error Types
//!
//! Purpose: One error enum shared by every layer of the cache client, from
//! configuration validation down to socket retries.
//!
//! ## Propagation
//! - Construction-time failures (`Configuration`, `Connection`) abort session
//!   creation; no half-open session is ever returned.
//! - Per-command failures are returned as the `Err` arm of the command's
//!   `CacheResult`. Transport-level failures additionally mark the session dead.

use std::io;

use thiserror::Error;

/// Result alias used across the workspace.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by the cache client.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The server pool is empty or a descriptor is unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every connect attempt failed.
    #[error(
        "could not connect to host '{host}' using port {port} over {protocol} \
         after {attempts} attempt(s): error code {code}, {message}"
    )]
    Connection {
        host: String,
        port: u16,
        protocol: String,
        attempts: u32,
        code: i32,
        message: String,
    },

    /// The request could not be written within the retry budget.
    #[error("write failed after {attempts} attempt(s): error code {code}, {message}")]
    TransportWrite {
        attempts: u32,
        code: i32,
        message: String,
    },

    /// A reply line or payload could not be read within the retry budget.
    #[error("read failed after {attempts} attempt(s): error code {code}, {message}")]
    ProtocolRead {
        attempts: u32,
        code: i32,
        message: String,
    },

    /// The reply did not follow the wire format.
    #[error("protocol decode error: {0}")]
    ProtocolDecode(String),

    /// The server answered with an explicit error reply.
    #[error("server error: {0}")]
    Remote(String),

    /// Reply type did not match what the command expects.
    #[error("unexpected response to {0}")]
    UnexpectedResponse(String),

    /// Caller passed an argument the client refuses to send.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A previous transport failure closed the session; call `reconnect`.
    #[error("session closed after a transport failure")]
    SessionClosed,

    /// The per-command deadline elapsed before the exchange completed.
    #[error("command deadline of {0:?} exceeded")]
    DeadlineExceeded(std::time::Duration),

    /// Configuration file could not be parsed.
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CacheError {
    /// Errno-like code carried by the error, if any.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            CacheError::Connection { code, .. }
            | CacheError::TransportWrite { code, .. }
            | CacheError::ProtocolRead { code, .. } => Some(*code),
            CacheError::Io(err) => err.raw_os_error(),
            _ => None,
        }
    }

    /// True when the failure leaves the socket in an unknown state.
    ///
    /// A decode failure counts: the rest of the malformed reply may still be
    /// buffered, so the next read would not line up with the next command.
    /// Sessions drop their connection on these errors instead of reusing it.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            CacheError::TransportWrite { .. }
                | CacheError::ProtocolRead { .. }
                | CacheError::ProtocolDecode(_)
                | CacheError::DeadlineExceeded(_)
                | CacheError::Io(_)
        )
    }
}

/// Snapshot of the most recent failure seen by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    /// OS error code, or 0 when the failure was not an OS error.
    pub code: i32,
    pub message: String,
}

impl From<&CacheError> for LastError {
    fn from(err: &CacheError) -> Self {
        let message = match err {
            CacheError::Connection { message, .. }
            | CacheError::TransportWrite { message, .. }
            | CacheError::ProtocolRead { message, .. } => message.clone(),
            other => other.to_string(),
        };
        LastError {
            code: err.os_code().unwrap_or(0),
            message,
        }
    }
}

/// Renders an I/O error as the (code, message) pair stored in errors.
pub fn io_detail(err: &io::Error) -> (i32, String) {
    (err.raw_os_error().unwrap_or(0), err.to_string())
}
