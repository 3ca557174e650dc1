//! # Configuration Types
//!
//! Server descriptors and the pool configuration handed to the client.
//!
//! ## Design Principles
//!
//! 1. **Explicit Configuration**: The pool is a plain value passed to session
//!    construction; nothing is looked up from process-wide state.
//! 2. **Immutable Descriptors**: A descriptor never changes after loading. The
//!    effective retry budget is derived on read (`max_retries`), not stored.
//! 3. **Lenient Input, Strict Use**: Legacy spellings (`"auth": false`,
//!    `"retry": false`, any-case protocol names) are accepted at the serde
//!    boundary and normalized into typed fields.
//!
//! ## Example
//!
//! ```text
//! {
//!   "default_expire": 3600,
//!   "servers": [
//!     { "host": "localhost", "port": 6379, "protocol": "TCP",
//!       "timeout": 1, "auth": false, "database": 15, "retry": 5 }
//!   ]
//! }
//! ```

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CacheError, CacheResult};

/// Upper bound on per-step retries, whatever the descriptor says.
pub const MAX_RETRIES: u32 = 5;

/// Default TTL applied by `set` when no explicit TTL is given.
pub const DEFAULT_EXPIRE_SECS: u64 = 3600;

pub const DEFAULT_PORT: u16 = 6379;

const DEFAULT_DATABASE: u32 = 15;
const DEFAULT_TIMEOUT_SECS: f64 = 1.0;

/// Socket family used to reach a server.
///
/// Only `"TCP"` (any case) selects TCP. Every other spelling falls back to a
/// connected datagram socket, matching the legacy configuration format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransportProtocol {
    #[default]
    Tcp,
    Udp,
}

impl TransportProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProtocol::Tcp => "tcp",
            TransportProtocol::Udp => "udp",
        }
    }
}

impl From<&str> for TransportProtocol {
    fn from(value: &str) -> Self {
        if value.eq_ignore_ascii_case("tcp") {
            TransportProtocol::Tcp
        } else {
            TransportProtocol::Udp
        }
    }
}

impl From<String> for TransportProtocol {
    fn from(value: String) -> Self {
        TransportProtocol::from(value.as_str())
    }
}

impl From<TransportProtocol> for String {
    fn from(value: TransportProtocol) -> Self {
        value.as_str().to_uppercase()
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One candidate server in the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub protocol: TransportProtocol,
    /// Per-attempt connect timeout in seconds. Zero or negative blocks.
    #[serde(default = "default_timeout", rename = "timeout")]
    pub timeout_secs: f64,
    /// AUTH secret; `None` disables authentication.
    #[serde(default, deserialize_with = "deserialize_auth")]
    pub auth: Option<String>,
    /// Logical database selected after connecting.
    #[serde(default = "default_database")]
    pub database: u32,
    /// Configured retry count. Use `max_retries` for the effective budget.
    #[serde(default = "default_retry", deserialize_with = "deserialize_retry")]
    pub retry: u32,
}

impl ServerDescriptor {
    /// Creates a descriptor with the default profile for everything but the
    /// address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ServerDescriptor {
            host: host.into(),
            port,
            protocol: TransportProtocol::Tcp,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            auth: None,
            database: DEFAULT_DATABASE,
            retry: MAX_RETRIES,
        }
    }

    pub fn with_protocol(mut self, protocol: TransportProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: f64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_auth(mut self, secret: impl Into<String>) -> Self {
        self.auth = Some(secret.into());
        self
    }

    pub fn with_database(mut self, database: u32) -> Self {
        self.database = database;
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    /// Effective retry budget, clamped to `[0, MAX_RETRIES]`.
    ///
    /// Each I/O step gets `max_retries() + 1` attempts in total.
    pub fn max_retries(&self) -> u32 {
        self.retry.min(MAX_RETRIES)
    }

    /// Connect timeout for a single attempt, or `None` to block.
    pub fn connect_timeout(&self) -> Option<Duration> {
        if self.timeout_secs.is_finite() && self.timeout_secs > 0.0 {
            Some(Duration::from_secs_f64(self.timeout_secs))
        } else {
            None
        }
    }

    /// `host:port` form used for address resolution.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerDescriptor {
    fn default() -> Self {
        ServerDescriptor::new("localhost", DEFAULT_PORT)
    }
}

impl fmt::Display for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}/{}", self.protocol, self.host, self.port, self.database)
    }
}

/// Pool configuration for one cache group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Candidate servers; one is chosen at random per session.
    pub servers: Vec<ServerDescriptor>,
    /// TTL in seconds used by `set` when the caller gives none.
    #[serde(default = "default_expire")]
    pub default_expire: u64,
    /// Overall deadline for one request/response exchange, in seconds.
    /// `None` keeps the legacy behaviour of bounding retries by count only.
    #[serde(default)]
    pub command_timeout_secs: Option<f64>,
    /// Abort session construction when AUTH is rejected.
    #[serde(default)]
    pub strict_auth: bool,
}

impl CacheConfig {
    pub fn new(servers: Vec<ServerDescriptor>) -> Self {
        CacheConfig {
            servers,
            default_expire: DEFAULT_EXPIRE_SECS,
            command_timeout_secs: None,
            strict_auth: false,
        }
    }

    /// Parses a JSON pool definition and validates it.
    pub fn from_json_str(data: &str) -> CacheResult<Self> {
        let config: CacheConfig = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON pool definition from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> CacheResult<Self> {
        let data = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&data)
    }

    pub fn validate(&self) -> CacheResult<()> {
        if self.servers.is_empty() {
            return Err(CacheError::Configuration(
                "no cache servers defined in configuration".to_string(),
            ));
        }
        if let Some(secs) = self.command_timeout_secs {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(CacheError::Configuration(format!(
                    "command_timeout_secs must be positive, got {}",
                    secs
                )));
            }
        }
        for server in &self.servers {
            if server.host.is_empty() {
                return Err(CacheError::Configuration("server host is empty".to_string()));
            }
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_database() -> u32 {
    DEFAULT_DATABASE
}

fn default_retry() -> u32 {
    MAX_RETRIES
}

fn default_expire() -> u64 {
    DEFAULT_EXPIRE_SECS
}

/// Either a boolean switch or a concrete value.
#[derive(Deserialize)]
#[serde(untagged)]
enum Toggle<T> {
    Flag(bool),
    Value(T),
}

fn deserialize_auth<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Toggle<String>>::deserialize(deserializer)? {
        None | Some(Toggle::Flag(false)) => Ok(None),
        Some(Toggle::Flag(true)) => Err(D::Error::custom("auth must be a secret string or false")),
        Some(Toggle::Value(secret)) => Ok(Some(secret)),
    }
}

fn deserialize_retry<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    match Toggle::<u32>::deserialize(deserializer)? {
        Toggle::Flag(false) => Ok(0),
        Toggle::Flag(true) => Err(D::Error::custom("retry must be a count or false")),
        Toggle::Value(count) => Ok(count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_parsing_is_case_insensitive() {
        assert_eq!(TransportProtocol::from("TCP"), TransportProtocol::Tcp);
        assert_eq!(TransportProtocol::from("tcp"), TransportProtocol::Tcp);
        assert_eq!(TransportProtocol::from("UDP"), TransportProtocol::Udp);
        // Anything that is not TCP takes the datagram path.
        assert_eq!(TransportProtocol::from("sctp"), TransportProtocol::Udp);
    }

    #[test]
    fn retry_budget_is_clamped() {
        assert_eq!(ServerDescriptor::default().with_retry(9).max_retries(), 5);
        assert_eq!(ServerDescriptor::default().with_retry(5).max_retries(), 5);
        assert_eq!(ServerDescriptor::default().with_retry(2).max_retries(), 2);
        assert_eq!(ServerDescriptor::default().with_retry(0).max_retries(), 0);
    }

    #[test]
    fn connect_timeout_zero_blocks() {
        let server = ServerDescriptor::default().with_timeout_secs(0.0);
        assert_eq!(server.connect_timeout(), None);
        let server = ServerDescriptor::default().with_timeout_secs(1.5);
        assert_eq!(server.connect_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn parses_legacy_profile() {
        let config = CacheConfig::from_json_str(
            r#"{
                "default_expire": 120,
                "servers": [
                    { "host": "localhost", "port": 6379, "protocol": "TCP",
                      "timeout": 1, "auth": false, "database": 15, "retry": 7 },
                    { "host": "10.0.0.2", "port": 6380, "protocol": "udp",
                      "auth": "s3cret", "retry": false }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.default_expire, 120);
        assert_eq!(config.command_timeout(), None);
        assert!(!config.strict_auth);

        let first = &config.servers[0];
        assert_eq!(first.auth, None);
        assert_eq!(first.database, 15);
        assert_eq!(first.max_retries(), 5);

        let second = &config.servers[1];
        assert_eq!(second.protocol, TransportProtocol::Udp);
        assert_eq!(second.auth.as_deref(), Some("s3cret"));
        assert_eq!(second.max_retries(), 0);
        assert_eq!(second.database, 15);
        assert_eq!(second.timeout_secs, 1.0);
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let config = CacheConfig::from_json_str(r#"{ "servers": [ { "host": "cache" } ] }"#).unwrap();
        assert_eq!(config.default_expire, DEFAULT_EXPIRE_SECS);
        assert_eq!(config.servers[0], ServerDescriptor::new("cache", DEFAULT_PORT));
    }

    #[test]
    fn empty_pool_is_a_configuration_error() {
        let err = CacheConfig::from_json_str(r#"{ "servers": [] }"#).unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }

    #[test]
    fn rejects_auth_true() {
        let err = CacheConfig::from_json_str(r#"{ "servers": [ { "host": "h", "auth": true } ] }"#)
            .unwrap_err();
        assert!(matches!(err, CacheError::Parse(_)));
    }

    #[test]
    fn rejects_non_positive_deadline() {
        let mut config = CacheConfig::new(vec![ServerDescriptor::default()]);
        config.command_timeout_secs = Some(0.0);
        assert!(matches!(config.validate(), Err(CacheError::Configuration(_))));
        config.command_timeout_secs = Some(0.25);
        assert_eq!(config.command_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn display_names_target() {
        let server = ServerDescriptor::new("cache", 6380).with_database(2);
        assert_eq!(server.to_string(), "tcp://cache:6380/2");
        assert_eq!(server.address(), "cache:6380");
    }
}
