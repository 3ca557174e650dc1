//! Capability traits a caching framework expects from a store.
//!
//! Values cross this boundary as bytes; encoding structured values is the
//! caller's job.

use rcache_common::CacheResult;

/// Basic key/value cache operations.
pub trait CacheStore {
    /// Fetches a value, `None` when the key is absent.
    fn get(&self, key: &[u8]) -> CacheResult<Option<Vec<u8>>>;

    /// Fetches a value, falling back to `default` when the key is absent.
    fn get_or(&self, key: &[u8], default: Vec<u8>) -> CacheResult<Vec<u8>> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Stores a value that expires after `ttl_secs`.
    fn set(&self, key: &[u8], value: &[u8], ttl_secs: u64) -> CacheResult<()>;

    /// Removes a key. Returns true when something was removed.
    fn delete(&self, key: &[u8]) -> CacheResult<bool>;

    /// Removes every key in the store.
    fn delete_all(&self) -> CacheResult<()>;
}

/// Atomic counter operations.
pub trait CacheArithmetic {
    fn increment(&self, key: &[u8], step: u64) -> CacheResult<i64>;

    fn decrement(&self, key: &[u8], step: u64) -> CacheResult<i64>;
}
