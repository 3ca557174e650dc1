// rcache-common - Shared configuration and error types for the cache client
//
// This crate holds the pool description and the error enum; it performs no I/O
// beyond reading a config file on request.

pub mod error;
pub mod types;

// Re-export for convenience
pub use error::*;
pub use types::*;
