//! Infrastructure event bus implementations.
//!
//! The bus abstraction lives in `authors-events` as pure mechanics; this module
//! provides the Redis-backed implementation used when persistent stores are on.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsError, RedisStreamsEventBus};
