//! Broker adapters implementing [`admod_events::TaskQueue`].
//!
//! The in-memory broker lives in `admod-events`; this module holds the
//! Redis Streams implementation used when persistent stores are enabled.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsQueue;
