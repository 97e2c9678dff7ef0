//! KV-backed rate limiting and idempotency, on top of
//! `asupersync::messaging::RedisClient`.

#![forbid(unsafe_code)]

pub mod client;
pub mod idempotency;
pub mod rate_limit;

pub use client::KvClient;
pub use idempotency::IdempotencyStore;
pub use rate_limit::{RateLimiter, UsageSnapshot};
