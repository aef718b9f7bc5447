//! Impls - Store adapters.
//!
//! - **InMemoryStore**: single process, used by tests and local runs
//! - **RedisStore**: shared Redis backend (`redis` feature)

pub mod inmem_store;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use self::inmem_store::InMemoryStore;
#[cfg(feature = "redis")]
pub use self::redis_store::RedisStore;
