//! ycache - function-result caching with memory and disk backends
//!
//! Memoizes expensive computations keyed by a fingerprint of their call
//! arguments, with TTL expiration and LRU eviction.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{CacheBackend, CacheFacade, CallArgs};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use tasks::spawn_sweep_task;
