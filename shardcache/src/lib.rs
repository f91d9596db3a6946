//! A sharded Redis-backed cache: namespaced get/set/delete, multi-key batch
//! operations, and a memoization decorator with deferred "batch" resolution.
//!
//! This crate is the user-facing façade over the routing and fan-out
//! machinery in [`shardcache_core`], [`shardcache_backend`] and
//! [`shardcache_redis`]. Applications normally only need [`Cache`] (a single
//! Redis endpoint) or [`ClusterCache`] (a statically sharded set of
//! endpoints), built from a [`ClusterConfig`]/[`CacheConfig`] pair.
//!
//! ```no_run
//! use shardcache::{Cache, CacheConfig};
//! use shardcache_core::HostConfig;
//!
//! let host = HostConfig::tcp("primary", "127.0.0.1", 6379);
//! let cache = Cache::connect(host, CacheConfig::new().with_namespace("app:"));
//! cache.set("greeting", &"hello", None).unwrap();
//! let value: Option<String> = cache.get("greeting").unwrap();
//! assert_eq!(value.as_deref(), Some("hello"));
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod serializer;

pub use cache::{BaseCache, BatchScope, Cache, CacheOps, CachedValue, ClusterCache};
pub use config::{CacheConfig, ClusterConfig, RouterKind, DEFAULT_EXPIRE, DEFAULT_POLLER_TIMEOUT};
pub use error::{CacheError, SerializerError};
pub use serializer::{BincodeSerializer, JsonSerializer, Serializer};
