//! Builder-style configuration for the cache façade.
//!
//! No environment variables and no file loading: construction takes
//! in-memory host maps and builder calls, exactly as the original Python
//! library took plain constructor keyword arguments.

use crate::serializer::{JsonSerializer, Serializer};
use bytes::Bytes;
use shardcache_core::HostMap;
use shardcache_redis::DEFAULT_MAX_CONCURRENCY;
use smol_str::SmolStr;
use std::collections::HashMap;
use std::time::Duration;

/// Default expiration when a call site does not specify one (3 days,
/// matching the original's `3 * 24 * 3600`).
pub const DEFAULT_EXPIRE: Duration = Duration::from_secs(3 * 24 * 3600);

/// Default per-tick bound on the readiness poller (matches the original's
/// `poller_timeout=1.0`).
pub const DEFAULT_POLLER_TIMEOUT: Duration = Duration::from_secs(1);

/// Which routing strategy a [`ClusterConfig`] should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterKind {
    /// `crc32(key) % len(hosts)` over sorted host names.
    Crc32,
    /// Weighted consistent hashing (ketama).
    Consistent,
}

/// Options shared by both `Cache` and `ClusterCache`.
pub struct CacheConfig {
    pub(crate) namespace: String,
    pub(crate) serializer: Box<dyn Serializer>,
    pub(crate) default_expire: Duration,
    pub(crate) bypass_values: Vec<Bytes>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            namespace: String::new(),
            serializer: Box::new(JsonSerializer),
            default_expire: DEFAULT_EXPIRE,
            bypass_values: Vec::new(),
        }
    }
}

impl CacheConfig {
    /// Starts a default configuration (no namespace, JSON serializer,
    /// 3-day default expiration, no bypass values).
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefixes every key this cache touches.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Overrides the wire-format serializer (default: [`JsonSerializer`]).
    #[must_use]
    pub fn with_serializer(mut self, serializer: impl Serializer + 'static) -> Self {
        self.serializer = Box::new(serializer);
        self
    }

    /// Overrides the default expiration applied when a call site does not
    /// specify one.
    #[must_use]
    pub fn with_default_expire(mut self, expire: Duration) -> Self {
        self.default_expire = expire;
        self
    }

    /// Encoded values that [`crate::cache::BaseCache::memoize`] should
    /// never write to the cache (compared against the *encoded* bytes, see
    /// `DESIGN.md` for why this departs from the original's pre-serialization
    /// comparison).
    #[must_use]
    pub fn with_bypass_values(mut self, bypass_values: Vec<Bytes>) -> Self {
        self.bypass_values = bypass_values;
        self
    }
}

/// Configuration for [`crate::cache::ClusterCache`] (and, via a one-host
/// map, [`crate::cache::Cache`]).
pub struct ClusterConfig {
    pub(crate) hosts: HostMap,
    pub(crate) router_kind: RouterKind,
    pub(crate) ring_weights: HashMap<SmolStr, u32>,
    pub(crate) pool_max_size: usize,
    pub(crate) max_concurrency: usize,
    pub(crate) poller_timeout: Option<Duration>,
    pub(crate) cache: CacheConfig,
}

impl ClusterConfig {
    /// Starts a configuration over `hosts`, defaulting to `crc32` routing,
    /// 8 idle connections per shard, `max_concurrency = 64` and a 1-second
    /// poller tick.
    pub fn new(hosts: HostMap) -> Self {
        ClusterConfig {
            hosts,
            router_kind: RouterKind::Crc32,
            ring_weights: HashMap::new(),
            pool_max_size: 8,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            poller_timeout: Some(DEFAULT_POLLER_TIMEOUT),
            cache: CacheConfig::default(),
        }
    }

    /// Selects the routing strategy.
    #[must_use]
    pub fn with_router(mut self, kind: RouterKind) -> Self {
        self.router_kind = kind;
        self
    }

    /// Sets per-host ring weights (only meaningful with
    /// [`RouterKind::Consistent`]; hosts absent from the map default to
    /// weight `1`).
    #[must_use]
    pub fn with_ring_weights(mut self, weights: HashMap<SmolStr, u32>) -> Self {
        self.ring_weights = weights;
        self
    }

    /// Bounds the number of idle connections kept per shard.
    #[must_use]
    pub fn with_pool_max_size(mut self, max_size: usize) -> Self {
        self.pool_max_size = max_size;
        self
    }

    /// Bounds how many shard sockets the fan-out engine drives at once.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Bounds each readiness-poller tick (`None` blocks indefinitely).
    #[must_use]
    pub fn with_poller_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.poller_timeout = timeout;
        self
    }

    /// Overrides the shared cache-level options (namespace, serializer,
    /// default expiration, bypass values).
    #[must_use]
    pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}
