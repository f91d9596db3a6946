//! The cache façade: namespaced get/set/delete, multi-key batch operations,
//! and memoized-function support shared by a single-host and a sharded
//! cluster backend.

use crate::config::{CacheConfig, ClusterConfig, RouterKind};
use crate::error::CacheError;
use crate::serializer::Serializer;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shardcache_backend::ClusterPoolManager;
use shardcache_core::{Crc32Router, HostConfig, HostMap, KetamaRouter, KwArg, Promise, Router, derive_key};
use shardcache_redis::ClusterClient;
use smol_str::SmolStr;
use std::cell::{Cell, RefCell};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// Raw, unserialized client operations shared by every cache backend.
///
/// `BaseCache` layers namespacing, serialization, and batch/memoization
/// bookkeeping on top of this; implementations only need to move bytes
/// (mirroring how `rc.cache.BaseCache` called through `self.client`, a bare
/// `RedisClient` or `RedisCluster` view, via `_raw_get`/`_raw_set`/
/// `_raw_get_many`).
pub trait CacheOps: Send + Sync {
    /// Fetches one key's raw bytes, or `None` if absent.
    fn raw_get(&self, key: &[u8]) -> Result<Option<Bytes>, CacheError>;
    /// Sets one key's raw bytes with an expiration.
    fn raw_set(&self, key: &[u8], value: &[u8], expire: Duration) -> Result<bool, CacheError>;
    /// Deletes one key.
    fn raw_delete(&self, key: &[u8]) -> Result<bool, CacheError>;
    /// Fetches many keys' raw bytes, aligned with `keys`' order.
    fn raw_get_many(&self, keys: &[Bytes]) -> Result<Vec<Option<Bytes>>, CacheError>;
    /// Sets many key/value pairs with one shared expiration.
    fn raw_set_many(&self, mapping: &[(Bytes, Bytes)], expire: Duration) -> Result<bool, CacheError>;
    /// Deletes many keys; `true` only if every key existed and was deleted.
    fn raw_delete_many(&self, keys: &[Bytes]) -> Result<bool, CacheError>;
}

impl CacheOps for ClusterClient {
    fn raw_get(&self, key: &[u8]) -> Result<Option<Bytes>, CacheError> {
        Ok(self.get(key)?)
    }

    fn raw_set(&self, key: &[u8], value: &[u8], expire: Duration) -> Result<bool, CacheError> {
        Ok(self.setex(key, expire.as_secs(), value)?)
    }

    fn raw_delete(&self, key: &[u8]) -> Result<bool, CacheError> {
        Ok(self.del(key)?)
    }

    fn raw_get_many(&self, keys: &[Bytes]) -> Result<Vec<Option<Bytes>>, CacheError> {
        Ok(self.mget(keys)?)
    }

    fn raw_set_many(&self, mapping: &[(Bytes, Bytes)], expire: Duration) -> Result<bool, CacheError> {
        Ok(self.mset_with_expiry(mapping, expire)?)
    }

    fn raw_delete_many(&self, keys: &[Bytes]) -> Result<bool, CacheError> {
        let deleted = self.mdelete(keys)?;
        Ok(deleted == keys.len())
    }
}

/// Running mode for a [`BaseCache`] — mirrors `rc.cache.NORMAL_MODE` /
/// `BATCH_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunningMode {
    Normal,
    Batch,
}

/// The result of a [`BaseCache::memoize`] call: a value computed (or
/// fetched from cache) immediately in normal mode, or a promise resolved
/// later by [`BaseCache::batch`] in batch mode.
pub enum CachedValue<T> {
    /// Available immediately.
    Ready(T),
    /// Resolved once the enclosing [`BatchScope`] finishes.
    Pending(Promise<T>),
}

impl<T: Clone> CachedValue<T> {
    /// Returns the value if it is ready, or already resolved.
    pub fn into_value(self) -> Option<T> {
        match self {
            CachedValue::Ready(value) => Some(value),
            CachedValue::Pending(promise) => promise.value(),
        }
    }
}

/// One queued `memoize` call awaiting [`BaseCache::batch`], type-erased so
/// calls with different `T` can share one pending-operations list.
trait PendingOp<C: CacheOps> {
    fn cache_key(&self) -> &str;
    fn expire(&self) -> Option<Duration>;
    fn resolve(self: Box<Self>, cache: &BaseCache<C>, raw: Option<Bytes>) -> Result<(), CacheError>;
}

struct PendingCall<T, F> {
    cache_key: String,
    expire: Option<Duration>,
    compute: Option<F>,
    promise: Promise<T>,
}

impl<C, T, F> PendingOp<C> for PendingCall<T, F>
where
    C: CacheOps,
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
    F: FnOnce() -> T,
{
    fn cache_key(&self) -> &str {
        &self.cache_key
    }

    fn expire(&self) -> Option<Duration> {
        self.expire
    }

    fn resolve(mut self: Box<Self>, cache: &BaseCache<C>, raw: Option<Bytes>) -> Result<(), CacheError> {
        let value = match raw {
            Some(bytes) => cache.decode(&bytes)?,
            None => {
                let compute = self.compute.take().expect("resolve runs exactly once");
                let value = compute();
                let encoded = cache.encode(&value)?;
                if !cache.is_bypass_value(&encoded) {
                    cache.raw_set_namespaced(&self.cache_key, &encoded, self.expire)?;
                }
                // Always re-decode the freshly encoded bytes, even on a
                // miss, so a batch-resolved value matches what a later hit
                // would return (§4.H's stable-type round-trip contract).
                cache.decode(&encoded)?
            }
        };
        self.promise.resolve(value)?;
        Ok(())
    }
}

// A resolved PendingOp needs a handle back to the promise it was created
// for; storing it on the op itself (rather than the cache) keeps BaseCache
// free of per-call state once the op is boxed.
impl<T, F> PendingCall<T, F> {
    fn new(cache_key: String, expire: Option<Duration>, compute: F, promise: Promise<T>) -> Self {
        PendingCall {
            cache_key,
            expire,
            compute: Some(compute),
            promise,
        }
    }
}

/// Shared implementation behind [`Cache`] and [`ClusterCache`]: namespacing,
/// serialization, batch-mode bookkeeping, and memoization — mirrors
/// `rc.cache.BaseCache`.
pub struct BaseCache<C: CacheOps> {
    client: C,
    namespace: String,
    serializer: Box<dyn Serializer>,
    default_expire: Duration,
    bypass_values: Vec<Bytes>,
    // Batch mode is explicitly not thread-safe (mirrors the original's own
    // docstring warning), so plain interior mutability is the honest
    // translation rather than a `Mutex` that would imply safe concurrent use.
    running_mode: Cell<RunningMode>,
    pending_operations: RefCell<Vec<Box<dyn PendingOp<C>>>>,
}

impl<C: CacheOps> BaseCache<C> {
    /// Wraps `client` with the given cache-level options.
    pub fn new(client: C, config: CacheConfig) -> Self {
        BaseCache {
            client,
            namespace: config.namespace,
            serializer: config.serializer,
            default_expire: config.default_expire,
            bypass_values: config.bypass_values,
            running_mode: Cell::new(RunningMode::Normal),
            pending_operations: RefCell::new(Vec::new()),
        }
    }

    fn namespaced(&self, key: &str) -> Bytes {
        if self.namespace.is_empty() {
            Bytes::copy_from_slice(key.as_bytes())
        } else {
            let mut buf = Vec::with_capacity(self.namespace.len() + key.len());
            buf.extend_from_slice(self.namespace.as_bytes());
            buf.extend_from_slice(key.as_bytes());
            Bytes::from(buf)
        }
    }

    fn raw_set_namespaced(&self, key: &str, encoded: &Bytes, expire: Option<Duration>) -> Result<bool, CacheError> {
        self.client
            .raw_set(&self.namespaced(key), encoded, expire.unwrap_or(self.default_expire))
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes, CacheError> {
        let json_value = serde_json::to_value(value)?;
        Ok(self.serializer.encode(&json_value)?)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CacheError> {
        let json_value = self.serializer.decode(bytes)?;
        Ok(serde_json::from_value(json_value)?)
    }

    /// Encoded values that should bypass caching entirely (§6
    /// `bypass_values`, compared against the encoded form — see
    /// `DESIGN.md` OQ-2).
    fn is_bypass_value(&self, encoded: &Bytes) -> bool {
        self.bypass_values.iter().any(|bypass| bypass == encoded)
    }

    /// Fetches and deserializes `key`, or `None` if absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let raw = self.client.raw_get(&self.namespaced(key))?;
        raw.map(|bytes| self.decode(&bytes)).transpose()
    }

    /// Serializes and stores `value` under `key`, expiring after `expire`
    /// (or the cache's default).
    pub fn set<T: Serialize>(&self, key: &str, value: &T, expire: Option<Duration>) -> Result<bool, CacheError> {
        let encoded = self.encode(value)?;
        self.raw_set_namespaced(key, &encoded, expire)
    }

    /// Deletes `key`.
    pub fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.client.raw_delete(&self.namespaced(key))
    }

    /// Fetches and deserializes many keys, aligned with `keys`' order.
    pub fn get_many<T: DeserializeOwned>(&self, keys: &[&str]) -> Result<Vec<Option<T>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let namespaced: Vec<Bytes> = keys.iter().map(|key| self.namespaced(key)).collect();
        let raws = self.client.raw_get_many(&namespaced)?;
        raws.into_iter()
            .map(|raw| raw.map(|bytes| self.decode(&bytes)).transpose())
            .collect()
    }

    /// Serializes and stores every entry of `mapping`. Returns `true` only
    /// if every key was set.
    pub fn set_many<T: Serialize>(&self, mapping: &[(&str, T)], expire: Option<Duration>) -> Result<bool, CacheError> {
        if mapping.is_empty() {
            return Ok(true);
        }
        let expire = expire.unwrap_or(self.default_expire);
        let mut encoded = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            encoded.push((self.namespaced(key), self.encode(value)?));
        }
        self.client.raw_set_many(&encoded, expire)
    }

    /// Deletes every key in `keys`. Returns `true` only if every key
    /// existed and was deleted.
    pub fn delete_many(&self, keys: &[&str]) -> Result<bool, CacheError> {
        if keys.is_empty() {
            return Ok(true);
        }
        let namespaced: Vec<Bytes> = keys.iter().map(|key| self.namespaced(key)).collect();
        self.client.raw_delete_many(&namespaced)
    }

    /// Returns `value` from cache if present, otherwise runs `compute`,
    /// caches its (non-bypass) result, and returns it — mirrors
    /// `rc.cache.BaseCache.cache`'s decorator body. In batch mode the call
    /// is queued instead and a pending [`CachedValue::Pending`] promise is
    /// returned immediately.
    ///
    /// Callers supply `module`/`func`/`pos_args`/`kwargs` explicitly rather
    /// than through reflection (Rust has none): the same tuple must be
    /// passed again to [`Self::invalidate`] to evict this entry.
    pub fn memoize<T, F>(
        &self,
        module: &str,
        func: &str,
        key_prefix: Option<&str>,
        pos_args: &[&str],
        kwargs: &[KwArg],
        expire: Option<Duration>,
        compute: F,
    ) -> Result<CachedValue<T>, CacheError>
    where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
        F: FnOnce() -> T + 'static,
    {
        let cache_key = derive_key(key_prefix, module, func, pos_args, kwargs);
        if self.running_mode.get() == RunningMode::Batch {
            trace!(cache_key, "queueing memoized call for batch drain");
            let promise = Promise::new();
            self.pending_operations.borrow_mut().push(Box::new(PendingCall::new(
                cache_key,
                expire,
                compute,
                promise.clone(),
            )));
            return Ok(CachedValue::Pending(promise));
        }
        match self.get::<T>(&cache_key)? {
            Some(value) => Ok(CachedValue::Ready(value)),
            None => {
                let value = compute();
                let encoded = self.encode(&value)?;
                if !self.is_bypass_value(&encoded) {
                    self.raw_set_namespaced(&cache_key, &encoded, expire)?;
                }
                // Always re-decode the freshly encoded bytes so a miss and a
                // later hit return the identical value (§4.H).
                Ok(CachedValue::Ready(self.decode(&encoded)?))
            }
        }
    }

    /// Evicts the entry [`Self::memoize`] would have written for the same
    /// `module`/`func`/`key_prefix`/`pos_args`/`kwargs` tuple.
    pub fn invalidate(
        &self,
        module: &str,
        func: &str,
        key_prefix: Option<&str>,
        pos_args: &[&str],
        kwargs: &[KwArg],
    ) -> Result<bool, CacheError> {
        let cache_key = derive_key(key_prefix, module, func, pos_args, kwargs);
        self.delete(&cache_key)
    }

    /// Enters batch mode: subsequent [`Self::memoize`] calls queue instead
    /// of running immediately. Not thread-safe while the returned
    /// [`BatchScope`] is alive, matching the original's own warning.
    pub fn batch_mode(&self) -> BatchScope<'_, C> {
        self.running_mode.set(RunningMode::Batch);
        BatchScope {
            cache: self,
            finished: false,
        }
    }

    /// Drains every queued `memoize` call: one `mget` across all their
    /// cache keys, then per-entry miss handling and promise resolution,
    /// exactly as `rc.cache.BaseCache.batch`. `cancel = true` discards the
    /// queue without running any of it.
    fn batch(&self, cancel: bool) -> Result<(), CacheError> {
        if self.running_mode.get() != RunningMode::Batch {
            return Err(CacheError::BatchState("batch() called outside batch mode"));
        }
        let pending: Vec<Box<dyn PendingOp<C>>> = self.pending_operations.borrow_mut().drain(..).collect();
        self.running_mode.set(RunningMode::Normal);
        if cancel || pending.is_empty() {
            return Ok(());
        }
        let cache_keys: Vec<Bytes> = pending.iter().map(|op| self.namespaced(op.cache_key())).collect();
        let raws = self.client.raw_get_many(&cache_keys)?;
        for (op, raw) in pending.into_iter().zip(raws) {
            op.resolve(self, raw)?;
        }
        Ok(())
    }
}

/// RAII handle for a batch-mode session opened by [`BaseCache::batch_mode`].
///
/// Call [`Self::finish`] to drain and resolve every queued call, or
/// [`Self::cancel`] to discard the queue. Dropping the scope without either
/// cancels the queue and logs a warning, so a panic mid-batch cannot leave
/// `running_mode` stuck on `Batch`.
pub struct BatchScope<'a, C: CacheOps> {
    cache: &'a BaseCache<C>,
    finished: bool,
}

impl<'a, C: CacheOps> BatchScope<'a, C> {
    /// Drains and resolves every call queued since [`BaseCache::batch_mode`].
    pub fn finish(mut self) -> Result<(), CacheError> {
        self.finished = true;
        self.cache.batch(false)
    }

    /// Discards every call queued since [`BaseCache::batch_mode`] without
    /// running any of them.
    pub fn cancel(mut self) {
        self.finished = true;
        let _ = self.cache.batch(true);
    }
}

impl<'a, C: CacheOps> Drop for BatchScope<'a, C> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("batch scope dropped without finish()/cancel(); cancelling pending operations");
            let _ = self.cache.batch(true);
        }
    }
}

/// A cache backed by a single Redis endpoint.
///
/// Explicitly in scope for this port even though it is "a trivial
/// specialization" of the cluster path: it is built on the very same
/// [`ClusterClient`] fan-out engine with a one-entry host map, so it
/// exercises [`CacheOps`] without a second client implementation to
/// maintain (see `DESIGN.md`).
pub struct Cache(BaseCache<ClusterClient>);

impl Cache {
    /// Connects to a single Redis endpoint described by `host_config`.
    pub fn connect(host_config: HostConfig, config: CacheConfig) -> Self {
        let host_name = host_config.host_name().to_owned();
        let mut hosts = HostMap::new();
        hosts.insert(SmolStr::new(&host_name), host_config);
        Cache(build_cluster_client(ClusterConfig::new(hosts).with_cache_config(config)))
    }
}

impl Deref for Cache {
    type Target = BaseCache<ClusterClient>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Cache {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// A cache sharded across many Redis endpoints via a [`Router`].
pub struct ClusterCache(BaseCache<ClusterClient>);

impl ClusterCache {
    /// Builds a cluster cache from `config`.
    pub fn new(config: ClusterConfig) -> Self {
        ClusterCache(build_cluster_client(config))
    }
}

impl Deref for ClusterCache {
    type Target = BaseCache<ClusterClient>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for ClusterCache {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

fn build_cluster_client(config: ClusterConfig) -> BaseCache<ClusterClient> {
    let ClusterConfig {
        hosts,
        router_kind,
        ring_weights,
        pool_max_size,
        max_concurrency,
        poller_timeout,
        cache,
    } = config;
    let hosts = Arc::new(hosts);
    let router: Box<dyn Router + Send + Sync> = match router_kind {
        RouterKind::Crc32 => Box::new(Crc32Router::new(&hosts)),
        RouterKind::Consistent => Box::new(KetamaRouter::with_weights(&hosts, ring_weights)),
    };
    let pool_manager = ClusterPoolManager::new(Arc::clone(&hosts), pool_max_size);
    let client = ClusterClient::new(hosts, router, pool_manager, max_concurrency, poller_timeout);
    BaseCache::new(client, cache)
}
