//! Top-level error type aggregating every lower crate's failures.

use shardcache_core::PromiseError;
use shardcache_redis::ClusterError;
use thiserror::Error;

/// Errors raised by the cache façade.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A routing, pool, or fan-out failure from `shardcache-redis`.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// A value failed to encode or decode through the configured
    /// [`crate::serializer::Serializer`].
    #[error(transparent)]
    Serializer(#[from] SerializerError),

    /// `serde_json` failed to convert a typed value to or from the
    /// serializer's `Value` intermediate form.
    #[error("value conversion failed: {0}")]
    ValueConversion(#[from] serde_json::Error),

    /// A batch-mode promise was resolved twice, which should be
    /// unreachable since [`crate::cache::BaseCache::batch`] resolves each
    /// pending operation's promise exactly once.
    #[error(transparent)]
    Promise(#[from] PromiseError),

    /// A batch-mode operation ([`crate::cache::BaseCache::batch`]) was
    /// called while not in batch mode, or vice versa.
    #[error("{0}")]
    BatchState(&'static str),
}

/// Errors raised while encoding or decoding a cached value.
#[derive(Debug, Error)]
pub enum SerializerError {
    /// `serde_json` failed to encode or decode the wire form.
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// `bincode` failed to encode or decode the wire form.
    #[error("bincode serialization error: {0}")]
    Bincode(String),
}
