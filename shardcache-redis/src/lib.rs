//! Per-shard command pipelining and the multi-key fan-out engine for a
//! sharded Redis cluster client.
//!
//! Builds on `shardcache-core` (routing, hashing) and `shardcache-backend`
//! (pooling, readiness polling, RESP) to implement the cluster client's
//! single-key passthroughs and its `mget`/`mset_with_expiry`/`mdelete`
//! multi-socket fan-out.

pub mod buffer;
pub mod cluster;
pub mod error;

pub use buffer::{CommandBuffer, CommandKind};
pub use cluster::{ClusterClient, DEFAULT_MAX_CONCURRENCY};
pub use error::ClusterError;
