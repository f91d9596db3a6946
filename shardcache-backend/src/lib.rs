//! Connection pooling, readiness polling, and the RESP wire codec backing
//! the shardcache cluster client.
//!
//! This crate owns everything between "I have a `HostConfig`" and "I have
//! bytes parsed off a live socket": per-host connection pools with a
//! cluster-wide façade, a uniform readiness-polling interface over many
//! shard sockets, and a minimal RESP encoder/decoder. The per-shard command
//! buffer and the multi-key fan-out engine built on top of these live in
//! `shardcache-redis`.

pub mod connection;
pub mod error;
pub mod poller;
pub mod pool;
pub mod resp;

pub use connection::Connection;
pub use error::BackendError;
pub use poller::{Poller, ReadinessPoller};
pub use pool::{ClusterPoolManager, HostPool, PooledConnection};
pub use resp::{Reply, RespDecoder, RespError, pack_command, pack_commands};
