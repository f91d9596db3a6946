//! Routing, hashing, and key-derivation primitives shared by the shardcache
//! cluster client.
//!
//! This crate holds the parts of the cluster client that do not need a
//! socket: the consistent-hash ring, the two router strategies built on top
//! of it, the static host topology types, the batch-mode promise, and the
//! textual key derivation used by memoized functions. The connection pool,
//! readiness poller, and the wire-level pieces live in `shardcache-backend`
//! and `shardcache-redis`.

pub mod host;
pub mod memo_key;
pub mod promise;
pub mod ring;
pub mod router;

pub use host::{ConnectionMode, HostConfig, HostMap};
pub use memo_key::{KwArg, derive_key, strip_receiver};
pub use promise::{Promise, PromiseError};
pub use ring::HashRing;
pub use router::{Crc32Router, KetamaRouter, RoutableCommand, Router, RouterError};
