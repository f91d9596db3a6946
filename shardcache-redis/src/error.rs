//! Error types for the command buffer and cluster fan-out engine.

use shardcache_backend::{BackendError, RespError};
use shardcache_core::RouterError;
use std::io;
use thiserror::Error;

/// Errors raised by [`crate::buffer::CommandBuffer`] and
/// [`crate::cluster::ClusterClient`].
#[derive(Debug, Error)]
pub enum ClusterError {
    /// A key or command could not be routed to a shard.
    #[error(transparent)]
    Routing(#[from] RouterError),

    /// A pool- or connection-level failure from `shardcache-backend`.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A non-blocking socket operation failed outside the classified
    /// backend error paths (surfaced directly by the command buffer's
    /// send/receive loop).
    #[error("I/O error talking to \"{host}\": {source}")]
    Io {
        /// The shard this buffer belonged to.
        host: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The server returned a reply shape that did not match the command
    /// that produced it.
    #[error("protocol error talking to \"{host}\": {source}")]
    Protocol {
        /// The shard this buffer belonged to.
        host: String,
        /// The RESP-level failure.
        #[source]
        source: RespError,
    },

    /// [`crate::buffer::CommandBuffer::fetch_response`] was called while
    /// `has_pending_request()` was still `true`.
    #[error("fetch_response called with requests still pending")]
    PrematureFetch,
}
