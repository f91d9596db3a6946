//! Error types shared by the connection, pool and poller modules.

use crate::resp::RespError;
use std::io;
use thiserror::Error;

/// Errors raised while establishing, using or pooling a connection to one
/// shard.
///
/// Categorizes the source system's abstract *Connection*, *Timeout* and
/// *Protocol* error kinds (§7) into a single enum per connection-level
/// operation; the façade crate aggregates this into its top-level
/// `CacheError`.
#[derive(Debug, Error)]
pub enum BackendError {
    /// A socket-level I/O failure during connect, send or receive. The
    /// connection has already been disconnected by the time this is
    /// returned.
    #[error("connection error talking to \"{host}\": {source}")]
    Connection {
        /// The shard this connection belonged to.
        host: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A socket operation exceeded its configured timeout. The connection
    /// has already been disconnected.
    #[error("timeout talking to \"{host}\"")]
    Timeout {
        /// The shard this connection belonged to.
        host: String,
    },
    /// The server returned a reply shape the caller did not expect.
    #[error("protocol error talking to \"{host}\": {source}")]
    Protocol {
        /// The shard this connection belonged to.
        host: String,
        /// The RESP-level failure.
        #[source]
        source: RespError,
    },
    /// The pool has no configuration for the requested host name.
    #[error("unknown host \"{0}\"")]
    UnknownHost(String),
    /// TLS was requested for a host but this build has no TLS support.
    #[error("TLS requested for \"{0}\" but this build has no TLS support")]
    TlsUnsupported(String),
}

impl BackendError {
    /// The host name this error occurred against, if any.
    pub fn host(&self) -> Option<&str> {
        match self {
            BackendError::Connection { host, .. }
            | BackendError::Timeout { host }
            | BackendError::Protocol { host, .. } => Some(host),
            BackendError::UnknownHost(host) | BackendError::TlsUnsupported(host) => Some(host),
        }
    }

    /// `true` for the errors that, per §7, allow one retry on the
    /// single-key path (connection and timeout failures, not protocol or
    /// configuration failures).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Connection { .. } | BackendError::Timeout { .. }
        )
    }

    /// `true` specifically for timeout failures, used to gate §7's
    /// `retry_on_timeout` policy.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::Timeout { .. })
    }
}
