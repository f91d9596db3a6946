//! Static shard topology: named hosts and how to reach them.

use smol_str::SmolStr;
use std::collections::HashMap;

/// How a single shard's connection is reached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionMode {
    /// A TCP endpoint, optionally wrapped in TLS.
    Tcp {
        /// Hostname or address.
        host: SmolStr,
        /// TCP port.
        port: u16,
        /// Wrap the connection in TLS.
        tls: bool,
    },
    /// A Unix domain socket.
    Unix {
        /// Filesystem path to the socket.
        path: SmolStr,
    },
}

/// Immutable configuration for one shard endpoint.
///
/// Two `HostConfig`s are equal iff their identifying tuple (transport, `db`,
/// TLS — `tls` lives inside `mode`) matches; `host_name`, `password` and
/// `retry_on_timeout` do not participate in identity, since `host_name` is
/// the stable identifier used everywhere else in the library (routing
/// results, pool keys, buffer bookkeeping) rather than part of what makes
/// two configurations "the same endpoint".
#[derive(Debug, Clone)]
pub struct HostConfig {
    host_name: SmolStr,
    mode: ConnectionMode,
    db: i64,
    password: Option<SmolStr>,
    /// Retry a single-key command once after a socket timeout. Defaults to
    /// `true`, matching `redis-py`'s `retry_on_timeout` connection flag.
    retry_on_timeout: bool,
}

impl PartialEq for HostConfig {
    fn eq(&self, other: &Self) -> bool {
        self.mode == other.mode && self.db == other.db
    }
}

impl Eq for HostConfig {}

impl std::hash::Hash for HostConfig {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.mode.hash(state);
        self.db.hash(state);
    }
}

impl HostConfig {
    /// Builds a TCP-backed host configuration.
    pub fn tcp(host_name: impl Into<SmolStr>, host: impl Into<SmolStr>, port: u16) -> Self {
        HostConfig {
            host_name: host_name.into(),
            mode: ConnectionMode::Tcp {
                host: host.into(),
                port,
                tls: false,
            },
            db: 0,
            password: None,
            retry_on_timeout: true,
        }
    }

    /// Builds a Unix-domain-socket-backed host configuration.
    pub fn unix(host_name: impl Into<SmolStr>, path: impl Into<SmolStr>) -> Self {
        HostConfig {
            host_name: host_name.into(),
            mode: ConnectionMode::Unix { path: path.into() },
            db: 0,
            password: None,
            retry_on_timeout: true,
        }
    }

    /// Selects the Redis logical database index (`SELECT`).
    #[must_use]
    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// Sets the `AUTH` password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<SmolStr>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Requests TLS for a TCP connection mode; a no-op for Unix sockets.
    #[must_use]
    pub fn with_tls(mut self, tls: bool) -> Self {
        if let ConnectionMode::Tcp { tls: t, .. } = &mut self.mode {
            *t = tls;
        }
        self
    }

    /// Configures whether single-key operations retry once after a timeout.
    #[must_use]
    pub fn with_retry_on_timeout(mut self, retry: bool) -> Self {
        self.retry_on_timeout = retry;
        self
    }

    /// The stable identifier for this host, used by routers, pools and
    /// command buffers.
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// The transport used to reach this host.
    pub fn mode(&self) -> &ConnectionMode {
        &self.mode
    }

    /// The selected logical database index.
    pub fn db(&self) -> i64 {
        self.db
    }

    /// The configured `AUTH` password, if any.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Whether single-key commands retry once after a socket timeout.
    pub fn retry_on_timeout(&self) -> bool {
        self.retry_on_timeout
    }
}

/// Immutable mapping from host name to its configuration.
///
/// Built once at construction and never mutated afterward. Every host name
/// later produced by a router is guaranteed to be a key of this map.
pub type HostMap = HashMap<SmolStr, HostConfig>;
