//! Per-host connection pools and the cluster-wide pool façade that ties
//! them to a static host map.

use crate::connection::Connection;
use crate::error::BackendError;
use shardcache_core::{HostConfig, HostMap};
use smol_str::SmolStr;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, Weak};
use tracing::trace;

/// Opaque handle to a per-host pool's shared state.
///
/// Named only so a [`Weak`] reference to it can cross crate boundaries
/// (e.g. into a command buffer holding a connection's birth-pool tag); all
/// of its behavior is reached through [`HostPool`] and
/// [`ClusterPoolManager`].
pub struct PoolInner {
    config: HostConfig,
    max_size: usize,
    idle: Mutex<Vec<Connection>>,
}

impl PoolInner {
    fn release(&self, conn: Connection) {
        if !conn.is_connected() {
            return;
        }
        let mut idle = self.idle.lock().unwrap();
        if idle.len() < self.max_size {
            idle.push(conn);
        }
    }
}

/// A bounded, reusable set of live connections to one Redis endpoint.
///
/// Built lazily: the first `acquire` opens a connection per the host's
/// transport options; every connection returned to the pool via `release`
/// is kept around (up to `max_size`) for the next `acquire` to reuse.
#[derive(Clone)]
pub struct HostPool(Arc<PoolInner>);

impl HostPool {
    /// Creates a pool for `config`, bounded at `max_size` idle connections.
    pub fn new(config: HostConfig, max_size: usize) -> Self {
        HostPool(Arc::new(PoolInner {
            config,
            max_size,
            idle: Mutex::new(Vec::new()),
        }))
    }

    /// Reuses an idle connection if one is available and still live,
    /// otherwise opens a fresh one.
    ///
    /// `command_name` is accepted to mirror the source system's per-command
    /// acquisition hook; this port has no command-specific pooling policy,
    /// so it is unused beyond tracing context.
    pub fn acquire(&self, command_name: &str) -> Result<Connection, BackendError> {
        trace!(host = self.0.config.host_name(), command_name, "acquiring connection");
        loop {
            let candidate = self.0.idle.lock().unwrap().pop();
            match candidate {
                Some(conn) if conn.is_connected() => return Ok(conn),
                Some(_) => continue,
                None => break,
            }
        }
        Connection::connect(&self.0.config)
    }

    /// Returns `conn` to this pool's idle set (dropped if already full or
    /// disconnected).
    pub fn release(&self, conn: Connection) {
        self.0.release(conn);
    }

    fn downgrade(&self) -> Weak<PoolInner> {
        Arc::downgrade(&self.0)
    }
}

/// A connection checked out through a [`ClusterPoolManager`], tagged with a
/// weak back-pointer to the per-host pool it was born from.
///
/// The weak tag is what lets [`ClusterPoolManager::release`] always return
/// the connection to its birth pool, even when called through a different
/// `ClusterPoolManager` view constructed over the same host map (multiple
/// cluster views sharing host pools stay safe).
pub struct PooledConnection {
    conn: Connection,
    birth_pool: Weak<PoolInner>,
}

impl Deref for PooledConnection {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

impl PooledConnection {
    /// Splits the connection from its birth-pool tag, e.g. so a command
    /// buffer can hold the bare [`Connection`] and release it later.
    pub fn into_parts(self) -> (Connection, Weak<PoolInner>) {
        (self.conn, self.birth_pool)
    }
}

/// Lazily creates and caches one [`HostPool`] per shard, resolving host
/// names against a shared, immutable [`HostMap`].
pub struct ClusterPoolManager {
    hosts: Arc<HostMap>,
    pools: Mutex<HashMap<SmolStr, HostPool>>,
    max_size: usize,
}

impl ClusterPoolManager {
    /// Creates a manager over `hosts`, each per-host pool bounded at
    /// `max_size` idle connections.
    pub fn new(hosts: Arc<HostMap>, max_size: usize) -> Self {
        ClusterPoolManager {
            hosts,
            pools: Mutex::new(HashMap::new()),
            max_size,
        }
    }

    fn pool_for(&self, host_name: &str) -> Result<HostPool, BackendError> {
        let mut pools = self.pools.lock().unwrap();
        if let Some(pool) = pools.get(host_name) {
            return Ok(pool.clone());
        }
        let config = self
            .hosts
            .get(host_name)
            .ok_or_else(|| BackendError::UnknownHost(host_name.to_owned()))?;
        let pool = HostPool::new(config.clone(), self.max_size);
        pools.insert(SmolStr::new(host_name), pool.clone());
        Ok(pool)
    }

    /// Acquires a connection to `host_name` from its (lazily created) pool.
    pub fn get_connection(
        &self,
        command_name: &str,
        host_name: &str,
    ) -> Result<PooledConnection, BackendError> {
        let pool = self.pool_for(host_name)?;
        let conn = pool.acquire(command_name)?;
        Ok(PooledConnection {
            conn,
            birth_pool: pool.downgrade(),
        })
    }

    /// Returns a connection to its birth pool, independent of which
    /// `ClusterPoolManager` requested it.
    pub fn release(&self, pooled: PooledConnection) {
        let (conn, birth_pool) = pooled.into_parts();
        if let Some(pool) = birth_pool.upgrade() {
            pool.release(conn);
        }
    }

    /// Releases a bare connection plus the weak tag it was checked out
    /// with, for callers (like the command buffer) that split a
    /// [`PooledConnection`] apart to hold the connection directly.
    pub fn release_parts(&self, conn: Connection, birth_pool: Weak<PoolInner>) {
        if let Some(pool) = birth_pool.upgrade() {
            pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardcache_core::HostConfig;

    #[test]
    fn unknown_host_is_a_config_error() {
        let hosts = Arc::new(HostMap::new());
        let manager = ClusterPoolManager::new(hosts, 4);
        let err = manager.get_connection("GET", "missing").unwrap_err();
        assert!(matches!(err, BackendError::UnknownHost(h) if h == "missing"));
    }

    #[test]
    fn pool_for_is_memoized_per_host() {
        let mut hosts = HostMap::new();
        hosts.insert(
            "a".into(),
            HostConfig::tcp("a", "127.0.0.1", 1),
        );
        let manager = ClusterPoolManager::new(Arc::new(hosts), 4);
        let first = manager.pool_for("a").unwrap();
        let second = manager.pool_for("a").unwrap();
        assert!(Arc::ptr_eq(&first.0, &second.0));
    }
}
