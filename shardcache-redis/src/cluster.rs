//! The multi-key fan-out engine: routes, drives many shard sockets through
//! one readiness poller, and reassembles results in caller order.

use crate::buffer::{CommandBuffer, CommandKind};
use crate::error::ClusterError;
use bytes::Bytes;
use shardcache_backend::poller::Poller;
use shardcache_backend::{ClusterPoolManager, ReadinessPoller, Reply};
use shardcache_core::{HostMap, RoutableCommand, Router};
use smol_str::SmolStr;
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Default cap on shard sockets driven concurrently by one fan-out call
/// (§5).
pub const DEFAULT_MAX_CONCURRENCY: usize = 64;

/// The cluster client: routing plus the multi-key fan-out engine, backed by
/// a shared pool manager.
pub struct ClusterClient {
    hosts: Arc<HostMap>,
    router: Box<dyn Router + Send + Sync>,
    pool_manager: ClusterPoolManager,
    max_concurrency: usize,
    poller_timeout: Option<Duration>,
}

impl ClusterClient {
    /// Builds a cluster client over `hosts`, routed by `router` and pooled
    /// through `pool_manager`.
    pub fn new(
        hosts: Arc<HostMap>,
        router: Box<dyn Router + Send + Sync>,
        pool_manager: ClusterPoolManager,
        max_concurrency: usize,
        poller_timeout: Option<Duration>,
    ) -> Self {
        ClusterClient {
            hosts,
            router,
            pool_manager,
            max_concurrency: max_concurrency.max(1),
            poller_timeout,
        }
    }

    fn should_retry(&self, host_name: &str, err: &shardcache_backend::BackendError) -> bool {
        if !err.is_retryable() {
            return false;
        }
        if err.is_timeout() {
            self.hosts
                .get(host_name)
                .map(|h| h.retry_on_timeout())
                .unwrap_or(true)
        } else {
            true
        }
    }

    /// Executes a single-key command on the blocking path, retrying once
    /// on a connection or (if configured) timeout failure — never on a
    /// protocol error, and never more than once, to avoid duplicate
    /// side-effects on `SETEX`/`DEL` (§7).
    fn execute_single(&self, command: RoutableCommand, args: &[&[u8]]) -> Result<Reply, ClusterError> {
        let host_name = self.router.host_for_command(command, args)?.to_owned();
        let mut wire_args: Vec<&[u8]> = Vec::with_capacity(args.len() + 1);
        wire_args.push(command.as_str().as_bytes());
        wire_args.extend_from_slice(args);
        let attempt = || -> Result<Reply, ClusterError> {
            let mut pooled = self.pool_manager.get_connection(command.as_str(), &host_name)?;
            let outcome = (|| {
                pooled.send_command(&wire_args).map_err(ClusterError::Backend)?;
                pooled.parse_response().map_err(ClusterError::Backend)
            })();
            self.pool_manager.release(pooled);
            outcome
        };
        match attempt() {
            Err(ClusterError::Backend(err)) if self.should_retry(&host_name, &err) => {
                trace!(host = %host_name, "retrying single-key command once");
                attempt()
            }
            other => other,
        }
    }

    /// `GET key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>, ClusterError> {
        let reply = self.execute_single(RoutableCommand::Get, &[key])?;
        reply.into_bulk().map_err(|source| ClusterError::Protocol {
            host: "?".into(),
            source,
        })
    }

    /// `SET key value`
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<bool, ClusterError> {
        let reply = self.execute_single(RoutableCommand::Set, &[key, value])?;
        Ok(matches!(reply, Reply::Simple(_)))
    }

    /// `SETEX key seconds value`
    pub fn setex(&self, key: &[u8], seconds: u64, value: &[u8]) -> Result<bool, ClusterError> {
        let seconds_str = seconds.to_string();
        let reply = self.execute_single(
            RoutableCommand::Setex,
            &[key, seconds_str.as_bytes(), value],
        )?;
        Ok(matches!(reply, Reply::Simple(_)))
    }

    /// `DEL key`
    pub fn del(&self, key: &[u8]) -> Result<bool, ClusterError> {
        let reply = self.execute_single(RoutableCommand::Del, &[key])?;
        Ok(reply.into_integer().unwrap_or(0) > 0)
    }

    /// Partitions `keys` across shards, drives them concurrently (capped at
    /// `max_concurrency`), and returns values aligned with `keys`' order
    /// regardless of which shard responded first.
    pub fn mget(&self, keys: &[Bytes]) -> Result<Vec<Option<Bytes>>, ClusterError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut buffers: HashMap<SmolStr, CommandBuffer> = HashMap::new();
        for key in keys {
            let host_name = self.router.host_for_key(key).to_owned();
            let buffer = self.buffer_for(&mut buffers, &host_name, CommandKind::Mget)?;
            buffer.enqueue(vec![key.clone()]);
        }
        let results = self.drive_buffers(buffers.into_values().collect())?;
        keys.iter()
            .map(|key| match results.get(key) {
                Some(reply) => reply.clone().into_bulk().map_err(|source| ClusterError::Protocol {
                    host: "?".into(),
                    source,
                }),
                None => Ok(None),
            })
            .collect()
    }

    /// Pipelines one `SETEX` per entry of `mapping`, fanned out by shard.
    /// Returns `true` only if every shard's every `SETEX` succeeded.
    pub fn mset_with_expiry(&self, mapping: &[(Bytes, Bytes)], ttl: Duration) -> Result<bool, ClusterError> {
        if mapping.is_empty() {
            return Ok(true);
        }
        let ttl_secs = Bytes::from(ttl.as_secs().to_string());
        let mut buffers: HashMap<SmolStr, CommandBuffer> = HashMap::new();
        for (key, value) in mapping {
            let host_name = self.router.host_for_key(key).to_owned();
            let buffer = self.buffer_for(&mut buffers, &host_name, CommandKind::Setex)?;
            buffer.enqueue(vec![key.clone(), ttl_secs.clone(), value.clone()]);
        }
        let results = self.drive_buffers(buffers.into_values().collect())?;
        Ok(mapping
            .iter()
            .all(|(key, _)| matches!(results.get(key), Some(Reply::Simple(_)))))
    }

    /// Collapses `keys` into one `DEL` per shard and returns the total
    /// number of keys actually deleted (summed across shards; see
    /// `CommandBuffer::fetch_response` for the per-shard reconstruction).
    pub fn mdelete(&self, keys: &[Bytes]) -> Result<usize, ClusterError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut buffers: HashMap<SmolStr, CommandBuffer> = HashMap::new();
        for key in keys {
            let host_name = self.router.host_for_key(key).to_owned();
            let buffer = self.buffer_for(&mut buffers, &host_name, CommandKind::Del)?;
            buffer.enqueue(vec![key.clone()]);
        }
        let results = self.drive_buffers(buffers.into_values().collect())?;
        Ok(keys
            .iter()
            .filter(|key| matches!(results.get(*key), Some(Reply::Integer(1))))
            .count())
    }

    fn buffer_for<'a>(
        &self,
        buffers: &'a mut HashMap<SmolStr, CommandBuffer>,
        host_name: &str,
        kind: CommandKind,
    ) -> Result<&'a mut CommandBuffer, ClusterError> {
        if !buffers.contains_key(host_name) {
            let pooled = self.pool_manager.get_connection(kind.redis_name(), host_name)?;
            let (conn, birth_pool) = pooled.into_parts();
            buffers.insert(
                SmolStr::new(host_name),
                CommandBuffer::new(host_name, conn, birth_pool, kind),
            );
        }
        Ok(buffers.get_mut(host_name).expect("just inserted"))
    }

    /// Drives every buffer to completion, `max_concurrency` at a time, and
    /// releases each chunk's connections back to their pools as it
    /// finishes.
    fn drive_buffers(&self, mut buffers: Vec<CommandBuffer>) -> Result<HashMap<Bytes, Reply>, ClusterError> {
        let mut results = HashMap::new();
        while !buffers.is_empty() {
            let chunk_len = buffers.len().min(self.max_concurrency);
            let mut chunk: Vec<CommandBuffer> = buffers.drain(0..chunk_len).collect();
            debug!(chunk_len, "driving fan-out chunk");
            self.drive_chunk(&mut chunk, &mut results)?;
            for buf in chunk {
                let (conn, birth_pool) = buf.into_connection();
                self.pool_manager.release_parts(conn, birth_pool);
            }
        }
        Ok(results)
    }

    fn drive_chunk(
        &self,
        chunk: &mut [CommandBuffer],
        results: &mut HashMap<Bytes, Reply>,
    ) -> Result<(), ClusterError> {
        let sockets: Vec<(SmolStr, RawFd)> = chunk
            .iter()
            .filter_map(|buf| buf.socket_fd().map(|fd| (SmolStr::new(buf.host_name()), fd)))
            .collect();
        let index_by_host: HashMap<SmolStr, usize> = chunk
            .iter()
            .enumerate()
            .map(|(i, buf)| (SmolStr::new(buf.host_name()), i))
            .collect();
        let mut poller = ReadinessPoller::new(&sockets).map_err(|source| ClusterError::Io {
            host: "<poller>".into(),
            source,
        })?;

        while !poller.is_empty() {
            let (readable, writable) = poller.poll(self.poller_timeout).map_err(|source| ClusterError::Io {
                host: "<poller>".into(),
                source,
            })?;
            for host in &writable {
                if let Some(&idx) = index_by_host.get(host) {
                    let buf = &mut chunk[idx];
                    if buf.has_pending_request() {
                        buf.send_pending_request()?;
                    }
                }
            }
            for host in &readable {
                if let Some(&idx) = index_by_host.get(host) {
                    let buf = &mut chunk[idx];
                    if !buf.has_pending_request() {
                        let parsed = buf.fetch_response()?;
                        results.extend(parsed);
                        poller.pop(host);
                    }
                }
            }
        }
        Ok(())
    }
}
