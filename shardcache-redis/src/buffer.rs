//! Per-shard pipeline: accumulates commands for one shard, writes them
//! non-blocking, and parses responses back in order once fully sent.

use crate::error::ClusterError;
use bytes::Bytes;
use shardcache_backend::pool::PoolInner;
use shardcache_backend::{Connection, Reply, pack_command};
use smol_str::SmolStr;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Weak;
use tracing::trace;

/// The logical command this buffer is pipelining.
///
/// `Mget` and `Del` collapse every queued key into one multi-key server
/// command; the others are encoded one command per queued entry (used when
/// the fan-out engine pipelines `SETEX` for `set_many` on the cluster
/// variant).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// `GET key`
    Get,
    /// `SETEX key seconds value`
    Setex,
    /// `DEL key [key ...]` — collapses.
    Del,
    /// `MGET key [key ...]` — collapses.
    Mget,
}

impl CommandKind {
    pub(crate) fn redis_name(self) -> &'static str {
        match self {
            CommandKind::Get => "GET",
            CommandKind::Setex => "SETEX",
            CommandKind::Del => "DEL",
            CommandKind::Mget => "MGET",
        }
    }

    fn collapses(self) -> bool {
        matches!(self, CommandKind::Del | CommandKind::Mget)
    }
}

/// One per `(shard, active fan-out)`.
///
/// Invariant (§3): at most one of "queued commands remain unencoded",
/// "bytes remain unwritten", or "parses remain pending" is allowed to be
/// true for [`CommandBuffer::has_pending_request`] to report `false` — once
/// it does, the buffer is ready to be parsed via [`CommandBuffer::fetch_response`].
pub struct CommandBuffer {
    host_name: SmolStr,
    connection: Connection,
    birth_pool: Weak<PoolInner>,
    kind: CommandKind,
    /// Arg-tuples not yet encoded; `args[0]` is always the routing key.
    queued: VecDeque<Vec<Bytes>>,
    /// Keys already encoded into `send_chunks`, awaiting their reply, in
    /// send order.
    pending_keys: VecDeque<Bytes>,
    /// Encoded byte chunks not yet fully written to the socket.
    send_chunks: VecDeque<Vec<u8>>,
}

impl CommandBuffer {
    /// Creates a buffer over a freshly acquired, already-connected
    /// connection (§4.E: "connect it eagerly").
    pub fn new(
        host_name: impl Into<SmolStr>,
        connection: Connection,
        birth_pool: Weak<PoolInner>,
        kind: CommandKind,
    ) -> Self {
        CommandBuffer {
            host_name: host_name.into(),
            connection,
            birth_pool,
            kind,
            queued: VecDeque::new(),
            pending_keys: VecDeque::new(),
            send_chunks: VecDeque::new(),
        }
    }

    /// The shard this buffer is pipelining commands to.
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// The raw fd used for readiness registration.
    pub fn socket_fd(&self) -> Option<std::os::fd::RawFd> {
        self.connection.socket_fd()
    }

    /// Queues one arg-tuple (`args[0]` is the routing key).
    pub fn enqueue(&mut self, args: Vec<Bytes>) {
        self.queued.push_back(args);
    }

    /// `true` while there is unencoded work, unwritten bytes, or (when
    /// `false`) the buffer is ready for [`Self::fetch_response`].
    pub fn has_pending_request(&self) -> bool {
        !self.queued.is_empty() || !self.send_chunks.is_empty()
    }

    /// Encodes any newly queued commands (first call only, per the queue
    /// being drained into `pending_keys`/`send_chunks`) and attempts a
    /// non-blocking write of whatever bytes remain.
    ///
    /// Returns `true` once everything has been written (i.e.
    /// `has_pending_request()` would now report `false`).
    pub fn send_pending_request(&mut self) -> Result<bool, ClusterError> {
        if !self.queued.is_empty() {
            self.encode_queued();
        }
        if self.send_chunks.is_empty() {
            return Ok(true);
        }
        self.try_send_buffer()?;
        Ok(self.send_chunks.is_empty())
    }

    fn encode_queued(&mut self) {
        let queued = std::mem::take(&mut self.queued);
        if self.kind.collapses() {
            let mut args: Vec<Bytes> = vec![Bytes::from_static(self.kind.redis_name().as_bytes())];
            for entry in &queued {
                args.push(entry[0].clone());
                self.pending_keys.push_back(entry[0].clone());
            }
            let arg_refs: Vec<&[u8]> = args.iter().map(|a| a.as_ref()).collect();
            self.send_chunks.push_back(pack_command(&arg_refs));
        } else {
            let verb = Bytes::from_static(self.kind.redis_name().as_bytes());
            for entry in &queued {
                self.pending_keys.push_back(entry[0].clone());
                let mut arg_refs: Vec<&[u8]> = Vec::with_capacity(entry.len() + 1);
                arg_refs.push(verb.as_ref());
                arg_refs.extend(entry.iter().map(|a| a.as_ref()));
                self.send_chunks.push_back(pack_command(&arg_refs));
            }
        }
    }

    /// Non-blocking write of `send_chunks`: `WouldBlock` stops for this
    /// tick, a short write keeps the unsent tail for the next attempt, any
    /// other I/O error disconnects the connection and propagates.
    fn try_send_buffer(&mut self) -> Result<(), ClusterError> {
        self.connection
            .set_nonblocking(true)
            .map_err(ClusterError::Backend)?;
        let result = self.drain_send_chunks();
        // Best-effort: restore blocking mode regardless of the write outcome.
        let _ = self.connection.set_nonblocking(false);
        result
    }

    fn drain_send_chunks(&mut self) -> Result<(), ClusterError> {
        while let Some(chunk) = self.send_chunks.front_mut() {
            match self.connection.try_write(chunk) {
                Ok(sent) if sent == chunk.len() => {
                    self.send_chunks.pop_front();
                }
                Ok(sent) => {
                    chunk.drain(0..sent);
                    break;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    self.connection.disconnect();
                    return Err(ClusterError::Io {
                        host: self.host_name.to_string(),
                        source: err,
                    });
                }
            }
        }
        Ok(())
    }

    /// Parses responses for every pending key. Precondition:
    /// `has_pending_request()` is `false`.
    ///
    /// `DEL`'s collapsed integer reply is expanded into a per-key `1`/`0`
    /// vector by marking the first *k* pending keys deleted and the rest
    /// not — lossy about *which* keys existed, acceptable because the
    /// fan-out engine only ever sums the result (§4.E, open question OQ-1
    /// in `DESIGN.md`).
    pub fn fetch_response(&mut self) -> Result<HashMap<Bytes, Reply>, ClusterError> {
        if self.has_pending_request() {
            return Err(ClusterError::PrematureFetch);
        }
        let mut results = HashMap::with_capacity(self.pending_keys.len());
        if self.kind.collapses() {
            let reply = self.read_one_reply()?;
            match self.kind {
                CommandKind::Mget => {
                    let items = reply.into_array().map_err(|source| ClusterError::Protocol {
                        host: self.host_name.to_string(),
                        source,
                    })?;
                    for (key, item) in self.pending_keys.drain(..).zip(items) {
                        results.insert(key, item);
                    }
                }
                CommandKind::Del => {
                    let deleted = reply.into_integer().map_err(|source| ClusterError::Protocol {
                        host: self.host_name.to_string(),
                        source,
                    })?;
                    let deleted = deleted.max(0) as usize;
                    let keys: Vec<Bytes> = self.pending_keys.drain(..).collect();
                    for (i, key) in keys.into_iter().enumerate() {
                        let value = if i < deleted { 1 } else { 0 };
                        results.insert(key, Reply::Integer(value));
                    }
                }
                _ => unreachable!("only Mget/Del collapse"),
            }
        } else {
            let keys: Vec<Bytes> = self.pending_keys.drain(..).collect();
            for key in keys {
                let reply = self.read_one_reply()?;
                results.insert(key, reply);
            }
        }
        Ok(results)
    }

    fn read_one_reply(&mut self) -> Result<Reply, ClusterError> {
        loop {
            if let Some(reply) = self
                .connection
                .try_parse_one()
                .map_err(|source| ClusterError::Backend(source))?
            {
                return Ok(reply);
            }
            match self.connection.try_read_into_decoder() {
                Ok(_) => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    // The caller drives us from inside the poller loop; a
                    // transient WouldBlock here just means "try again" since
                    // fetch_response is only invoked once the poller marked
                    // us readable with no pending writes outstanding.
                    continue;
                }
                Err(err) => {
                    self.connection.disconnect();
                    return Err(ClusterError::Io {
                        host: self.host_name.to_string(),
                        source: err,
                    });
                }
            }
        }
    }

    /// Tears the buffer down, returning its connection and birth-pool tag
    /// so the caller can release it.
    pub fn into_connection(self) -> (Connection, Weak<PoolInner>) {
        trace!(host = %self.host_name, "releasing shard buffer");
        (self.connection, self.birth_pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_kind_collapse_rule_matches_spec() {
        assert!(CommandKind::Mget.collapses());
        assert!(CommandKind::Del.collapses());
        assert!(!CommandKind::Setex.collapses());
        assert!(!CommandKind::Get.collapses());
    }
}
