//! Key → shard routing strategies.

use crate::host::HostMap;
use crate::ring::HashRing;
use smol_str::SmolStr;
use std::collections::HashMap;
use thiserror::Error;

/// A Redis command understood well enough to be routed to a single shard.
///
/// Only single-key commands are routable; multi-key commands (`MGET`,
/// `MSETEX`, pipelined `DEL`) are split into per-shard single-key arguments
/// upstream, by the fan-out engine, before routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutableCommand {
    /// `GET key`
    Get,
    /// `SET key value`
    Set,
    /// `SETEX key seconds value`
    Setex,
    /// `DEL key`
    Del,
}

impl RoutableCommand {
    /// Parses a command name, case-insensitively, into a routable command.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "SET" => Some(Self::Set),
            "SETEX" => Some(Self::Setex),
            "DEL" => Some(Self::Del),
            _ => None,
        }
    }

    /// The canonical upper-case command name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Set => "SET",
            Self::Setex => "SETEX",
            Self::Del => "DEL",
        }
    }
}

/// Errors raised while resolving a command or key to a shard.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    /// `command` has no single-key routing rule; it must be split upstream.
    #[error("the command \"{0}\" is not supported for routing")]
    UnsupportedCommand(SmolStr),
    /// A ketama lookup returned a node absent from the configured host map.
    #[error("consistent hash ring produced an unknown host")]
    UnknownHost,
}

/// Maps a command or a raw key to the shard that owns it.
///
/// Routing is a pure function of `(key, host set)`: `host_for_key` returns
/// the same answer across calls for the same router instance.
pub trait Router {
    /// Returns the host name that owns `key`.
    fn host_for_key(&self, key: &[u8]) -> &str;

    /// The routing key for `command`'s arguments, i.e. `args[0]` for every
    /// currently supported command.
    fn key_for_command<'a>(
        &self,
        command: RoutableCommand,
        args: &'a [&'a [u8]],
    ) -> Result<&'a [u8], RouterError> {
        let _ = command;
        args.first()
            .copied()
            .ok_or_else(|| RouterError::UnsupportedCommand(SmolStr::new("")))
    }

    /// Resolves `command`'s host by first deriving its routing key.
    fn host_for_command(
        &self,
        command: RoutableCommand,
        args: &[&[u8]],
    ) -> Result<&str, RouterError> {
        let key = self.key_for_command(command, args)?;
        Ok(self.host_for_key(key))
    }
}

/// Routes keys to shards by `crc32(key) mod N` over lexicographically
/// sorted host names.
///
/// Simple and cheap, at the cost of a full reshuffle whenever the host set
/// changes size.
pub struct Crc32Router {
    sorted_host_names: Vec<SmolStr>,
}

impl Crc32Router {
    /// Builds a router over `hosts`' keys, sorted once at construction.
    pub fn new(hosts: &HostMap) -> Self {
        let mut sorted_host_names: Vec<SmolStr> = hosts.keys().cloned().collect();
        sorted_host_names.sort();
        Crc32Router { sorted_host_names }
    }
}

impl Router for Crc32Router {
    fn host_for_key(&self, key: &[u8]) -> &str {
        let hash = crc32fast::hash(key);
        let idx = (hash as usize) % self.sorted_host_names.len();
        &self.sorted_host_names[idx]
    }
}

/// Routes keys to shards via a weighted consistent-hash ring (ketama) built
/// over the configured hosts.
pub struct KetamaRouter {
    ring: HashRing,
}

impl KetamaRouter {
    /// Builds a ring over `hosts`, all weighted equally.
    pub fn new(hosts: &HostMap) -> Self {
        Self::with_weights(hosts, HashMap::new())
    }

    /// Builds a ring over `hosts`, scaling each host's share by `weights`
    /// (hosts absent from `weights` default to weight `1`).
    pub fn with_weights(hosts: &HostMap, weights: HashMap<SmolStr, u32>) -> Self {
        let ring = HashRing::new(hosts.keys().cloned(), weights);
        KetamaRouter { ring }
    }
}

impl Router for KetamaRouter {
    fn host_for_key(&self, key: &[u8]) -> &str {
        // The host map is non-empty by construction (§3 invariant), so the
        // ring can only be empty if that invariant was violated upstream.
        self.ring
            .get_node(key)
            .expect("HostMap invariant: ring must be non-empty")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostConfig;

    fn hosts(names: &[&str]) -> HostMap {
        names
            .iter()
            .map(|n| (SmolStr::new(*n), HostConfig::tcp(*n, "localhost", 6379)))
            .collect()
    }

    #[test]
    fn crc32_routes_known_keys_over_three_hosts() {
        let hosts = hosts(&["0", "1", "2"]);
        let router = Crc32Router::new(&hosts);
        assert_eq!(router.host_for_key(b"c"), "0");
        assert_eq!(router.host_for_key(b"g"), "1");
        assert_eq!(router.host_for_key(b"a"), "2");
    }

    #[test]
    fn crc32_is_stable_across_calls() {
        let hosts = hosts(&["a", "b", "c", "d"]);
        let router = Crc32Router::new(&hosts);
        let first = router.host_for_key(b"stable-key").to_owned();
        for _ in 0..10 {
            assert_eq!(router.host_for_key(b"stable-key"), first);
        }
    }

    #[test]
    fn ketama_covers_every_node() {
        let hosts = hosts(&["node01", "node02", "node03", "node04"]);
        let router = KetamaRouter::new(&hosts);
        let mut seen: std::collections::HashSet<String> = Default::default();
        for i in 0..500 {
            seen.insert(router.host_for_key(format!("key-{i}").as_bytes()).to_owned());
        }
        for name in ["node01", "node02", "node03", "node04"] {
            assert!(seen.contains(name), "{name} never selected");
        }
    }

    #[test]
    fn host_for_command_delegates_through_the_routing_key() {
        let hosts = hosts(&["0", "1", "2"]);
        let router = Crc32Router::new(&hosts);
        let args: [&[u8]; 1] = [b"c"];
        assert_eq!(
            router.host_for_command(RoutableCommand::Get, &args).unwrap(),
            "0"
        );
    }

    #[test]
    fn routable_command_parse_is_case_insensitive() {
        assert_eq!(RoutableCommand::parse("get"), Some(RoutableCommand::Get));
        assert_eq!(RoutableCommand::parse("SETEX"), Some(RoutableCommand::Setex));
        assert_eq!(RoutableCommand::parse("MGET"), None);
    }
}
