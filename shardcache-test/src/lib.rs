//! An in-process fake Redis endpoint for exercising the cluster client's
//! multi-socket fan-out without a live Redis.
//!
//! Mirrors the role the original Python library's own test suite gave
//! `testing.RedisMockup`: a stand-in server good enough to drive the real
//! client code paths (routing, pooling, non-blocking pipelining, RESP
//! parsing) end to end, over loopback TCP, with nothing faked above the
//! wire protocol itself.

use bytes::Bytes;
use shardcache_backend::{Reply, RespDecoder};
use shardcache_core::HostConfig;
use smol_str::SmolStr;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::trace;

type Store = Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>;

/// A fake single-shard Redis endpoint backed by an in-memory map.
///
/// Speaks just enough RESP to answer `GET`/`SET`/`SETEX`/`DEL`/`MGET`
/// (including the collapsed multi-key forms the command buffer sends) plus
/// `AUTH`/`SELECT` as no-ops, so a [`shardcache::Cache`] or
/// [`shardcache::ClusterCache`] can talk to it exactly as it would to a real
/// Redis instance.
pub struct FakeShard {
    addr: SocketAddr,
    store: Store,
}

impl FakeShard {
    /// Binds an ephemeral loopback port and spawns a background listener
    /// thread; each accepted connection is served on its own thread over a
    /// store shared by every connection this shard has open.
    pub fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake shard listener");
        let addr = listener.local_addr().expect("fake shard local addr");
        let store: Store = Arc::new(Mutex::new(HashMap::new()));
        let accept_store = Arc::clone(&store);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let store = Arc::clone(&accept_store);
                thread::spawn(move || serve_connection(stream, store));
            }
        });
        FakeShard { addr, store }
    }

    /// Builds a [`HostConfig`] pointing at this fake shard over TCP.
    pub fn host_config(&self, host_name: impl Into<SmolStr>) -> HostConfig {
        HostConfig::tcp(host_name, self.addr.ip().to_string(), self.addr.port())
    }

    /// Reads a key directly from the in-memory store, bypassing the
    /// network, for assertions that want to check server-side state rather
    /// than go through the client.
    pub fn peek(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.store.lock().unwrap().get(key).cloned()
    }
}

fn serve_connection(mut stream: TcpStream, store: Store) {
    let mut decoder = RespDecoder::new();
    let mut chunk = [0u8; 4096];
    loop {
        match decoder.try_parse() {
            Ok(Some(Reply::Array(Some(items)))) => {
                let reply = dispatch(&store, &items);
                if stream.write_all(&encode_reply(&reply)).is_err() {
                    return;
                }
            }
            Ok(Some(_)) => return,
            Ok(None) => match stream.read(&mut chunk) {
                Ok(0) | Err(_) => return,
                Ok(n) => decoder.feed(&chunk[..n]),
            },
            Err(_) => return,
        }
    }
}

fn dispatch(store: &Store, items: &[Reply]) -> Reply {
    let args: Vec<Vec<u8>> = items
        .iter()
        .map(|item| match item {
            Reply::Bulk(Some(data)) => data.to_vec(),
            _ => Vec::new(),
        })
        .collect();
    let Some(name) = args.first() else {
        return Reply::Error("ERR empty command".into());
    };
    let name = String::from_utf8_lossy(name).to_ascii_uppercase();
    trace!(command = %name, "fake shard dispatch");
    let mut store = store.lock().unwrap();
    match name.as_str() {
        "GET" => {
            let Some(key) = args.get(1) else {
                return Reply::Error("ERR wrong number of arguments for 'get'".into());
            };
            match store.get(key) {
                Some(value) => Reply::Bulk(Some(Bytes::copy_from_slice(value))),
                None => Reply::Bulk(None),
            }
        }
        "SET" => {
            let (Some(key), Some(value)) = (args.get(1), args.get(2)) else {
                return Reply::Error("ERR wrong number of arguments for 'set'".into());
            };
            store.insert(key.clone(), value.clone());
            Reply::Simple("OK".into())
        }
        "SETEX" => {
            // args[2] is the TTL in seconds; this fake endpoint never
            // expires keys, since tests only need the value round-trip.
            let (Some(key), Some(value)) = (args.get(1), args.get(3)) else {
                return Reply::Error("ERR wrong number of arguments for 'setex'".into());
            };
            store.insert(key.clone(), value.clone());
            Reply::Simple("OK".into())
        }
        "DEL" => {
            let deleted = args[1..]
                .iter()
                .filter(|key| store.remove(*key).is_some())
                .count();
            Reply::Integer(deleted as i64)
        }
        "MGET" => {
            let items = args[1..]
                .iter()
                .map(|key| match store.get(key) {
                    Some(value) => Reply::Bulk(Some(Bytes::copy_from_slice(value))),
                    None => Reply::Bulk(None),
                })
                .collect();
            Reply::Array(Some(items))
        }
        "AUTH" | "SELECT" => Reply::Simple("OK".into()),
        other => Reply::Error(format!("ERR unknown command '{other}'")),
    }
}

fn encode_reply(reply: &Reply) -> Vec<u8> {
    match reply {
        Reply::Simple(s) => format!("+{s}\r\n").into_bytes(),
        Reply::Error(s) => format!("-{s}\r\n").into_bytes(),
        Reply::Integer(n) => format!(":{n}\r\n").into_bytes(),
        Reply::Bulk(None) => b"$-1\r\n".to_vec(),
        Reply::Bulk(Some(data)) => {
            let mut out = format!("${}\r\n", data.len()).into_bytes();
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
            out
        }
        Reply::Array(None) => b"*-1\r\n".to_vec(),
        Reply::Array(Some(items)) => {
            let mut out = format!("*{}\r\n", items.len()).into_bytes();
            for item in items {
                out.extend_from_slice(&encode_reply(item));
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_get_set_del_over_loopback() {
        let shard = FakeShard::spawn();
        let mut conn = shardcache_backend::Connection::connect(&shard.host_config("t")).unwrap();

        conn.send_command(&[b"GET", b"k"]).unwrap();
        assert_eq!(conn.parse_response().unwrap(), Reply::Bulk(None));

        conn.send_command(&[b"SET", b"k", b"v"]).unwrap();
        assert_eq!(conn.parse_response().unwrap(), Reply::Simple("OK".into()));

        conn.send_command(&[b"GET", b"k"]).unwrap();
        assert_eq!(
            conn.parse_response().unwrap(),
            Reply::Bulk(Some(Bytes::from_static(b"v")))
        );

        conn.send_command(&[b"DEL", b"k"]).unwrap();
        assert_eq!(conn.parse_response().unwrap(), Reply::Integer(1));

        assert_eq!(shard.peek(b"k"), None);
    }
}
