//! Readiness polling over many shard sockets at once.
//!
//! The source system picks between `epoll`/`kqueue`/`poll`/`select`
//! backends in that preference order at construction time. `mio::Poll`
//! already performs exactly that backend selection at compile time (epoll
//! on Linux, kqueue on BSD/macOS, `poll(2)` elsewhere), so this module
//! delegates to it rather than hand-rolling a per-OS `unsafe` backend the
//! way a raw-libc translation would (see `DESIGN.md`).

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use smol_str::SmolStr;
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Uniform readiness interface over a set of `(host_name, fd)` pairs.
///
/// Every registered fd carries both read and write interest; a host can
/// appear in either list, both, or neither on a given tick, but across
/// repeated ticks both conditions eventually surface.
pub trait Poller {
    /// Blocks for up to `timeout` (or indefinitely if `None`) and returns
    /// the host names that became readable and writable.
    fn poll(&mut self, timeout: Option<Duration>) -> io::Result<(Vec<SmolStr>, Vec<SmolStr>)>;

    /// Removes a host from interest. Returns `true` if it was registered.
    fn pop(&mut self, host_name: &str) -> bool;

    /// Number of hosts still registered.
    fn len(&self) -> usize;

    /// `true` if no hosts remain registered.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `mio`-backed [`Poller`] implementation.
pub struct ReadinessPoller {
    poll: Poll,
    events: Events,
    fds_by_token: HashMap<Token, (SmolStr, RawFd)>,
    tokens_by_host: HashMap<SmolStr, Token>,
}

impl ReadinessPoller {
    /// Registers every `(host_name, fd)` pair for combined read/write
    /// interest.
    pub fn new(sockets: &[(SmolStr, RawFd)]) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut fds_by_token = HashMap::with_capacity(sockets.len());
        let mut tokens_by_host = HashMap::with_capacity(sockets.len());
        let mut next_token = 0usize;
        for (host_name, fd) in sockets {
            let token = Token(next_token);
            next_token += 1;
            poll.registry().register(
                &mut SourceFd(fd),
                token,
                Interest::READABLE | Interest::WRITABLE,
            )?;
            fds_by_token.insert(token, (host_name.clone(), *fd));
            tokens_by_host.insert(host_name.clone(), token);
        }
        Ok(ReadinessPoller {
            poll,
            events: Events::with_capacity(sockets.len().max(1)),
            fds_by_token,
            tokens_by_host,
        })
    }
}

impl Poller for ReadinessPoller {
    fn poll(&mut self, timeout: Option<Duration>) -> io::Result<(Vec<SmolStr>, Vec<SmolStr>)> {
        self.poll.poll(&mut self.events, timeout)?;
        let mut readable = Vec::new();
        let mut writable = Vec::new();
        for event in self.events.iter() {
            let Some((host, _)) = self.fds_by_token.get(&event.token()) else {
                continue;
            };
            if event.is_readable() {
                readable.push(host.clone());
            }
            if event.is_writable() {
                writable.push(host.clone());
            }
        }
        Ok((readable, writable))
    }

    fn pop(&mut self, host_name: &str) -> bool {
        let Some(token) = self.tokens_by_host.remove(host_name) else {
            return false;
        };
        if let Some((_, mut fd)) = self.fds_by_token.remove(&token) {
            let _ = self.poll.registry().deregister(&mut SourceFd(&mut fd));
        }
        true
    }

    fn len(&self) -> usize {
        self.fds_by_token.len()
    }
}
