//! A single blocking connection to one shard, with a non-blocking escape
//! hatch for the command buffer's pipelined writes.

use crate::error::BackendError;
use crate::resp::{RespDecoder, Reply, pack_command};
use shardcache_core::{ConnectionMode, HostConfig};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;
use tracing::trace;

enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.set_nonblocking(nonblocking),
            #[cfg(unix)]
            Stream::Unix(s) => s.set_nonblocking(nonblocking),
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.set_read_timeout(timeout),
            #[cfg(unix)]
            Stream::Unix(s) => s.set_read_timeout(timeout),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Stream::Unix(s) => s.flush(),
        }
    }
}

impl AsRawFd for Stream {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Stream::Tcp(s) => s.as_raw_fd(),
            #[cfg(unix)]
            Stream::Unix(s) => s.as_raw_fd(),
        }
    }
}

/// A live connection to one shard.
///
/// Exposes the same four-operation surface the source system treats as an
/// external collaborator (`send_command`, `parse_response`, `disconnect`,
/// `socket_fd`) plus the non-blocking write/read primitives the command
/// buffer needs for its pipelined multi-socket fan-out.
pub struct Connection {
    stream: Option<Stream>,
    host_name: String,
    decoder: RespDecoder,
}

impl Connection {
    /// Opens a connection per `config` and performs `AUTH`/`SELECT` if
    /// configured. Eager, per §4.E ("create with a freshly acquired
    /// connection and connect it eagerly").
    pub fn connect(config: &HostConfig) -> Result<Self, BackendError> {
        let stream = match config.mode() {
            ConnectionMode::Tcp { host, port, tls } => {
                if *tls {
                    return Err(BackendError::TlsUnsupported(config.host_name().to_owned()));
                }
                let stream = TcpStream::connect((host.as_str(), *port)).map_err(|source| {
                    BackendError::Connection {
                        host: config.host_name().to_owned(),
                        source,
                    }
                })?;
                stream.set_nodelay(true).ok();
                Stream::Tcp(stream)
            }
            ConnectionMode::Unix { path } => {
                #[cfg(unix)]
                {
                    let stream =
                        UnixStream::connect(path.as_str()).map_err(|source| BackendError::Connection {
                            host: config.host_name().to_owned(),
                            source,
                        })?;
                    Stream::Unix(stream)
                }
                #[cfg(not(unix))]
                {
                    return Err(BackendError::Connection {
                        host: config.host_name().to_owned(),
                        source: io::Error::new(
                            io::ErrorKind::Unsupported,
                            "unix sockets unavailable on this platform",
                        ),
                    });
                }
            }
        };

        let mut conn = Connection {
            stream: Some(stream),
            host_name: config.host_name().to_owned(),
            decoder: RespDecoder::new(),
        };

        if let Some(password) = config.password() {
            conn.send_command(&[b"AUTH", password.as_bytes()])?;
            conn.parse_response()?;
        }
        if config.db() != 0 {
            conn.send_command(&[b"SELECT", config.db().to_string().as_bytes()])?;
            conn.parse_response()?;
        }
        Ok(conn)
    }

    fn stream_mut(&mut self) -> Result<&mut Stream, BackendError> {
        self.stream.as_mut().ok_or_else(|| BackendError::Connection {
            host: self.host_name.clone(),
            source: io::Error::new(io::ErrorKind::NotConnected, "connection already closed"),
        })
    }

    /// The shard this connection was opened against.
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// `true` while the underlying socket is still open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Encodes and blocking-writes one command.
    pub fn send_command(&mut self, args: &[&[u8]]) -> Result<(), BackendError> {
        let encoded = pack_command(args);
        let host = self.host_name.clone();
        let stream = self.stream_mut()?;
        if let Err(source) = stream.write_all(&encoded) {
            self.disconnect();
            return Err(classify_io_error(host, source));
        }
        Ok(())
    }

    /// Blocking-reads and parses exactly one reply.
    pub fn parse_response(&mut self) -> Result<Reply, BackendError> {
        loop {
            if let Some(reply) = self
                .decoder
                .try_parse()
                .map_err(|source| BackendError::Protocol {
                    host: self.host_name.clone(),
                    source,
                })?
            {
                return Ok(reply);
            }
            let mut chunk = [0u8; 4096];
            let host = self.host_name.clone();
            let stream = self.stream_mut()?;
            match stream.read(&mut chunk) {
                Ok(0) => {
                    self.disconnect();
                    return Err(BackendError::Connection {
                        host,
                        source: io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by peer"),
                    });
                }
                Ok(n) => self.decoder.feed(&chunk[..n]),
                Err(source) => {
                    self.disconnect();
                    return Err(classify_io_error(host, source));
                }
            }
        }
    }

    /// Closes the socket. Idempotent.
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            trace!(host = %self.host_name, "disconnecting");
        }
    }

    /// The raw file descriptor, for readiness polling.
    pub fn socket_fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(|s| s.as_raw_fd())
    }

    /// Toggles the socket's blocking mode, used by the command buffer to
    /// drive non-blocking pipelined sends.
    pub fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), BackendError> {
        let host = self.host_name.clone();
        let stream = self.stream_mut()?;
        stream
            .set_nonblocking(nonblocking)
            .map_err(|source| classify_io_error(host, source))
    }

    /// Restores the socket's read timeout after a non-blocking write burst
    /// (§4.E: "restore original socket timeout on exit").
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), BackendError> {
        let host = self.host_name.clone();
        let stream = self.stream_mut()?;
        stream
            .set_read_timeout(timeout)
            .map_err(|source| classify_io_error(host, source))
    }

    /// A single non-blocking write attempt. `Ok(n)` is the number of bytes
    /// actually written (which may be less than `buf.len()` on a short
    /// write); `Err(WouldBlock)` means "stop for this tick".
    pub fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection closed"))?
            .write(buf)
    }

    /// A single non-blocking read attempt, feeding whatever bytes arrive
    /// straight into the response decoder.
    pub fn try_read_into_decoder(&mut self) -> io::Result<usize> {
        let mut chunk = [0u8; 65536];
        let n = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection closed"))?
            .read(&mut chunk)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by peer"));
        }
        self.decoder.feed(&chunk[..n]);
        Ok(n)
    }

    /// Pops one complete reply off the decoder's buffered bytes, if any.
    pub fn try_parse_one(&mut self) -> Result<Option<Reply>, BackendError> {
        self.decoder
            .try_parse()
            .map_err(|source| BackendError::Protocol {
                host: self.host_name.clone(),
                source,
            })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn classify_io_error(host: String, source: io::Error) -> BackendError {
    if matches!(
        source.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    ) {
        BackendError::Timeout { host }
    } else {
        BackendError::Connection { host, source }
    }
}
