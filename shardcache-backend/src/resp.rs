//! Minimal RESP (REdis Serialization Protocol) encoder and decoder.
//!
//! The cluster client is an "external collaborator" boundary over a raw
//! blocking Redis client in the source system (`send_command`,
//! `parse_response`, `pack_commands`); no Rust crate exposes that raw
//! non-blocking-socket surface, so this module owns a small RESP
//! implementation good enough for `GET`, `SET`, `SETEX`, `DEL`, `MGET`,
//! `AUTH`, `SELECT` and their pipelined/multi-key forms.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// A parsed RESP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK\r\n`-style simple string.
    Simple(String),
    /// `-ERR ...\r\n`-style error reply.
    Error(String),
    /// `:123\r\n`-style integer.
    Integer(i64),
    /// `$-1\r\n` (absent) or `$N\r\n<data>\r\n` (present).
    Bulk(Option<Bytes>),
    /// `*N\r\n<elements>` or `*-1\r\n` (nil array).
    Array(Option<Vec<Reply>>),
}

impl Reply {
    /// Unwraps a bulk reply into `Option<Bytes>`, treating any other shape
    /// as a protocol error.
    pub fn into_bulk(self) -> Result<Option<Bytes>, RespError> {
        match self {
            Reply::Bulk(data) => Ok(data),
            Reply::Simple(s) => Ok(Some(Bytes::from(s.into_bytes()))),
            Reply::Error(message) => Err(RespError::ServerError(message)),
            other => Err(RespError::UnexpectedShape(format!("{other:?}"))),
        }
    }

    /// Unwraps an integer reply, treating any other shape as a protocol
    /// error.
    pub fn into_integer(self) -> Result<i64, RespError> {
        match self {
            Reply::Integer(n) => Ok(n),
            Reply::Error(message) => Err(RespError::ServerError(message)),
            other => Err(RespError::UnexpectedShape(format!("{other:?}"))),
        }
    }

    /// Unwraps an array reply, treating any other shape as a protocol
    /// error. A nil array decodes as an empty vector.
    pub fn into_array(self) -> Result<Vec<Reply>, RespError> {
        match self {
            Reply::Array(Some(items)) => Ok(items),
            Reply::Array(None) => Ok(Vec::new()),
            Reply::Error(message) => Err(RespError::ServerError(message)),
            other => Err(RespError::UnexpectedShape(format!("{other:?}"))),
        }
    }
}

/// RESP-level failures: malformed input, or a well-formed `-ERR` reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RespError {
    /// The server returned a well-formed error reply.
    #[error("redis error: {0}")]
    ServerError(String),
    /// The reply did not have the shape the caller expected.
    #[error("unexpected reply shape: {0}")]
    UnexpectedShape(String),
    /// The byte stream did not follow the RESP grammar.
    #[error("malformed RESP frame: {0}")]
    Malformed(String),
}

/// Encodes one command as a RESP array of bulk strings.
pub fn pack_command(args: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Encodes a sequence of commands into one pipelined byte stream, matching
/// the source system's `pack_commands([args...]) -> bytes` boundary.
pub fn pack_commands<'a, I>(commands: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a [&'a [u8]]>,
{
    let mut out = Vec::new();
    for command in commands {
        out.extend_from_slice(&pack_command(command));
    }
    out
}

/// Incremental RESP decoder: fed raw bytes as they arrive off the wire,
/// yields complete replies as soon as enough bytes have accumulated.
///
/// Used both by the blocking single-key path (feed, try to parse, read
/// more on `None`, repeat) and by the non-blocking multi-key command
/// buffer (feed whatever `read` returned this tick, drain as many replies
/// as are complete).
#[derive(Debug, Default)]
pub struct RespDecoder {
    buf: BytesMut,
}

impl RespDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly read bytes to the decode buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Attempts to parse and remove one complete reply from the front of
    /// the buffer. Returns `Ok(None)` if the buffered bytes do not yet form
    /// a complete frame.
    pub fn try_parse(&mut self) -> Result<Option<Reply>, RespError> {
        let mut cursor = 0usize;
        match parse_value(&self.buf, &mut cursor)? {
            Some(reply) => {
                let _ = self.buf.split_to(cursor);
                Ok(Some(reply))
            }
            None => Ok(None),
        }
    }
}

fn find_crlf(buf: &[u8], start: usize) -> Option<usize> {
    buf[start..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| start + p)
}

/// Parses one RESP value starting at `*cursor`, advancing `cursor` past it
/// on success. Returns `Ok(None)` if the buffer does not yet hold a
/// complete value (the caller should read more bytes and retry).
fn parse_value(buf: &[u8], cursor: &mut usize) -> Result<Option<Reply>, RespError> {
    if *cursor >= buf.len() {
        return Ok(None);
    }
    let tag = buf[*cursor];
    let line_start = *cursor + 1;
    let Some(line_end) = find_crlf(buf, line_start) else {
        return Ok(None);
    };
    let line = std::str::from_utf8(&buf[line_start..line_end])
        .map_err(|_| RespError::Malformed("non-utf8 header line".into()))?;
    let after_line = line_end + 2;

    match tag {
        b'+' => {
            *cursor = after_line;
            Ok(Some(Reply::Simple(line.to_owned())))
        }
        b'-' => {
            *cursor = after_line;
            Ok(Some(Reply::Error(line.to_owned())))
        }
        b':' => {
            let n: i64 = line
                .parse()
                .map_err(|_| RespError::Malformed(format!("bad integer {line}")))?;
            *cursor = after_line;
            Ok(Some(Reply::Integer(n)))
        }
        b'$' => {
            let len: i64 = line
                .parse()
                .map_err(|_| RespError::Malformed(format!("bad bulk length {line}")))?;
            if len < 0 {
                *cursor = after_line;
                return Ok(Some(Reply::Bulk(None)));
            }
            let len = len as usize;
            let data_start = after_line;
            let data_end = data_start + len;
            if buf.len() < data_end + 2 {
                return Ok(None);
            }
            let data = Bytes::copy_from_slice(&buf[data_start..data_end]);
            *cursor = data_end + 2;
            Ok(Some(Reply::Bulk(Some(data))))
        }
        b'*' => {
            let len: i64 = line
                .parse()
                .map_err(|_| RespError::Malformed(format!("bad array length {line}")))?;
            if len < 0 {
                *cursor = after_line;
                return Ok(Some(Reply::Array(None)));
            }
            let mut items = Vec::with_capacity(len as usize);
            let mut inner_cursor = after_line;
            for _ in 0..len {
                match parse_value(buf, &mut inner_cursor)? {
                    Some(item) => items.push(item),
                    None => return Ok(None),
                }
            }
            *cursor = inner_cursor;
            Ok(Some(Reply::Array(Some(items))))
        }
        other => Err(RespError::Malformed(format!("unknown tag byte {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_command_encodes_array_of_bulk_strings() {
        let encoded = pack_command(&[b"GET", b"foo"]);
        assert_eq!(encoded, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
    }

    #[test]
    fn decoder_parses_simple_integer_and_bulk() {
        let mut dec = RespDecoder::new();
        dec.feed(b"+OK\r\n:42\r\n$-1\r\n$3\r\nfoo\r\n");
        assert_eq!(dec.try_parse().unwrap(), Some(Reply::Simple("OK".into())));
        assert_eq!(dec.try_parse().unwrap(), Some(Reply::Integer(42)));
        assert_eq!(dec.try_parse().unwrap(), Some(Reply::Bulk(None)));
        assert_eq!(
            dec.try_parse().unwrap(),
            Some(Reply::Bulk(Some(Bytes::from_static(b"foo"))))
        );
        assert_eq!(dec.try_parse().unwrap(), None);
    }

    #[test]
    fn decoder_handles_partial_frames_across_feeds() {
        let mut dec = RespDecoder::new();
        dec.feed(b"$5\r\nhel");
        assert_eq!(dec.try_parse().unwrap(), None);
        dec.feed(b"lo\r\n");
        assert_eq!(
            dec.try_parse().unwrap(),
            Some(Reply::Bulk(Some(Bytes::from_static(b"hello"))))
        );
    }

    #[test]
    fn decoder_parses_nested_arrays() {
        let mut dec = RespDecoder::new();
        dec.feed(b"*2\r\n$1\r\na\r\n$-1\r\n");
        let reply = dec.try_parse().unwrap().unwrap();
        assert_eq!(
            reply,
            Reply::Array(Some(vec![
                Reply::Bulk(Some(Bytes::from_static(b"a"))),
                Reply::Bulk(None),
            ]))
        );
    }

    #[test]
    fn array_reply_unwraps_to_vec() {
        let reply = Reply::Array(Some(vec![Reply::Integer(1)]));
        assert_eq!(reply.into_array().unwrap(), vec![Reply::Integer(1)]);
    }

    #[test]
    fn error_reply_surfaces_as_resp_error() {
        let mut dec = RespDecoder::new();
        dec.feed(b"-ERR bad thing\r\n");
        let reply = dec.try_parse().unwrap().unwrap();
        assert_eq!(reply.clone().into_bulk().unwrap_err(), RespError::ServerError("ERR bad thing".into()));
    }
}
