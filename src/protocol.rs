//! RESP request encoding and response framing.
//!
//! Requests are RESP arrays of bulk strings. Responses are not parsed: a
//! response frame ends at the first `\n`, which is all a one-line reply to
//! `PING` needs.

use bytes::{Bytes, BytesMut};

/// Line terminator that ends one response frame
pub const LINE_TERMINATOR: u8 = b'\n';

/// RESP request frame types
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Bulk string: $5\r\nhello\r\n
    Bulk(Bytes),
    /// Array: *2\r\n...
    Array(Vec<Frame>),
}

impl Frame {
    /// Encode a frame to bytes
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Encode a frame into an existing buffer
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Frame::Bulk(data) => {
                buf.extend_from_slice(b"$");
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\r\n");
            }
            Frame::Array(frames) => {
                buf.extend_from_slice(b"*");
                buf.extend_from_slice(frames.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                for frame in frames {
                    frame.encode_into(buf);
                }
            }
        }
    }

    /// Build a command frame from its name and arguments
    pub fn command<I, B>(parts: I) -> Frame
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Frame::Array(parts.into_iter().map(|p| Frame::Bulk(p.into())).collect())
    }
}

/// The liveness probe: `PING` with no arguments.
///
/// Encoded once per worker and written verbatim on every iteration.
pub fn probe() -> Bytes {
    Frame::command([Bytes::from_static(b"PING")])
        .encode()
        .freeze()
}

/// Position just past the first line terminator, if the buffer holds one.
pub fn find_line_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .iter()
        .position(|&b| b == LINE_TERMINATOR)
        .map(|pos| pos + 1)
}
