//! Frame codec.
//!
//! A frame body starts with a header byte: the high nibble is the message
//! type (0..15), the low nibble is an application-supplied variant. Payload
//! primitives are little-endian fixed-width integers, 1-byte length-prefixed
//! strings, an implicit "remainder of frame" string, and a raw trailing byte
//! slice.
//!
//! The stream carrier length-prefixes each frame with a big-endian `u32`
//! whose top bit carries the "blasted" flag (datagram origin/target) and
//! whose low 31 bits are the payload length — this keeps the blasted bit
//! round-tripping across the stream carrier without a second header byte.
//! The datagram carrier needs no length prefix; the datagram boundary
//! delimits the frame, and blasted-ness is implicit (always true for
//! client-originated datagrams, always false for server-originated ones).

use bytes::{Buf, BufMut, Bytes, BytesMut};

const BLASTED_BIT: u32 = 1 << 31;
const LENGTH_MASK: u32 = !BLASTED_BIT;

/// Message types occupying the header byte's high nibble.
pub mod msg_type {
    pub const RESPONSE: u8 = 0;
    pub const SERVER_MESSAGE: u8 = 1;
    pub const CHANNEL_MESSAGE: u8 = 2;
    pub const PEER_MESSAGE: u8 = 3;
    pub const OBJECT_SERVER_MESSAGE: u8 = 4;
    pub const OBJECT_CHANNEL_MESSAGE: u8 = 5;
    pub const OBJECT_PEER_MESSAGE: u8 = 6;
    /// Server -> client: peer notification. Client -> server (datagram only): UDPHello.
    pub const PEER_OR_UDP_HELLO: u8 = 7;
    /// Server -> client: UDPWelcome. Reserved as ChannelMaster otherwise.
    pub const UDP_WELCOME_OR_CHANNEL_MASTER: u8 = 8;
    pub const PING: u8 = 9;
}

/// Request sub-codes carried as the first payload byte of a type=0 frame.
pub mod request {
    pub const CONNECT: u8 = 0;
    pub const SET_NAME: u8 = 1;
    pub const JOIN_CHANNEL: u8 = 2;
    pub const LEAVE_CHANNEL: u8 = 3;
    pub const CHANNEL_LIST: u8 = 4;
}

/// A decoded header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub msg_type: u8,
    pub variant: u8,
}

impl Header {
    pub fn new(msg_type: u8, variant: u8) -> Self {
        debug_assert!(msg_type <= 0xF);
        debug_assert!(variant <= 0xF);
        Self { msg_type, variant }
    }

    pub fn to_byte(self) -> u8 {
        (self.msg_type << 4) | (self.variant & 0x0F)
    }

    pub fn from_byte(b: u8) -> Self {
        Self {
            msg_type: b >> 4,
            variant: b & 0x0F,
        }
    }
}

/// Reads payload fields out of a frame body, with a sticky failure flag.
///
/// Once a read fails (not enough bytes remaining), every subsequent read is
/// a no-op that returns a zero/empty value; callers check [`FrameReader::failed`]
/// once at the end rather than after every field.
pub struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            failed: false,
        }
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.failed {
            return None;
        }
        if self.buf.len() - self.pos < n {
            self.failed = true;
            return None;
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    pub fn read_u8(&mut self) -> u8 {
        self.take(1).map(|s| s[0]).unwrap_or(0)
    }

    pub fn read_u16(&mut self) -> u16 {
        self.take(2)
            .map(|s| u16::from_le_bytes([s[0], s[1]]))
            .unwrap_or(0)
    }

    pub fn read_u32(&mut self) -> u32 {
        self.take(4)
            .map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
            .unwrap_or(0)
    }

    /// Reads a 1-byte length-prefixed UTF-8 string.
    pub fn read_str_1b(&mut self) -> String {
        let len = self.read_u8() as usize;
        self.take(len)
            .and_then(|s| std::str::from_utf8(s).ok())
            .map(str::to_string)
            .unwrap_or_else(|| {
                self.failed = true;
                String::new()
            })
    }

    /// Reads the remainder of the frame as a UTF-8 string.
    pub fn read_str_remainder(&mut self) -> String {
        let rest = self.remaining();
        std::str::from_utf8(rest)
            .map(str::to_string)
            .unwrap_or_else(|_| {
                self.failed = true;
                String::new()
            })
    }

    /// Reads the remainder of the frame as raw bytes.
    pub fn read_bytes_remainder(&mut self) -> Bytes {
        if self.failed {
            return Bytes::new();
        }
        Bytes::copy_from_slice(self.remaining())
    }

    fn remaining(&self) -> &'a [u8] {
        if self.failed {
            &[]
        } else {
            &self.buf[self.pos..]
        }
    }
}

/// Builds a frame payload from typed fields.
#[derive(Default)]
pub struct FrameWriter {
    buf: BytesMut,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn write_u16(&mut self, v: u16) -> &mut Self {
        self.buf.put_u16_le(v);
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32_le(v);
        self
    }

    /// Writes a 1-byte length-prefixed string; truncated to 255 bytes if longer.
    pub fn write_str_1b(&mut self, s: &str) -> &mut Self {
        let bytes = s.as_bytes();
        let len = bytes.len().min(u8::MAX as usize);
        self.buf.put_u8(len as u8);
        self.buf.extend_from_slice(&bytes[..len]);
        self
    }

    /// Writes a string with no length prefix (consumer reads it as the frame tail).
    pub fn write_str_remainder(&mut self, s: &str) -> &mut Self {
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn write_bytes(&mut self, b: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(b);
        self
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Encodes a full stream-carrier frame: 4-byte BE length prefix (with the
/// blasted bit folded into the top bit) followed by the header byte and payload.
pub fn encode_stream_frame(header: Header, blasted: bool, payload: &[u8]) -> BytesMut {
    let body_len = 1 + payload.len();
    let mut len_word = body_len as u32 & LENGTH_MASK;
    if blasted {
        len_word |= BLASTED_BIT;
    }
    let mut out = BytesMut::with_capacity(4 + body_len);
    out.put_u32(len_word);
    out.put_u8(header.to_byte());
    out.extend_from_slice(payload);
    out
}

/// Decodes the 4-byte stream length prefix into `(blasted, body_len)`.
pub fn decode_stream_length_prefix(prefix: [u8; 4]) -> (bool, usize) {
    let word = u32::from_be_bytes(prefix);
    (word & BLASTED_BIT != 0, (word & LENGTH_MASK) as usize)
}

/// Splits a decoded stream frame body into its header and payload.
///
/// Returns `None` if the body is empty (no header byte present) — a codec failure.
pub fn split_frame_body(body: &[u8]) -> Option<(Header, &[u8])> {
    let (&first, rest) = body.split_first()?;
    Some((Header::from_byte(first), rest))
}

/// Encodes an inbound (client -> server) datagram: a 3-byte self-identifying
/// prefix `(type, id_low, id_high)` followed by the frame body.
pub fn encode_datagram_inbound(header: Header, sender_id: u16, payload: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(3 + 1 + payload.len());
    out.put_u8(header.msg_type);
    out.put_u16_le(sender_id);
    out.put_u8(header.to_byte());
    out.extend_from_slice(payload);
    out
}

/// Decodes an inbound datagram, returning `(sender_id, header, payload)`.
pub fn decode_datagram_inbound(buf: &[u8]) -> Option<(u16, Header, &[u8])> {
    if buf.len() < 4 {
        return None;
    }
    let _type_repeat = buf[0];
    let sender_id = u16::from_le_bytes([buf[1], buf[2]]);
    let header = Header::from_byte(buf[3]);
    Some((sender_id, header, &buf[4..]))
}

/// Encodes an outbound (server -> client) datagram: just the frame body,
/// since the client always knows the server is the sole UDP peer.
pub fn encode_datagram_outbound(header: Header, payload: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(1 + payload.len());
    out.put_u8(header.to_byte());
    out.extend_from_slice(payload);
    out
}

/// Decodes an outbound-shaped datagram body into `(header, payload)`.
pub fn decode_datagram_outbound(buf: &[u8]) -> Option<(Header, &[u8])> {
    split_frame_body(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_byte_roundtrip() {
        let h = Header::new(2, 7);
        assert_eq!(Header::from_byte(h.to_byte()), h);
    }

    #[test]
    fn stream_frame_roundtrip_preserves_blasted() {
        let payload = b"hello";
        let framed = encode_stream_frame(Header::new(1, 0), true, payload);
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&framed[..4]);
        let (blasted, len) = decode_stream_length_prefix(prefix);
        assert!(blasted);
        assert_eq!(len, 1 + payload.len());
        let (header, body) = split_frame_body(&framed[4..]).unwrap();
        assert_eq!(header, Header::new(1, 0));
        assert_eq!(body, payload);
    }

    #[test]
    fn stream_frame_roundtrip_not_blasted() {
        let framed = encode_stream_frame(Header::new(0, 0), false, b"x");
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&framed[..4]);
        let (blasted, _len) = decode_stream_length_prefix(prefix);
        assert!(!blasted);
    }

    #[test]
    fn reader_sticky_failure_short_circuits_further_reads() {
        let mut r = FrameReader::new(&[1, 2]);
        assert_eq!(r.read_u8(), 1);
        assert_eq!(r.read_u32(), 0); // not enough bytes remaining
        assert!(r.failed());
        assert_eq!(r.read_u8(), 0); // still failed, still zero
        assert_eq!(r.read_str_remainder(), "");
    }

    #[test]
    fn length_prefixed_string_roundtrip() {
        let mut w = FrameWriter::new();
        w.write_str_1b("room");
        let bytes = w.finish();
        let mut r = FrameReader::new(&bytes);
        assert_eq!(r.read_str_1b(), "room");
        assert!(!r.failed());
    }

    #[test]
    fn datagram_inbound_roundtrip() {
        let header = Header::new(msg_type::PEER_OR_UDP_HELLO, 0);
        let framed = encode_datagram_inbound(header, 42, &[]);
        let (sender_id, decoded_header, payload) = decode_datagram_inbound(&framed).unwrap();
        assert_eq!(sender_id, 42);
        assert_eq!(decoded_header, header);
        assert!(payload.is_empty());
    }

    #[test]
    fn datagram_outbound_roundtrip() {
        let header = Header::new(msg_type::CHANNEL_MESSAGE, 3);
        let framed = encode_datagram_outbound(header, b"abc");
        let (decoded_header, payload) = decode_datagram_outbound(&framed).unwrap();
        assert_eq!(decoded_header, header);
        assert_eq!(payload, b"abc");
    }
}
