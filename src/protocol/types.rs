//! Frame Protocol Types

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use crate::protocol::constants::FRAME_HEADER_LEN;

/// Fixed 8-byte frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u16,
    pub frame_type: u16,
    pub length: u32,
}

impl FrameHeader {
    pub fn new(version: u16, frame_type: u16, length: u32) -> Self {
        Self {
            version,
            frame_type,
            length,
        }
    }

    /// Encode to network byte order
    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut buf = [0u8; FRAME_HEADER_LEN];
        buf[0..2].copy_from_slice(&self.version.to_be_bytes());
        buf[2..4].copy_from_slice(&self.frame_type.to_be_bytes());
        buf[4..8].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Decode from network byte order
    pub fn decode(buf: &[u8; FRAME_HEADER_LEN]) -> Self {
        Self {
            version: u16::from_be_bytes([buf[0], buf[1]]),
            frame_type: u16::from_be_bytes([buf[2], buf[3]]),
            length: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

/// One complete frame as read off the wire.
///
/// The relay never looks inside `frame_type` or `payload`; the header length
/// is always derived from the payload so the two cannot disagree.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u16,
    pub frame_type: u16,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(version: u16, frame_type: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            version,
            frame_type,
            payload: payload.into(),
        }
    }

    /// Payload length as declared on the wire
    pub fn length(&self) -> u32 {
        self.payload.len() as u32
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader::new(self.version, self.frame_type, self.length())
    }

    /// Total bytes this frame occupies on the wire
    pub fn wire_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }

    /// Header followed by payload in a single buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_slice(&self.header().encode());
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("version", &self.version)
            .field("frame_type", &format_args!("0x{:04X}", self.frame_type))
            .field("length", &self.payload.len())
            .finish()
    }
}

/// Direction a frame travels through a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToServer => "client_to_server",
            Direction::ServerToClient => "server_to_client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout_is_big_endian() {
        let header = FrameHeader::new(1, 0x0102, 0x0A0B0C0D);
        assert_eq!(header.encode(), [0x00, 0x01, 0x01, 0x02, 0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(FrameHeader::decode(&header.encode()), header);
    }

    #[test]
    fn test_frame_to_bytes() {
        let frame = Frame::new(1, 0x0001, &b"ping"[..]);
        assert_eq!(frame.length(), 4);
        assert_eq!(frame.wire_len(), 12);
        assert_eq!(
            frame.to_bytes().as_ref(),
            &[0, 1, 0, 1, 0, 0, 0, 4, b'p', b'i', b'n', b'g']
        );
    }

    #[test]
    fn test_empty_frame() {
        let frame = Frame::new(3, 7, Bytes::new());
        assert_eq!(frame.header(), FrameHeader::new(3, 7, 0));
        assert_eq!(frame.to_bytes().len(), FRAME_HEADER_LEN);
    }
}
