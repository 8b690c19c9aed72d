//! Frame Codec
//!
//! Reads and writes frames over any async byte stream. The codec carries no
//! state besides the maximum payload length it will accept.

use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::constants::{DEFAULT_MAX_FRAME_LENGTH, FRAME_HEADER_LEN};
use super::types::{Frame, FrameHeader};
use crate::error::RelayError;

/// Encoder/decoder for the length-prefixed wire frame
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_length: u32,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl FrameCodec {
    pub fn new(max_frame_length: u32) -> Self {
        Self { max_frame_length }
    }

    pub fn max_frame_length(&self) -> u32 {
        self.max_frame_length
    }

    /// Read exactly one 8-byte header.
    ///
    /// A stream that closes mid-header is reported as `ConnectionClosed`,
    /// the same as a clean close.
    pub async fn read_header<R>(&self, stream: &mut R) -> Result<FrameHeader, RelayError>
    where
        R: AsyncRead + Unpin,
    {
        let started = Instant::now();
        let mut buf = [0u8; FRAME_HEADER_LEN];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(RelayError::from_read)?;

        let header = FrameHeader::decode(&buf);
        debug!(
            version = header.version,
            frame_type = header.frame_type,
            length = header.length,
            elapsed_us = started.elapsed().as_micros() as u64,
            "Read frame header"
        );
        Ok(header)
    }

    /// Read exactly `length` payload bytes, however the peer fragments them
    pub async fn read_payload<R>(&self, stream: &mut R, length: u32) -> Result<Bytes, RelayError>
    where
        R: AsyncRead + Unpin,
    {
        self.check_length(length as u64)?;
        if length == 0 {
            return Ok(Bytes::new());
        }

        let started = Instant::now();
        let mut buf = BytesMut::zeroed(length as usize);
        stream
            .read_exact(&mut buf)
            .await
            .map_err(RelayError::from_read)?;

        debug!(
            bytes = length,
            elapsed_us = started.elapsed().as_micros() as u64,
            "Read frame payload"
        );
        Ok(buf.freeze())
    }

    /// Read one complete frame; partial frames are never returned
    pub async fn read_frame<R>(&self, stream: &mut R) -> Result<Frame, RelayError>
    where
        R: AsyncRead + Unpin,
    {
        let header = self.read_header(stream).await?;
        let payload = self.read_payload(stream, header.length).await?;
        Ok(Frame {
            version: header.version,
            frame_type: header.frame_type,
            payload,
        })
    }

    /// Serialize header and payload and write them as one buffer
    pub async fn write_frame<W>(
        &self,
        stream: &mut W,
        version: u16,
        frame_type: u16,
        payload: &[u8],
    ) -> Result<(), RelayError>
    where
        W: AsyncWrite + Unpin,
    {
        self.check_length(payload.len() as u64)?;

        let started = Instant::now();
        let header = FrameHeader::new(version, frame_type, payload.len() as u32);
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(payload);

        let write_error = |source| RelayError::WriteError { frame_type, source };
        stream.write_all(&buf).await.map_err(write_error)?;
        stream.flush().await.map_err(write_error)?;

        debug!(
            frame_type,
            bytes = buf.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Wrote frame"
        );
        Ok(())
    }

    fn check_length(&self, length: u64) -> Result<(), RelayError> {
        if length > self.max_frame_length as u64 {
            return Err(RelayError::FrameTooLarge {
                length,
                max: self.max_frame_length,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_read_frame_from_fragmented_stream() {
        let mut stream = Builder::new()
            .read(&[0x00, 0x01, 0x00])
            .read(&[0x01, 0x00, 0x00, 0x00])
            .read(&[0x04, b'p'])
            .read(b"i")
            .read(b"ng")
            .build();

        let frame = FrameCodec::default().read_frame(&mut stream).await.unwrap();
        assert_eq!(frame, Frame::new(1, 0x0001, &b"ping"[..]));
    }

    #[tokio::test]
    async fn test_short_header_is_connection_closed() {
        let mut stream = Builder::new().read(&[0x00, 0x01, 0x00]).build();
        let err = FrameCodec::default().read_header(&mut stream).await.unwrap_err();
        assert!(err.is_connection_closed());
    }

    #[tokio::test]
    async fn test_empty_stream_is_connection_closed() {
        let mut stream = Builder::new().build();
        let err = FrameCodec::default().read_frame(&mut stream).await.unwrap_err();
        assert!(err.is_connection_closed());
    }

    #[tokio::test]
    async fn test_short_payload_is_connection_closed() {
        let mut stream = Builder::new()
            .read(&[0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x08])
            .read(b"abc")
            .build();
        let err = FrameCodec::default().read_frame(&mut stream).await.unwrap_err();
        assert!(err.is_connection_closed());
    }

    #[tokio::test]
    async fn test_zero_length_payload() {
        let mut stream = Builder::new()
            .read(&[0x00, 0x02, 0x00, 0x09, 0x00, 0x00, 0x00, 0x00])
            .build();
        let frame = FrameCodec::default().read_frame(&mut stream).await.unwrap();
        assert_eq!(frame.version, 2);
        assert_eq!(frame.frame_type, 9);
        assert!(frame.payload.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_declared_length_is_rejected() {
        let mut stream = Builder::new()
            .read(&[0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x01, 0x00])
            .build();
        let err = FrameCodec::new(16).read_frame(&mut stream).await.unwrap_err();
        assert!(matches!(err, RelayError::FrameTooLarge { length: 256, max: 16 }));
    }

    #[tokio::test]
    async fn test_write_frame_emits_header_then_payload() {
        let mut stream = Builder::new()
            .write(&[0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x04, b'p', b'o', b'n', b'g'])
            .build();
        FrameCodec::default()
            .write_frame(&mut stream, 1, 0x0002, b"pong")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_write_frame_rejects_oversized_payload() {
        let mut sink = Vec::new();
        let err = FrameCodec::new(2)
            .write_frame(&mut sink, 1, 1, b"abc")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::FrameTooLarge { length: 3, max: 2 }));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_write_error_carries_frame_type() {
        let mut stream = Builder::new()
            .write_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let err = FrameCodec::default()
            .write_frame(&mut stream, 1, 0x0042, b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::WriteError { frame_type: 0x0042, .. }));
    }
}
