//! Relay Error Types
//!
//! Errors raised on the frame data path. Every variant is local to one
//! session; none of them stop the broker.

use std::io;
use thiserror::Error;

/// Errors produced by the frame codec, the pumps and the broker
#[derive(Debug, Error)]
pub enum RelayError {
    /// The peer closed the stream before a full header or payload arrived
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Frame too large: {length} bytes (max {max})")]
    FrameTooLarge { length: u64, max: u32 },

    #[error("Read failed: {0}")]
    Read(#[source] io::Error),

    #[error("Write failed for frame type 0x{frame_type:04X}: {source}")]
    WriteError {
        frame_type: u16,
        #[source]
        source: io::Error,
    },

    #[error("Failed to connect to {target}: {reason}")]
    DialError { target: String, reason: String },

    #[error("Accept failed: {0}")]
    AcceptError(#[source] io::Error),

    #[error("Not connected")]
    NotConnected,

    #[error("Broker is shutting down")]
    ShuttingDown,
}

impl RelayError {
    /// Map a read-side IO error, folding EOF into `ConnectionClosed`
    pub fn from_read(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::UnexpectedEof => RelayError::ConnectionClosed,
            _ => RelayError::Read(error),
        }
    }

    /// Whether this error is the ordinary end of a stream
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, RelayError::ConnectionClosed)
    }
}
