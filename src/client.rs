//! Standalone Frame Client
//!
//! Speaks the frame protocol to the relay (or straight to the upstream
//! service): one request frame out, one response frame back.

use std::fmt::Write as _;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::config::format_host_port;
use crate::error::RelayError;
use crate::protocol::{Frame, FrameCodec, DEFAULT_CONNECT_TIMEOUT_SECS, PROTOCOL_VERSION};

/// Request/response client with at most one request in flight
pub struct FrameClient {
    host: String,
    port: u16,
    connect_timeout: Duration,
    codec: FrameCodec,
    stream: Option<TcpStream>,
    request_id: u64,
}

impl FrameClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            codec: FrameCodec::default(),
            stream: None,
            request_id: 0,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn address(&self) -> String {
        format_host_port(&self.host, self.port)
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Number of requests sent so far
    pub fn request_count(&self) -> u64 {
        self.request_id
    }

    /// Dial the configured address
    pub async fn connect(&mut self) -> Result<(), RelayError> {
        let address = self.address();
        info!(%address, "Connecting to frame service");
        let started = Instant::now();

        let stream = match timeout(self.connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!(%address, error = %e, "Connection failed");
                return Err(RelayError::DialError {
                    target: address,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                error!(%address, timeout = ?self.connect_timeout, "Connection timed out");
                return Err(RelayError::DialError {
                    target: address,
                    reason: format!("timed out after {:?}", self.connect_timeout),
                });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        info!(
            %address,
            connect_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Connected to frame service"
        );
        self.stream = Some(stream);
        Ok(())
    }

    /// Shut the connection down; calling it again is a no-op
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "Error shutting down client stream");
            }
            info!(address = %self.address(), "Disconnected from frame service");
        }
    }

    /// Send one frame and wait for exactly one frame back.
    ///
    /// A failed exchange drops the connection, since the stream position is
    /// unknown afterwards.
    pub async fn send_request(
        &mut self,
        frame_type: u16,
        payload: &[u8],
    ) -> Result<(u16, Bytes), RelayError> {
        let codec = self.codec;
        let stream = self.stream.as_mut().ok_or_else(|| {
            error!("Not connected to frame service");
            RelayError::NotConnected
        })?;

        self.request_id += 1;
        let request_id = self.request_id;

        info!(
            request_id,
            frame_type = %format!("0x{:04X}", frame_type),
            length = payload.len(),
            "Sending request"
        );
        debug!(request_id, data = %to_hex(payload), "Request payload");

        let started = Instant::now();
        let result: Result<Frame, RelayError> = async {
            codec
                .write_frame(stream, PROTOCOL_VERSION, frame_type, payload)
                .await?;
            let sent = started.elapsed();
            debug!(request_id, send_ms = sent.as_secs_f64() * 1000.0, "Request sent");
            codec.read_frame(stream).await
        }
        .await;

        match result {
            Ok(response) => {
                info!(
                    request_id,
                    frame_type = %format!("0x{:04X}", response.frame_type),
                    length = response.payload.len(),
                    round_trip_ms = started.elapsed().as_secs_f64() * 1000.0,
                    "Received response"
                );
                debug!(request_id, data = %to_hex(&response.payload), "Response payload");
                Ok((response.frame_type, response.payload))
            }
            Err(e) => {
                error!(request_id, error = %e, "Request failed");
                self.stream = None;
                Err(e)
            }
        }
    }
}

fn to_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}
