//! Forwarding Pump
//!
//! Moves whole frames from one socket half to the other for a single
//! direction of a session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info};

use super::RelaySession;
use crate::error::RelayError;
use crate::metrics::Metrics;
use crate::protocol::{Direction, Frame, FrameCodec};

/// Why a pump stopped
#[derive(Debug)]
pub enum PumpExit {
    /// Source reached EOF or the session was closed
    Closed,
    /// Forwarding failed
    Failed(RelayError),
}

/// Unidirectional frame forwarder
pub struct Pump<R, W> {
    session: Arc<RelaySession>,
    direction: Direction,
    source: R,
    sink: W,
    codec: FrameCodec,
    metrics: Arc<Metrics>,
}

impl<R, W> Pump<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        session: Arc<RelaySession>,
        direction: Direction,
        source: R,
        sink: W,
        codec: FrameCodec,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            session,
            direction,
            source,
            sink,
            codec,
            metrics,
        }
    }

    /// Forward frames until EOF, error or session close, then tear the
    /// session down. Both socket halves are released when this returns.
    pub async fn run(self) -> PumpExit {
        let Pump {
            session,
            direction,
            mut source,
            mut sink,
            codec,
            metrics,
        } = self;

        info!(
            session_id = session.id,
            client_id = %session.client_id,
            %direction,
            "Pump started"
        );

        let mut close_rx = session.close_signal();
        let mut forwarded: u64 = 0;

        let exit = loop {
            if !session.is_running() {
                break PumpExit::Closed;
            }

            let read = tokio::select! {
                biased;
                _ = close_rx.wait_for(|closed| *closed) => break PumpExit::Closed,
                read = read_timed(&codec, &mut source) => read,
            };

            let (frame, read_time) = match read {
                Ok(read) => read,
                Err(RelayError::ConnectionClosed) => {
                    info!(
                        session_id = session.id,
                        client_id = %session.client_id,
                        %direction,
                        "Peer closed connection"
                    );
                    break PumpExit::Closed;
                }
                Err(e) => {
                    error!(
                        session_id = session.id,
                        client_id = %session.client_id,
                        %direction,
                        error = %e,
                        "Failed to read frame"
                    );
                    break PumpExit::Failed(e);
                }
            };

            let write_started = Instant::now();
            let written = tokio::select! {
                biased;
                _ = close_rx.wait_for(|closed| *closed) => break PumpExit::Closed,
                written = codec.write_frame(&mut sink, frame.version, frame.frame_type, &frame.payload) => written,
            };

            if let Err(e) = written {
                error!(
                    session_id = session.id,
                    client_id = %session.client_id,
                    %direction,
                    frame_type = frame.frame_type,
                    error = %e,
                    "Failed to forward frame"
                );
                break PumpExit::Failed(e);
            }
            let write_time = write_started.elapsed();

            forwarded += 1;
            session.record_frame(direction, frame.wire_len(), read_time + write_time);
            metrics.record_frame(
                direction,
                frame.payload.len(),
                frame.wire_len(),
                read_time,
                write_time,
            );

            debug!(
                session_id = session.id,
                %direction,
                seq = forwarded,
                frame_type = frame.frame_type,
                length = frame.length(),
                read_us = read_time.as_micros() as u64,
                write_us = write_time.as_micros() as u64,
                "Forwarded frame"
            );
        };

        // Let the peer see the close promptly even while the other pump
        // still holds the read half of the same socket.
        let _ = sink.shutdown().await;
        session.close();

        debug!(
            session_id = session.id,
            %direction,
            frames = forwarded,
            "Pump stopped"
        );
        exit
    }
}

/// Read one frame, timing only the payload transfer after the header arrives
async fn read_timed<R>(codec: &FrameCodec, source: &mut R) -> Result<(Frame, Duration), RelayError>
where
    R: AsyncRead + Unpin,
{
    let header = codec.read_header(source).await?;
    let started = Instant::now();
    let payload = codec.read_payload(source, header.length).await?;
    let frame = Frame {
        version: header.version,
        frame_type: header.frame_type,
        payload,
    };
    Ok((frame, started.elapsed()))
}
