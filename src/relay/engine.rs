//! Relay Engine
//!
//! Turns an accepted downstream connection into a running session: dials the
//! upstream service, registers the session, runs both pumps and tears the
//! session down once they have exited.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::pump::{Pump, PumpExit};
use super::registry::SessionRegistry;
use super::session::{RelaySession, SessionStats};
use crate::config::{format_host_port, Config};
use crate::error::RelayError;
use crate::metrics::Metrics;
use crate::protocol::{Direction, FrameCodec};

/// Creates and drives relay sessions toward one upstream target
pub struct RelayEngine {
    target_host: String,
    target_port: u16,
    connect_timeout: Duration,
    codec: FrameCodec,
    registry: Arc<SessionRegistry>,
    metrics: Arc<Metrics>,
}

impl RelayEngine {
    pub fn new(
        target_host: impl Into<String>,
        target_port: u16,
        connect_timeout: Duration,
        codec: FrameCodec,
        registry: Arc<SessionRegistry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            target_host: target_host.into(),
            target_port,
            connect_timeout,
            codec,
            registry,
            metrics,
        }
    }

    /// Create a relay engine from configuration
    pub fn from_config(
        config: &Config,
        registry: Arc<SessionRegistry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self::new(
            config.upstream.target_host.clone(),
            config.upstream.target_port,
            config.upstream.connect_timeout,
            FrameCodec::new(config.limits.max_frame_length),
            registry,
            metrics,
        )
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn target(&self) -> String {
        format_host_port(&self.target_host, self.target_port)
    }

    /// Establish connection to the upstream service
    pub async fn connect_to_target(&self) -> Result<(TcpStream, SocketAddr), RelayError> {
        let target = self.target();
        debug!("Attempting to connect to target: {}", target);

        let resolved = timeout(self.connect_timeout, lookup_host(target.clone())).await;
        let addrs: Vec<SocketAddr> = match resolved {
            Ok(Ok(addrs)) => addrs.collect(),
            Ok(Err(e)) => {
                return Err(RelayError::DialError {
                    target,
                    reason: format!("resolution failed: {}", e),
                })
            }
            Err(_) => {
                return Err(RelayError::DialError {
                    target,
                    reason: "resolution timed out".to_string(),
                })
            }
        };

        let mut last_error = None;
        for addr in addrs {
            match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    debug!("Connected to target: {}", addr);
                    return Ok((stream, addr));
                }
                Ok(Err(e)) => {
                    warn!("Failed to connect to {}: {}", addr, e);
                    last_error = Some(e.to_string());
                }
                Err(_) => {
                    warn!("Connection to {} timed out after {:?}", addr, self.connect_timeout);
                    last_error = Some(format!("timed out after {:?}", self.connect_timeout));
                }
            }
        }

        Err(RelayError::DialError {
            target,
            reason: last_error.unwrap_or_else(|| "no addresses resolved".to_string()),
        })
    }

    /// Run one session for an accepted downstream connection.
    ///
    /// Returns once both pumps have exited and the session is deregistered.
    pub async fn handle_connection(
        &self,
        downstream: TcpStream,
        client_addr: SocketAddr,
    ) -> Result<SessionStats, RelayError> {
        let session_id = self.registry.next_id();

        let (upstream, target_addr) = match self.connect_to_target().await {
            Ok(connected) => connected,
            Err(e) => {
                self.metrics.record_dial_failure();
                error!(session_id, %client_addr, error = %e, "Upstream dial failed, closing downstream");
                drop(downstream);
                return Err(e);
            }
        };

        let session = Arc::new(RelaySession::new(session_id, client_addr, target_addr));
        self.registry.register(session.clone()).inspect_err(|_| {
            warn!(session_id, client_id = %session.client_id, "Rejecting session during shutdown");
        })?;

        if !session.activate() {
            self.registry.remove(session_id);
            session.mark_closed();
            return Err(RelayError::ShuttingDown);
        }

        for stream in [&downstream, &upstream] {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(session_id, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        self.metrics.session_started();
        info!(
            session_id,
            client_id = %session.client_id,
            %target_addr,
            "Session active"
        );

        let (downstream_read, downstream_write) = downstream.into_split();
        let (upstream_read, upstream_write) = upstream.into_split();

        let client_to_server = Pump::new(
            session.clone(),
            Direction::ClientToServer,
            downstream_read,
            upstream_write,
            self.codec,
            self.metrics.clone(),
        );
        let server_to_client = Pump::new(
            session.clone(),
            Direction::ServerToClient,
            upstream_read,
            downstream_write,
            self.codec,
            self.metrics.clone(),
        );

        let c2s = tokio::spawn(client_to_server.run());
        let s2c = tokio::spawn(server_to_client.run());
        let (c2s_exit, s2c_exit) = tokio::join!(c2s, s2c);

        for (direction, exit) in [
            (Direction::ClientToServer, c2s_exit),
            (Direction::ServerToClient, s2c_exit),
        ] {
            match exit {
                Ok(PumpExit::Closed) => {}
                Ok(PumpExit::Failed(e)) => {
                    debug!(session_id, %direction, error = %e, "Pump ended with error");
                }
                Err(e) => {
                    error!(session_id, %direction, error = %e, "Pump task panicked");
                }
            }
        }

        // Both pumps are gone, so both sockets are closed by now
        session.close();
        self.registry.remove(session_id);
        session.mark_closed();
        self.metrics.session_ended(session.duration());

        session.log_stats();
        info!(
            session_id,
            client_id = %session.client_id,
            duration_ms = session.duration().as_millis() as u64,
            "Session closed"
        );

        Ok(session.to_stats())
    }
}
