//! Broker
//!
//! Owns the listening socket and the accept loop, and coordinates shutdown
//! of every live session.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::RelayError;
use crate::metrics::Metrics;
use crate::relay::{RelayEngine, SessionRegistry};
use crate::Result;

/// Pause after a failed accept before trying again
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts downstream connections and starts one session per connection
pub struct Broker {
    config: Arc<Config>,
    engine: Arc<RelayEngine>,
    registry: Arc<SessionRegistry>,
    metrics: Arc<Metrics>,
    listener: Option<TcpListener>,
    shutdown_tx: watch::Sender<bool>,
}

/// Cloneable control handle for a running broker
#[derive(Clone)]
pub struct BrokerHandle {
    registry: Arc<SessionRegistry>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_timeout: Duration,
}

impl Broker {
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let engine = Arc::new(RelayEngine::from_config(
            &config,
            registry.clone(),
            metrics.clone(),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            engine,
            registry,
            metrics,
            listener: None,
            shutdown_tx,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn handle(&self) -> BrokerHandle {
        BrokerHandle {
            registry: self.registry.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            shutdown_timeout: self.config.server.shutdown_timeout,
        }
    }

    /// Bind the listening socket, returning the bound address
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let listen_address = self.config.listen_address();
        info!("Binding TCP listener to {}", listen_address);

        let listener = TcpListener::bind(&listen_address)
            .await
            .with_context(|| format!("Failed to bind broker to {}", listen_address))?;
        let local_addr = listener.local_addr()?;

        info!(
            %local_addr,
            target = %self.engine.target(),
            "Broker listening"
        );
        self.listener = Some(listener);
        Ok(local_addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Bind if needed and run the accept loop until shutdown
    pub async fn start(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        self.accept_connections().await
    }

    async fn accept_connections(&mut self) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("Listener not initialized"))?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!("Starting connection acceptance loop");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            debug!(client_addr = %addr, "Accepted connection");
                            let engine = Arc::clone(&self.engine);
                            tokio::spawn(async move {
                                if let Err(e) = engine.handle_connection(stream, addr).await {
                                    debug!(client_addr = %addr, error = %e, "Session ended before it started");
                                }
                            });
                        }
                        Err(e) => self.handle_accept_error(e).await,
                    }
                }
                _ = async { shutdown_rx.wait_for(|stop| *stop).await.map(|_| ()) } => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    break;
                }
            }
        }

        drop(listener);
        info!("Connection acceptance loop stopped");
        Ok(())
    }

    /// Log and count a failed accept, then back off so a persistent error
    /// such as EMFILE does not spin the loop
    async fn handle_accept_error(&self, error: std::io::Error) {
        let e = RelayError::AcceptError(error);
        error!(error = %e, "Error accepting connection");
        self.metrics.record_accept_error();
        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
    }

    /// Stop accepting, close every session and wait for them to drain
    pub async fn shutdown(&self) -> Result<()> {
        self.handle().shutdown().await
    }
}

impl BrokerHandle {
    /// Refuse new sessions, close live ones and stop the accept loop
    pub fn initiate_shutdown(&self) {
        let sessions = self.registry.begin_shutdown();
        info!(
            live_sessions = sessions.len(),
            "Initiating graceful shutdown of broker"
        );

        for session in sessions {
            if session.close() {
                debug!(session_id = session.id, client_id = %session.client_id, "Closing session");
            }
        }

        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Wait for the registry to empty, up to the configured timeout
    pub async fn wait_for_sessions_to_close(&self) -> Result<()> {
        let start_time = Instant::now();

        info!(
            "Waiting for {} sessions to close (timeout: {:?})",
            self.registry.len(),
            self.shutdown_timeout
        );

        while !self.registry.is_empty() && start_time.elapsed() < self.shutdown_timeout {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining = self.registry.len();
        let elapsed = start_time.elapsed();

        if remaining == 0 {
            info!("All sessions closed gracefully in {:?}", elapsed);
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} sessions still active",
                elapsed, remaining
            );
        }

        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.initiate_shutdown();
        self.wait_for_sessions_to_close().await
    }
}
