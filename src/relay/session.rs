//! Relay Session

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::protocol::Direction;

/// Registry key for a session
pub type SessionId = u64;

/// Lifecycle of a relay session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting = 0,
    Active = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Active,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Shared state of one downstream/upstream pairing.
///
/// The sockets themselves are owned by the two pumps; the session holds the
/// close signal that makes both pumps let go of them.
#[derive(Debug)]
pub struct RelaySession {
    pub id: SessionId,
    /// `<ip>_<port>` of the downstream peer, for logs only
    pub client_id: String,
    pub client_addr: SocketAddr,
    pub target_addr: SocketAddr,
    pub start_time: Instant,
    state: AtomicU8,
    request_count: AtomicU64,
    total_latency_us: AtomicU64,
    frames_up: AtomicU64,
    frames_down: AtomicU64,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
    close_tx: watch::Sender<bool>,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub id: SessionId,
    pub client_id: String,
    pub client_addr: SocketAddr,
    pub target_addr: SocketAddr,
    pub state: SessionState,
    pub start_time: SystemTime,
    pub duration_ms: u64,
    pub request_count: u64,
    pub average_latency_ms: f64,
    pub frames_up: u64,
    pub frames_down: u64,
    pub bytes_up: u64,
    pub bytes_down: u64,
}

impl RelaySession {
    /// Create a session in the `Connecting` state
    pub fn new(id: SessionId, client_addr: SocketAddr, target_addr: SocketAddr) -> Self {
        let client_id = format!("{}_{}", client_addr.ip(), client_addr.port());
        debug!(session_id = id, %client_id, %target_addr, "Creating relay session");

        let (close_tx, _) = watch::channel(false);
        Self {
            id,
            client_id,
            client_addr,
            target_addr,
            start_time: Instant::now(),
            state: AtomicU8::new(SessionState::Connecting as u8),
            request_count: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            frames_up: AtomicU64::new(0),
            frames_down: AtomicU64::new(0),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
            close_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the pumps should keep forwarding
    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Move `Connecting -> Active`; fails if the session was closed meanwhile
    pub fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Connecting as u8,
                SessionState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Enter `Closing` and signal both pumps.
    ///
    /// Safe to call any number of times from any task; only the first call
    /// changes state. Returns `true` for that first call.
    pub fn close(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= SessionState::Closing as u8 {
                return false;
            }
            match self.state.compare_exchange(
                current,
                SessionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.close_tx.send_replace(true);
        debug!(session_id = self.id, client_id = %self.client_id, "Session closing");
        true
    }

    /// Mark the session terminal once both pumps have exited
    pub fn mark_closed(&self) {
        self.state.store(SessionState::Closed as u8, Ordering::Release);
    }

    /// Receiver that resolves when `close` has been called
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }

    /// Account one forwarded frame.
    ///
    /// Requests and latency are tracked on the client-to-server direction.
    pub fn record_frame(&self, direction: Direction, wire_len: usize, latency: Duration) {
        match direction {
            Direction::ClientToServer => {
                self.request_count.fetch_add(1, Ordering::Relaxed);
                self.total_latency_us
                    .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
                self.frames_up.fetch_add(1, Ordering::Relaxed);
                self.bytes_up.fetch_add(wire_len as u64, Ordering::Relaxed);
            }
            Direction::ServerToClient => {
                self.frames_down.fetch_add(1, Ordering::Relaxed);
                self.bytes_down.fetch_add(wire_len as u64, Ordering::Relaxed);
            }
        }
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn total_latency_ms(&self) -> f64 {
        self.total_latency_us.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn average_latency_ms(&self) -> f64 {
        match self.request_count() {
            0 => 0.0,
            n => self.total_latency_ms() / n as f64,
        }
    }

    /// Wire bytes forwarded client to server
    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    /// Wire bytes forwarded server to client
    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    pub fn frames_up(&self) -> u64 {
        self.frames_up.load(Ordering::Relaxed)
    }

    pub fn frames_down(&self) -> u64 {
        self.frames_down.load(Ordering::Relaxed)
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn to_stats(&self) -> SessionStats {
        let duration = self.duration();
        SessionStats {
            id: self.id,
            client_id: self.client_id.clone(),
            client_addr: self.client_addr,
            target_addr: self.target_addr,
            state: self.state(),
            start_time: SystemTime::now() - duration,
            duration_ms: duration.as_millis() as u64,
            request_count: self.request_count(),
            average_latency_ms: self.average_latency_ms(),
            frames_up: self.frames_up(),
            frames_down: self.frames_down(),
            bytes_up: self.bytes_up(),
            bytes_down: self.bytes_down(),
        }
    }

    /// Log aggregate statistics; silent when no request was forwarded
    pub fn log_stats(&self) {
        let requests = self.request_count();
        if requests == 0 {
            return;
        }

        info!(
            session_id = self.id,
            client_id = %self.client_id,
            requests,
            average_latency_ms = %format!("{:.2}", self.average_latency_ms()),
            bytes_up = self.bytes_up(),
            bytes_down = self.bytes_down(),
            duration_ms = self.duration().as_millis() as u64,
            "Relay session statistics"
        );
    }
}
