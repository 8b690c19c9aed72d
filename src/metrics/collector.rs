//! Metrics Collector

use std::time::Duration;

use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tracing::error;

use crate::protocol::Direction;

/// Prometheus instrumentation for frames and sessions
pub struct Metrics {
    prometheus_registry: Registry,

    sessions_total: IntCounter,
    sessions_active: IntGauge,
    dial_failures_total: IntCounter,
    accept_errors_total: IntCounter,
    frames_forwarded_total: IntCounterVec,
    bytes_forwarded_total: IntCounterVec,
    frame_read_duration: HistogramVec,
    frame_write_duration: HistogramVec,
    frame_size: Histogram,
    session_duration: Histogram,
}

impl Metrics {
    /// Create a collector with every metric registered on a private registry
    pub fn new() -> Self {
        let prometheus_registry = Registry::new();

        let sessions_total = IntCounter::new(
            "framerelay_sessions_total",
            "Total number of relay sessions that reached the active state",
        )
        .expect("Failed to create sessions_total counter");

        let sessions_active = IntGauge::new(
            "framerelay_sessions_active",
            "Number of currently active relay sessions",
        )
        .expect("Failed to create sessions_active gauge");

        let dial_failures_total = IntCounter::new(
            "framerelay_dial_failures_total",
            "Upstream connection attempts that failed",
        )
        .expect("Failed to create dial_failures_total counter");

        let accept_errors_total = IntCounter::new(
            "framerelay_accept_errors_total",
            "Errors returned by the listener accept call",
        )
        .expect("Failed to create accept_errors_total counter");

        let frames_forwarded_total = IntCounterVec::new(
            Opts::new("framerelay_frames_forwarded_total", "Frames forwarded by direction"),
            &["direction"],
        )
        .expect("Failed to create frames_forwarded_total counter");

        let bytes_forwarded_total = IntCounterVec::new(
            Opts::new(
                "framerelay_bytes_forwarded_total",
                "Wire bytes (header + payload) forwarded by direction",
            ),
            &["direction"],
        )
        .expect("Failed to create bytes_forwarded_total counter");

        let latency_buckets = vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0];

        let frame_read_duration = HistogramVec::new(
            HistogramOpts::new(
                "framerelay_frame_read_seconds",
                "Time to read a frame payload once its header arrived",
            )
            .buckets(latency_buckets.clone()),
            &["direction"],
        )
        .expect("Failed to create frame_read_duration histogram");

        let frame_write_duration = HistogramVec::new(
            HistogramOpts::new("framerelay_frame_write_seconds", "Time to write a frame to the sink")
                .buckets(latency_buckets),
            &["direction"],
        )
        .expect("Failed to create frame_write_duration histogram");

        let frame_size = Histogram::with_opts(
            HistogramOpts::new("framerelay_frame_payload_bytes", "Frame payload sizes")
                .buckets(prometheus::exponential_buckets(16.0, 4.0, 10).unwrap_or_default()),
        )
        .expect("Failed to create frame_size histogram");

        let session_duration = Histogram::with_opts(
            HistogramOpts::new(
                "framerelay_session_duration_seconds",
                "Lifetime of relay sessions in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0]),
        )
        .expect("Failed to create session_duration histogram");

        prometheus_registry
            .register(Box::new(sessions_total.clone()))
            .expect("Failed to register sessions_total");
        prometheus_registry
            .register(Box::new(sessions_active.clone()))
            .expect("Failed to register sessions_active");
        prometheus_registry
            .register(Box::new(dial_failures_total.clone()))
            .expect("Failed to register dial_failures_total");
        prometheus_registry
            .register(Box::new(accept_errors_total.clone()))
            .expect("Failed to register accept_errors_total");
        prometheus_registry
            .register(Box::new(frames_forwarded_total.clone()))
            .expect("Failed to register frames_forwarded_total");
        prometheus_registry
            .register(Box::new(bytes_forwarded_total.clone()))
            .expect("Failed to register bytes_forwarded_total");
        prometheus_registry
            .register(Box::new(frame_read_duration.clone()))
            .expect("Failed to register frame_read_duration");
        prometheus_registry
            .register(Box::new(frame_write_duration.clone()))
            .expect("Failed to register frame_write_duration");
        prometheus_registry
            .register(Box::new(frame_size.clone()))
            .expect("Failed to register frame_size");
        prometheus_registry
            .register(Box::new(session_duration.clone()))
            .expect("Failed to register session_duration");

        Self {
            prometheus_registry,
            sessions_total,
            sessions_active,
            dial_failures_total,
            accept_errors_total,
            frames_forwarded_total,
            bytes_forwarded_total,
            frame_read_duration,
            frame_write_duration,
            frame_size,
            session_duration,
        }
    }

    pub fn session_started(&self) {
        self.sessions_total.inc();
        self.sessions_active.inc();
    }

    pub fn session_ended(&self, duration: Duration) {
        self.sessions_active.dec();
        self.session_duration.observe(duration.as_secs_f64());
    }

    pub fn record_dial_failure(&self) {
        self.dial_failures_total.inc();
    }

    pub fn record_accept_error(&self) {
        self.accept_errors_total.inc();
    }

    /// Record one forwarded frame
    pub fn record_frame(
        &self,
        direction: Direction,
        payload_len: usize,
        wire_len: usize,
        read_time: Duration,
        write_time: Duration,
    ) {
        let label = direction.as_str();
        self.frames_forwarded_total.with_label_values(&[label]).inc();
        self.bytes_forwarded_total
            .with_label_values(&[label])
            .inc_by(wire_len as u64);
        self.frame_read_duration
            .with_label_values(&[label])
            .observe(read_time.as_secs_f64());
        self.frame_write_duration
            .with_label_values(&[label])
            .observe(write_time.as_secs_f64());
        self.frame_size.observe(payload_len as f64);
    }

    pub fn active_sessions(&self) -> i64 {
        self.sessions_active.get()
    }

    pub fn total_sessions(&self) -> u64 {
        self.sessions_total.get()
    }

    pub fn dial_failures(&self) -> u64 {
        self.dial_failures_total.get()
    }

    pub fn frames_forwarded(&self, direction: Direction) -> u64 {
        self.frames_forwarded_total
            .with_label_values(&[direction.as_str()])
            .get()
    }

    pub fn bytes_forwarded(&self, direction: Direction) -> u64 {
        self.bytes_forwarded_total
            .with_label_values(&[direction.as_str()])
            .get()
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.prometheus_registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
