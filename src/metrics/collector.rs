//! Metrics collection and registry.

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Registering or encoding failed.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Cumulative counters of one camera at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraSnapshot {
    /// Camera name, used as the `camera` label.
    pub camera: String,
    /// Frames dispatched by the reader.
    pub delivered: u64,
    /// Frames handed downstream by the worker.
    pub published: u64,
    /// Ready frames replaced before the worker took them.
    pub skipped: u64,
    /// Images dropped by the reader for any reason.
    pub dropped: u64,
    /// Worker waits that ended without a frame.
    pub timeouts: u64,
    /// Whether the camera is currently streaming.
    pub streaming: bool,
}

/// Prometheus registry of per-camera capture metrics.
pub struct CaptureMetrics {
    registry: Registry,
    delivered: IntCounterVec,
    published: IntCounterVec,
    skipped: IntCounterVec,
    dropped: IntCounterVec,
    timeouts: IntCounterVec,
    streaming: IntGaugeVec,
}

fn counter(name: &str, help: &str) -> Result<IntCounterVec, MetricsError> {
    Ok(IntCounterVec::new(Opts::new(name, help), &["camera"])?)
}

impl CaptureMetrics {
    /// Creates a registry with all capture metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let delivered = counter(
            "multicam_frames_delivered_total",
            "Frames converted and dispatched into the frame buffer pool",
        )?;
        let published = counter(
            "multicam_frames_published_total",
            "Frames handed to the downstream publisher",
        )?;
        let skipped = counter(
            "multicam_frames_skipped_total",
            "Ready frames replaced by a newer frame before the consumer took them",
        )?;
        let dropped = counter(
            "multicam_frames_dropped_total",
            "Raw images dropped before dispatch",
        )?;
        let timeouts = counter(
            "multicam_consumer_timeouts_total",
            "Consumer waits that timed out without a frame",
        )?;
        let streaming = IntGaugeVec::new(
            Opts::new(
                "multicam_camera_streaming",
                "Camera streaming state (1=streaming, 0=stopped)",
            ),
            &["camera"],
        )?;

        registry.register(Box::new(delivered.clone()))?;
        registry.register(Box::new(published.clone()))?;
        registry.register(Box::new(skipped.clone()))?;
        registry.register(Box::new(dropped.clone()))?;
        registry.register(Box::new(timeouts.clone()))?;
        registry.register(Box::new(streaming.clone()))?;

        Ok(Self {
            registry,
            delivered,
            published,
            skipped,
            dropped,
            timeouts,
            streaming,
        })
    }

    /// Updates one camera's metrics from a snapshot.
    pub fn update(&self, snapshot: &CameraSnapshot) {
        let labels = [snapshot.camera.as_str()];

        // Counters only move forward, so add the difference.
        for (vec, value) in [
            (&self.delivered, snapshot.delivered),
            (&self.published, snapshot.published),
            (&self.skipped, snapshot.skipped),
            (&self.dropped, snapshot.dropped),
            (&self.timeouts, snapshot.timeouts),
        ] {
            let counter = vec.with_label_values(&labels);
            let current = counter.get();
            if value > current {
                counter.inc_by(value - current);
            }
        }

        self.streaming
            .with_label_values(&labels)
            .set(i64::from(snapshot.streaming));
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl std::fmt::Debug for CaptureMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureMetrics").finish_non_exhaustive()
    }
}
