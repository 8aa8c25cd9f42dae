//! Summary of a capture run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Per-camera totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CameraReport {
    /// Configured camera name.
    pub camera: String,
    /// Platform id of the detected camera.
    pub id: String,
    /// Frames the reader dispatched to the pool.
    pub delivered: u64,
    /// Frames the worker took from the pool and handed back.
    pub consumed: u64,
    /// Consumed frames the publisher accepted.
    pub published: u64,
    /// Ready frames replaced before the worker got to them.
    pub skipped: u64,
    /// Raw images with an unsupported format or layout.
    pub format_drops: u64,
    /// Every image dropped by the reader, format drops included.
    pub dropped: u64,
    /// Pool waits that ended without a frame.
    pub timeouts: u64,
    /// Time from cancellation until the worker left its loop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_latency_us: Option<u64>,
}

impl CameraReport {
    /// Time from cancellation until the worker left its loop, if it was
    /// cancelled at all.
    pub fn stop_latency(&self) -> Option<Duration> {
        self.stop_latency_us.map(Duration::from_micros)
    }
}

/// What [`super::CaptureCoordinator::run`] returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// When the workers were started.
    pub started_at: DateTime<Utc>,
    /// When the last worker was joined.
    pub stopped_at: DateTime<Utc>,
    /// One entry per camera that had a worker.
    pub cameras: Vec<CameraReport>,
}

impl RunReport {
    /// Report for the camera named `name`.
    pub fn camera(&self, name: &str) -> Option<&CameraReport> {
        self.cameras.iter().find(|c| c.camera == name)
    }

    /// Wall time between start and stop.
    pub fn duration(&self) -> Duration {
        (self.stopped_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    /// Renders the report as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
