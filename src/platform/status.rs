//! Platform status codes and the error type built on them.

use thiserror::Error;

/// Failure status reported by the camera platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraStatus {
    /// A handle or argument was not recognised.
    InvalidParameter,
    /// The camera id has no characteristics.
    MetadataNotFound,
    /// The device reported a fatal error.
    CameraDevice,
    /// The camera service failed.
    CameraService,
    /// The session was closed underneath the call.
    SessionClosed,
    /// The call is not valid in the object's current state.
    InvalidOperation,
    /// The session could not be configured with its outputs.
    StreamConfigureFail,
    /// The device is already open.
    CameraInUse,
    /// The image ring has no free buffer; every image is held by the reader.
    NoBufferAvailable,
}

impl CameraStatus {
    /// Short human-readable description.
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraStatus::InvalidParameter => "invalid parameter",
            CameraStatus::MetadataNotFound => "metadata not found",
            CameraStatus::CameraDevice => "camera device error",
            CameraStatus::CameraService => "camera service error",
            CameraStatus::SessionClosed => "session closed",
            CameraStatus::InvalidOperation => "invalid operation",
            CameraStatus::StreamConfigureFail => "stream configuration failed",
            CameraStatus::CameraInUse => "camera in use",
            CameraStatus::NoBufferAvailable => "no image buffer available",
        }
    }
}

impl std::fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed platform call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {status}")]
pub struct PlatformError {
    /// Name of the platform call that failed.
    pub operation: &'static str,
    /// Why it failed.
    pub status: CameraStatus,
}

impl PlatformError {
    /// Error for `operation` with `status`.
    pub fn new(operation: &'static str, status: CameraStatus) -> Self {
        Self { operation, status }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_operation_and_status() {
        let err = PlatformError::new("open_device", CameraStatus::CameraInUse);
        assert_eq!(err.to_string(), "open_device failed: camera in use");
    }
}
