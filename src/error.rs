// ============================================================================
// error.rs — Heatmask
// Error taxonomy for pipeline initialization, device resources and export.
// ============================================================================

use std::fmt;

/// Which device resource an allocation was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    SourceBuffer,
    MaskSurface,
    NoiseTexture,
    ReadbackBuffer,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::SourceBuffer => write!(f, "heat source buffer"),
            ResourceKind::MaskSurface => write!(f, "mask surface"),
            ResourceKind::NoiseTexture => write!(f, "noise texture"),
            ResourceKind::ReadbackBuffer => write!(f, "readback buffer"),
        }
    }
}

/// Every failure in this crate is fatal for the pipeline; none is retried.
#[derive(Debug)]
pub enum HeatmaskError {
    /// Malformed static parameters or configuration input.
    Config(String),
    /// A device allocation failed or exceeded device limits.
    ResourceExhausted { resource: ResourceKind, detail: String },
    /// A precondition of the pipeline was violated by the caller.
    Usage(String),
    /// No compatible GPU adapter found.
    NoAdapter,
    /// Failed to create GPU device.
    DeviceCreation(wgpu::RequestDeviceError),
    /// Failed to map a buffer for reading.
    Readback(String),
    /// Failed to decode or encode an image.
    Image(image::ImageError),
    /// Failed to read or write a file.
    Io(std::io::Error),
    /// Failed to parse a JSON configuration file.
    Json(serde_json::Error),
}

impl HeatmaskError {
    pub fn config(msg: impl Into<String>) -> Self {
        HeatmaskError::Config(msg.into())
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        HeatmaskError::Usage(msg.into())
    }

    pub fn exhausted(resource: ResourceKind, detail: impl Into<String>) -> Self {
        HeatmaskError::ResourceExhausted {
            resource,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for HeatmaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeatmaskError::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            HeatmaskError::ResourceExhausted { resource, detail } => {
                write!(f, "Failed to allocate {}: {}", resource, detail)
            }
            HeatmaskError::Usage(msg) => write!(f, "Pipeline misuse: {}", msg),
            HeatmaskError::NoAdapter => write!(f, "No compatible GPU adapter found"),
            HeatmaskError::DeviceCreation(e) => write!(f, "Failed to create GPU device: {}", e),
            HeatmaskError::Readback(msg) => write!(f, "Failed to read back GPU data: {}", msg),
            HeatmaskError::Image(e) => write!(f, "Image error: {}", e),
            HeatmaskError::Io(e) => write!(f, "I/O error: {}", e),
            HeatmaskError::Json(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for HeatmaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HeatmaskError::DeviceCreation(e) => Some(e),
            HeatmaskError::Image(e) => Some(e),
            HeatmaskError::Io(e) => Some(e),
            HeatmaskError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<wgpu::RequestDeviceError> for HeatmaskError {
    fn from(e: wgpu::RequestDeviceError) -> Self {
        HeatmaskError::DeviceCreation(e)
    }
}

impl From<image::ImageError> for HeatmaskError {
    fn from(e: image::ImageError) -> Self {
        HeatmaskError::Image(e)
    }
}

impl From<std::io::Error> for HeatmaskError {
    fn from(e: std::io::Error) -> Self {
        HeatmaskError::Io(e)
    }
}

impl From<serde_json::Error> for HeatmaskError {
    fn from(e: serde_json::Error) -> Self {
        HeatmaskError::Json(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_exhausted_message_names_resource() {
        let err = HeatmaskError::exhausted(ResourceKind::SourceBuffer, "out of memory");
        assert_eq!(
            err.to_string(),
            "Failed to allocate heat source buffer: out of memory"
        );
    }

    #[test]
    fn test_io_error_keeps_source() {
        let err: HeatmaskError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(err.source().is_some());
        assert!(HeatmaskError::usage("x").source().is_none());
    }
}
