//! Error types for camera dispatch.

use thiserror::Error;
use visor_frame::{FrameError, PixelFormat};
use visor_viewport::ViewportError;

/// Errors that can occur while opening, streaming, or dispatching frames.
#[derive(Debug, Error)]
pub enum CameraError {
    /// The processing stage returned an empty, oversized, or otherwise
    /// unusable frame.
    #[error("invalid processor output: {0}")]
    InvalidOutput(String),

    /// The processing stage returned a pixel format with no displayable
    /// conversion.
    #[error("unsupported processor output format: {0:?}")]
    UnsupportedFormat(PixelFormat),

    /// An operation was invoked in a state that forbids it. A programming
    /// error at the call site, surfaced synchronously.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A camera device could not be found, opened, or streamed.
    #[error("camera device error: {0}")]
    Device(String),

    /// The processing stage itself failed.
    #[error("processing stage failed: {0}")]
    Processor(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Viewport(#[from] ViewportError),
}
