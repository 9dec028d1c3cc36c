//! Core frame data types for the visor camera stack.
//!
//! These are CPU-side pixel buffers shared by every stage of the pipeline:
//! capture adapters fill them, the dispatch engine rotates and reconciles
//! them, and the viewport copies them into pooled framebuffers for display.

mod frame;
mod types;

pub use frame::{Frame, FrameError};
pub use types::{CameraRotation, Color, PixelFormat, Rect, Rotate};
