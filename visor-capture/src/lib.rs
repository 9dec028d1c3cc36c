//! Visor Capture - camera source adapters
//!
//! This crate provides implementations of the `CameraAdapter` trait from
//! visor-camera for producing video frames:
//!
//! - Synthetic test-pattern generator (always available; used by tests and
//!   demos)
//! - Webcams (via nokhwa, requires `webcam` feature)
//!
//! ## Example
//!
//! ```ignore
//! use visor_capture::SyntheticCamera;
//! use visor_camera::{Camera, CameraAdapter};
//!
//! let camera = Camera::new(SyntheticCamera::new(), surface, host);
//! camera.open_device()?;
//! camera.start_streaming(640, 480, CameraRotation::Upright)?;
//! ```

mod synthetic;

#[cfg(feature = "webcam")]
mod webcam;

pub use synthetic::SyntheticCamera;

#[cfg(feature = "webcam")]
pub use webcam::Webcam;

// Re-export the adapter trait and sink for convenience
pub use visor_camera::{CameraAdapter, CameraError, FrameSink};
