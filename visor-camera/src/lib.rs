//! Frame dispatch for the visor camera stack.
//!
//! This crate sits between the camera adapters and the viewport: it runs
//! the swappable user processing stage over each delivered frame, corrects
//! rotation, reconciles output sizes and formats, keeps rolling
//! performance statistics, and contains user-code failures behind an
//! emergency-stop escalation to the host.

mod camera;
mod dispatch;
mod error;
mod processor;
mod stats;

pub use camera::{Camera, CameraAdapter, CameraStats, FrameSink, FrameSource, HostLink};
pub use dispatch::{FrameDispatcher, SnapshotConsumer, CROP_MARKER};
pub use error::CameraError;
pub use processor::{FrameProcessor, Processed, ProcessorError};
pub use stats::MovingStats;
