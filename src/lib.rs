//! Visor: camera capture and viewport rendering for robotics controllers.
//!
//! A camera adapter delivers frames into the dispatch engine, which runs a
//! swappable user processing stage, reconciles output sizes and formats,
//! keeps rolling FPS/timing statistics, and feeds a pooled, evicting
//! queue that a dedicated render thread drains onto the host's drawable
//! surface. The camera's delivery thread is never blocked by a slow
//! display, user-code failures escalate to the host's emergency stop, and
//! steady-state operation performs no per-frame allocation.
//!
//! The member crates can also be used individually:
//!
//! - `visor-frame`: pixel buffers and formats
//! - `visor-viewport`: pool, queue, state machine, render thread
//! - `visor-camera`: dispatch engine, processor trait, camera composition
//! - `visor-capture`: camera source adapters

pub use visor_camera::{
    Camera, CameraAdapter, CameraError, CameraStats, FrameDispatcher, FrameProcessor, FrameSink,
    FrameSource, HostLink, MovingStats, Processed, ProcessorError, SnapshotConsumer, CROP_MARKER,
};
pub use visor_capture::SyntheticCamera;
#[cfg(feature = "webcam")]
pub use visor_capture::Webcam;
pub use visor_frame::{CameraRotation, Color, Frame, FrameError, PixelFormat, Rect, Rotate};
pub use visor_viewport::{
    Canvas, DrawContext, DrawSurface, EvictingQueue, FramePool, HookParams, Interrupted,
    PooledFrame, RenderHook, RenderingState, SoftwareCanvas, SoftwareSurface, StatsBoard,
    StatsSnapshot, ViewRenderer, Viewport, ViewportError,
};
