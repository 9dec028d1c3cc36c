//! Viewport rendering for the visor camera stack.
//!
//! This crate owns the display half of the pipeline: a fixed-capacity
//! framebuffer pool, the evicting frame queue between the delivery thread
//! and the render thread, the viewport state machine that starts and stops
//! the render thread, and the renderer that letterboxes frames onto a
//! host-provided drawing surface.

mod font;
mod pool;
mod queue;
mod renderer;
mod surface;
mod viewport;

pub use pool::{FramePool, PoolError};
pub use queue::{EvictingQueue, Interrupted};
pub use renderer::{StatsBoard, StatsSnapshot, ViewRenderer};
pub use surface::{Canvas, DrawSurface, SoftwareCanvas, SoftwareSurface};
pub use viewport::{
    DrawContext, HookParams, PooledFrame, RenderHook, RenderingState, Viewport, ViewportError,
    FRAMEBUFFER_POOL_CAPACITY, PREVIEW_QUEUE_CAPACITY,
};
