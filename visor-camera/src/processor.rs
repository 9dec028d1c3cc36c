//! The user processing stage.

use std::any::Any;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use visor_frame::Frame;
use visor_viewport::{Canvas, DrawContext, HookParams};

/// Boxed error from user processing code. Failures cross the dispatch
/// boundary and escalate to an emergency stop rather than crashing the
/// camera's delivery thread.
pub type ProcessorError = Box<dyn std::error::Error + Send + Sync>;

/// What the processing stage hands back for one frame.
pub struct Processed<'a> {
    /// The buffer to display: the input (mutated in place or untouched) or
    /// a buffer owned by the processor.
    pub frame: &'a Frame,
    /// Context for a one-shot annotation hook run later on the render
    /// thread. At most one hook fires per frame.
    pub draw_context: Option<DrawContext>,
}

impl<'a> Processed<'a> {
    pub fn new(frame: &'a Frame) -> Self {
        Self {
            frame,
            draw_context: None,
        }
    }

    /// Request an annotation hook for this frame. The context comes back
    /// verbatim in [`FrameProcessor::on_draw`]; use it to carry whatever
    /// was found in the frame so the hook knows what to draw.
    pub fn with_draw_context(mut self, ctx: impl Any + Send + 'static) -> Self {
        self.draw_context = Some(Box::new(ctx));
        self
    }
}

/// A user-supplied, swappable frame processing stage.
///
/// The installed processor reference can be swapped by the host at any
/// time without blocking frame delivery; each dispatched frame sees
/// exactly one consistent processor.
pub trait FrameProcessor: Send {
    /// Called once with the first frame this processor sees, before the
    /// first [`FrameProcessor::process`] call.
    fn init(&mut self, _first_frame: &Frame) {}

    /// Process one frame. The returned buffer must be no larger than the
    /// input in either dimension; a smaller buffer is composited onto a
    /// marker-colored backing so the crop is visible, and a single-channel
    /// buffer is expanded to a displayable form first.
    fn process<'a>(
        &'a mut self,
        input: &'a mut Frame,
        timestamp: Option<Instant>,
    ) -> Result<Processed<'a>, ProcessorError>;

    /// Annotation hook requested via [`Processed::with_draw_context`].
    ///
    /// Runs on the render thread, NOT the thread that calls `process`, and
    /// at some later time; the processor lock is held while it runs, so a
    /// long-running hook delays the next `process` call and vice versa.
    /// `onscreen` dimensions and the scale factor in `params` map
    /// frame-space coordinates onto the canvas.
    fn on_draw(&mut self, _canvas: &mut dyn Canvas, _params: &HookParams, _ctx: &mut (dyn Any + Send)) {
    }

    /// The host reports that the viewport was tapped. Handy for toggling
    /// debug views on a paused robot.
    fn on_viewport_tapped(&mut self) {}
}

/// An installed processor plus its one-shot init tracking.
pub(crate) struct InstalledProcessor {
    pub(crate) processor: Arc<Mutex<dyn FrameProcessor>>,
    pub(crate) initialized: AtomicBool,
}

/// The swap point for the current processor. Locked only for the instant
/// of reading or writing the reference, never for the duration of
/// processing, so a slow processor cannot block a concurrent swap.
pub(crate) type ProcessorSlot = Mutex<Option<Arc<InstalledProcessor>>>;
