//! The drawing seam between the render thread and the host.
//!
//! The host owns the actual on-screen surface (this crate is not a UI
//! framework); it implements [`DrawSurface`] over whatever windowing or
//! framebuffer stack it uses. [`SoftwareCanvas`] is the built-in CPU
//! implementation of [`Canvas`], used for offscreen snapshot rendering and
//! by [`SoftwareSurface`] in tests and demos.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::font;
use visor_frame::{Color, Frame, PixelFormat, Rect};

/// A locked drawing target for one frame.
pub trait Canvas {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Fill the whole canvas.
    fn fill(&mut self, color: Color);

    /// Fill a rectangle, clipped to the canvas.
    fn fill_rect(&mut self, rect: Rect, color: Color);

    /// Draw `frame` scaled into `dst` (nearest-neighbor), clipped to the
    /// canvas.
    fn draw_frame_scaled(&mut self, frame: &Frame, dst: Rect);

    /// Draw a line of text with its top-left corner at `(x, y)`.
    fn draw_text(&mut self, text: &str, x: i32, y: i32, scale: u32, color: Color);
}

/// A host-provided drawable surface.
///
/// Implementations lock their canvas, run the closure, and present the
/// result when it returns. Returning `false` means the surface is
/// transiently unavailable (being torn down or not yet created); the
/// render thread skips that cycle.
pub trait DrawSurface: Send + Sync {
    fn with_canvas(&self, draw: &mut dyn FnMut(&mut dyn Canvas)) -> bool;
}

/// CPU canvas over an RGBA [`Frame`].
pub struct SoftwareCanvas {
    frame: Frame,
}

impl SoftwareCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            frame: Frame::new(width, height, PixelFormat::Rgba8),
        }
    }

    /// The backing pixels.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }

    fn clip(&self, rect: Rect) -> Option<(u32, u32, u32, u32)> {
        let x0 = rect.x.max(0) as u32;
        let y0 = rect.y.max(0) as u32;
        let x1 = (rect.right().min(self.frame.width() as i32)).max(0) as u32;
        let y1 = (rect.bottom().min(self.frame.height() as i32)).max(0) as u32;
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some((x0, y0, x1, y1))
    }
}

impl Canvas for SoftwareCanvas {
    fn width(&self) -> u32 {
        self.frame.width()
    }

    fn height(&self) -> u32 {
        self.frame.height()
    }

    fn fill(&mut self, color: Color) {
        self.frame.fill(color);
    }

    fn fill_rect(&mut self, rect: Rect, color: Color) {
        let Some((x0, y0, x1, y1)) = self.clip(rect) else {
            return;
        };
        for y in y0..y1 {
            for x in x0..x1 {
                self.frame.put_pixel(x, y, color);
            }
        }
    }

    fn draw_frame_scaled(&mut self, frame: &Frame, dst: Rect) {
        if frame.is_empty() || dst.width == 0 || dst.height == 0 {
            return;
        }
        let Some((x0, y0, x1, y1)) = self.clip(dst) else {
            return;
        };
        for y in y0..y1 {
            // Nearest-neighbor sample positions relative to the dst rect,
            // which may extend past the canvas on any side.
            let sy = ((y as i64 - dst.y as i64) * frame.height() as i64 / dst.height as i64)
                .clamp(0, frame.height() as i64 - 1) as u32;
            for x in x0..x1 {
                let sx = ((x as i64 - dst.x as i64) * frame.width() as i64 / dst.width as i64)
                    .clamp(0, frame.width() as i64 - 1) as u32;
                self.frame.put_pixel(x, y, frame.pixel(sx, sy));
            }
        }
    }

    fn draw_text(&mut self, text: &str, x: i32, y: i32, scale: u32, color: Color) {
        font::draw_text_line(&mut self.frame, x, y, text, color, scale);
    }
}

/// In-memory [`DrawSurface`] over a [`SoftwareCanvas`].
///
/// Tests flip `set_available(false)` to exercise the canvas-unavailable
/// path; demos read the presented pixels back out with `snapshot()`.
pub struct SoftwareSurface {
    canvas: Mutex<SoftwareCanvas>,
    available: AtomicBool,
    presented: AtomicUsize,
}

impl SoftwareSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: Mutex::new(SoftwareCanvas::new(width, height)),
            available: AtomicBool::new(true),
            presented: AtomicUsize::new(0),
        }
    }

    /// Simulate surface teardown/creation.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successfully presented draw cycles.
    pub fn presented_count(&self) -> usize {
        self.presented.load(Ordering::SeqCst)
    }

    /// Copy of the last presented pixels.
    pub fn snapshot(&self) -> Frame {
        self.canvas.lock().unwrap().frame().clone()
    }
}

impl DrawSurface for SoftwareSurface {
    fn with_canvas(&self, draw: &mut dyn FnMut(&mut dyn Canvas)) -> bool {
        if !self.available.load(Ordering::SeqCst) {
            return false;
        }
        let mut canvas = self.canvas.lock().unwrap();
        draw(&mut *canvas);
        self.presented.fetch_add(1, Ordering::SeqCst);
        true
    }
}
