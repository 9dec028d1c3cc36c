//! Letterboxed frame rendering with the statistics overlay.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::surface::Canvas;
use crate::viewport::{DrawContext, HookParams};
use visor_frame::{Color, Frame, Rect};

/// Canvas background behind the letterboxed image.
pub(crate) const BACKGROUND: Color = Color::rgb(239, 239, 239);
/// Statistics box fill.
pub(crate) const STAT_BOX_BG: Color = Color::rgb(102, 20, 68);
/// Full-surface fill while the viewport is paused.
pub(crate) const PAUSED_FILL: Color = Color::rgb(255, 166, 0);

const STAT_BOX_W: u32 = 450;
const STAT_BOX_H: u32 = 120;
const STAT_TEXT_MARGIN: i32 = 5;
const STAT_LINE_SPACING: i32 = 35;
const STAT_TEXT_SCALE: u32 = 2;

/// Frame statistics published by the dispatch engine and read lock-free by
/// the render thread. A one-frame-stale value is fine for display.
#[derive(Default)]
pub struct StatsBoard {
    fps_bits: AtomicU32,
    pipeline_ms: AtomicU32,
    overhead_ms: AtomicU32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub fps: f32,
    pub pipeline_ms: u32,
    pub overhead_ms: u32,
}

impl StatsBoard {
    pub fn publish(&self, fps: f32, pipeline_ms: u32, overhead_ms: u32) {
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
        self.pipeline_ms.store(pipeline_ms, Ordering::Relaxed);
        self.overhead_ms.store(overhead_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fps: f32::from_bits(self.fps_bits.load(Ordering::Relaxed)),
            pipeline_ms: self.pipeline_ms.load(Ordering::Relaxed),
            overhead_ms: self.overhead_ms.load(Ordering::Relaxed),
        }
    }
}

/// Draws one frame onto a canvas: background fill, black backing rect,
/// aspect-preserving centered scale, optional annotation hook, optional
/// statistics overlay. Also used offscreen for preview snapshots.
pub struct ViewRenderer;

impl ViewRenderer {
    pub fn new() -> Self {
        Self
    }

    /// The centered, aspect-preserving destination rect for a
    /// `frame_w` x `frame_h` image on a `canvas_w` x `canvas_h` canvas.
    pub fn letterbox_rect(frame_w: u32, frame_h: u32, canvas_w: u32, canvas_h: u32) -> Rect {
        if frame_w == 0 || frame_h == 0 || canvas_w == 0 || canvas_h == 0 {
            return Rect::new(0, 0, 0, 0);
        }
        let aspect = frame_w as f64 / frame_h as f64;
        if (canvas_h as f64 * aspect) < canvas_w as f64 {
            // Vertical bounds are hit first: use the full height and
            // center horizontally.
            let scaled_h = canvas_h;
            let scaled_w = (canvas_h as f64 * aspect).round() as u32;
            Rect::new(((canvas_w - scaled_w) / 2) as i32, 0, scaled_w, scaled_h)
        } else {
            // Horizontal bounds are hit first: use the full width and
            // center vertically.
            let scaled_w = canvas_w;
            let scaled_h = (canvas_w as f64 / aspect).round() as u32;
            Rect::new(0, ((canvas_h - scaled_h) / 2) as i32, scaled_w, scaled_h)
        }
    }

    /// Render one frame. The backing rect is painted black each cycle so
    /// partial-alpha annotations cannot bleed across double-buffered swaps.
    pub fn render(
        &self,
        canvas: &mut dyn Canvas,
        frame: &Frame,
        overlay_enabled: bool,
        stats: &StatsSnapshot,
        hook: Option<&(dyn Fn(&mut dyn Canvas, &HookParams, &mut DrawContext) + Send + Sync)>,
        ctx: Option<&mut DrawContext>,
    ) {
        let (cw, ch) = (canvas.width(), canvas.height());
        canvas.fill(BACKGROUND);

        let dest = Self::letterbox_rect(frame.width(), frame.height(), cw, ch);
        canvas.fill_rect(dest, Color::BLACK);
        canvas.draw_frame_scaled(frame, dest);

        if let (Some(hook), Some(ctx)) = (hook, ctx) {
            let params = HookParams {
                onscreen_width: dest.width,
                onscreen_height: dest.height,
                scale_px_to_canvas: dest.width as f32 / frame.width() as f32,
            };
            hook(canvas, &params, ctx);
        }

        if overlay_enabled {
            // Anchored to the letterboxed image region: one of dest.x /
            // dest.y is always zero.
            let stat_rect = Rect::new(
                dest.x,
                ch as i32 - STAT_BOX_H as i32 - dest.y,
                STAT_BOX_W,
                STAT_BOX_H,
            );
            self.draw_stats(canvas, stat_rect, frame.width(), frame.height(), stats);
        }
    }

    fn draw_stats(
        &self,
        canvas: &mut dyn Canvas,
        rect: Rect,
        frame_w: u32,
        frame_h: u32,
        stats: &StatsSnapshot,
    ) {
        canvas.fill_rect(rect, STAT_BOX_BG);

        let x = rect.x + STAT_TEXT_MARGIN;
        let y1 = rect.y + 12;
        let y2 = y1 + STAT_LINE_SPACING;
        let y3 = y2 + STAT_LINE_SPACING;

        canvas.draw_text(
            &format!("visor v{}", env!("CARGO_PKG_VERSION")),
            x,
            y1,
            STAT_TEXT_SCALE,
            Color::WHITE,
        );
        canvas.draw_text(
            &format!("FPS@{}x{}: {:.2}", frame_w, frame_h, stats.fps),
            x,
            y2,
            STAT_TEXT_SCALE,
            Color::WHITE,
        );
        canvas.draw_text(
            &format!(
                "Pipeline: {}ms - Overhead: {}ms",
                stats.pipeline_ms, stats.overhead_ms
            ),
            x,
            y3,
            STAT_TEXT_SCALE,
            Color::WHITE,
        );
    }

    /// Paint the static paused placeholder.
    pub fn render_paused(&self, canvas: &mut dyn Canvas) {
        let ch = canvas.height();
        canvas.fill(PAUSED_FILL);
        canvas.fill_rect(Rect::new(0, ch as i32 - 40, 450, 40), STAT_BOX_BG);
        canvas.draw_text(
            "VIEWPORT PAUSED",
            STAT_TEXT_MARGIN,
            ch as i32 - 33,
            STAT_TEXT_SCALE,
            Color::WHITE,
        );
    }
}

impl Default for ViewRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::SoftwareCanvas;
    use std::sync::Mutex;
    use visor_frame::PixelFormat;

    #[test]
    fn test_letterbox_landscape_canvas() {
        // 4:3 frame on a wide canvas: full height, centered horizontally.
        let r = ViewRenderer::letterbox_rect(320, 240, 1000, 300);
        assert_eq!(r.height, 300);
        assert_eq!(r.width, 400);
        assert_eq!(r.x, 300);
        assert_eq!(r.y, 0);
    }

    #[test]
    fn test_letterbox_portrait_canvas() {
        // 4:3 frame on a tall canvas: full width, centered vertically.
        let r = ViewRenderer::letterbox_rect(320, 240, 300, 1000);
        assert_eq!(r.width, 300);
        assert_eq!(r.height, 225);
        assert_eq!(r.x, 0);
        assert_eq!(r.y, 388);
    }

    #[test]
    fn test_overlay_toggle() {
        // Frame and canvas share an aspect ratio, so the image fills the
        // canvas and the stats box sits at (0, 360)..(450, 480).
        let mut frame = Frame::new(32, 24, PixelFormat::Rgb8);
        frame.fill(Color::rgb(10, 10, 10));
        let renderer = ViewRenderer::new();
        let stats = StatsSnapshot::default();
        let box_bg = Color::rgba(STAT_BOX_BG.r, STAT_BOX_BG.g, STAT_BOX_BG.b, 255);

        let mut canvas = SoftwareCanvas::new(640, 480);
        renderer.render(&mut canvas, &frame, true, &stats, None, None);
        assert_eq!(canvas.frame().pixel(2, 470), box_bg);

        let mut canvas = SoftwareCanvas::new(640, 480);
        renderer.render(&mut canvas, &frame, false, &stats, None, None);
        assert_eq!(canvas.frame().pixel(2, 470), Color::rgba(10, 10, 10, 255));
    }

    #[test]
    fn test_hook_receives_scale_factors() {
        let mut frame = Frame::new(100, 100, PixelFormat::Rgb8);
        frame.fill(Color::WHITE);
        let renderer = ViewRenderer::new();
        let stats = StatsSnapshot::default();
        let mut canvas = SoftwareCanvas::new(200, 200);

        let seen: Mutex<Option<HookParams>> = Mutex::new(None);
        let hook = |_c: &mut dyn Canvas, p: &HookParams, _ctx: &mut DrawContext| {
            *seen.lock().unwrap() = Some(*p);
        };
        let mut ctx: DrawContext = Box::new(());
        renderer.render(&mut canvas, &frame, false, &stats, Some(&hook), Some(&mut ctx));

        let p = seen.lock().unwrap().unwrap();
        assert_eq!(p.onscreen_width, 200);
        assert_eq!(p.onscreen_height, 200);
        assert!((p.scale_px_to_canvas - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_paused_screen() {
        let renderer = ViewRenderer::new();
        let mut canvas = SoftwareCanvas::new(100, 100);
        renderer.render_paused(&mut canvas);
        let c = canvas.frame().pixel(50, 10);
        assert_eq!(c, Color::rgba(PAUSED_FILL.r, PAUSED_FILL.g, PAUSED_FILL.b, 255));
    }
}
