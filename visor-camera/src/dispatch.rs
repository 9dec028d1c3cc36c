//! Per-frame orchestration: rotation correction, the user processing
//! stage, size/format reconciliation, rolling statistics, and snapshot
//! fulfillment.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use image::RgbaImage;
use tracing::debug;

use crate::camera::CameraStats;
use crate::error::CameraError;
use crate::processor::{Processed, ProcessorSlot};
use crate::stats::MovingStats;
use crate::FrameProcessor;
use visor_frame::{CameraRotation, Color, Frame, PixelFormat};
use visor_viewport::{DrawContext, SoftwareCanvas, StatsSnapshot, ViewRenderer, Viewport};

/// Fill color for the letterboxed remainder when the processing stage
/// returns a cropped frame: visibly "you cropped this" rather than a
/// silent stretch.
pub const CROP_MARKER: Color = Color::rgba(82, 61, 46, 255);

/// Bounding size of delivered preview snapshots; cropped down to the
/// frame's aspect ratio so no space is wasted on borders.
const SNAPSHOT_MAX_W: u32 = 1280;
const SNAPSHOT_MAX_H: u32 = 720;

/// One-shot consumer of a rendered preview snapshot.
pub type SnapshotConsumer = Box<dyn FnOnce(RgbaImage) + Send>;

/// Draw context the dispatcher attaches to posted frames: the context the
/// processor asked for, plus a handle to the processor that generated it.
/// The hook must run against the generating processor, not whatever is
/// installed by the time the frame reaches the screen.
pub(crate) struct DispatchDrawContext {
    pub(crate) processor: Arc<Mutex<dyn FrameProcessor>>,
    pub(crate) user: DrawContext,
}

/// Rolling aggregates mirrored out of the dispatch thread for the host's
/// stats getters.
#[derive(Default)]
pub(crate) struct DispatchCounters {
    frame_count: AtomicU64,
    fps_bits: AtomicU32,
    pipeline_ms: AtomicU32,
    overhead_ms: AtomicU32,
    total_ms: AtomicU32,
}

impl DispatchCounters {
    fn record(&self, fps: f32, pipeline_ms: u32, overhead_ms: u32, total_ms: u32) {
        self.frame_count.fetch_add(1, Ordering::Relaxed);
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
        self.pipeline_ms.store(pipeline_ms, Ordering::Relaxed);
        self.overhead_ms.store(overhead_ms, Ordering::Relaxed);
        self.total_ms.store(total_ms, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> CameraStats {
        CameraStats {
            fps: f32::from_bits(self.fps_bits.load(Ordering::Relaxed)),
            pipeline_ms: self.pipeline_ms.load(Ordering::Relaxed),
            overhead_ms: self.overhead_ms.load(Ordering::Relaxed),
            total_frame_ms: self.total_ms.load(Ordering::Relaxed),
            frame_count: self.frame_count.load(Ordering::Relaxed),
        }
    }
}

const STATS_WINDOW: usize = 30;

/// The frame dispatch / statistics engine.
///
/// `deliver_frame` is invoked synchronously from the camera adapter's own
/// delivery thread, one call at a time; it returns before the adapter may
/// reuse its buffer.
pub struct FrameDispatcher {
    slot: Arc<ProcessorSlot>,
    viewport: Arc<Viewport>,
    rotation: CameraRotation,
    interval_stats: MovingStats,
    pipeline_stats: MovingStats,
    total_stats: MovingStats,
    last_frame_at: Option<Instant>,
    // Scratch buffers, allocated once and reshaped to the stream.
    rotate_scratch: Frame,
    letterbox_scratch: Option<Frame>,
    convert_scratch: Frame,
    renderer: ViewRenderer,
    snapshot_req: Arc<Mutex<Option<SnapshotConsumer>>>,
    counters: Arc<DispatchCounters>,
    overlay_in_snapshots: bool,
    last_overlay_stats: StatsSnapshot,
}

impl FrameDispatcher {
    pub(crate) fn new(
        viewport: Arc<Viewport>,
        slot: Arc<ProcessorSlot>,
        snapshot_req: Arc<Mutex<Option<SnapshotConsumer>>>,
        counters: Arc<DispatchCounters>,
    ) -> Self {
        Self {
            slot,
            viewport,
            rotation: CameraRotation::Upright,
            interval_stats: MovingStats::new(STATS_WINDOW),
            pipeline_stats: MovingStats::new(STATS_WINDOW),
            total_stats: MovingStats::new(STATS_WINDOW),
            last_frame_at: None,
            rotate_scratch: Frame::new(0, 0, PixelFormat::Rgb8),
            letterbox_scratch: None,
            convert_scratch: Frame::new(0, 0, PixelFormat::Rgb8),
            renderer: ViewRenderer::new(),
            snapshot_req,
            counters,
            overlay_in_snapshots: true,
            last_overlay_stats: StatsSnapshot::default(),
        }
    }

    /// Reset timing state for a new stream and record its rotation.
    pub(crate) fn reset_for_stream(&mut self, rotation: CameraRotation) {
        self.rotation = rotation;
        self.interval_stats.clear();
        self.pipeline_stats.clear();
        self.total_stats.clear();
        self.last_frame_at = None;
        self.letterbox_scratch = None;
    }

    pub(crate) fn set_overlay_enabled(&mut self, enabled: bool) {
        self.overlay_in_snapshots = enabled;
    }

    /// Run one frame through the pipeline.
    ///
    /// Errors (and the panics the sink catches around this) mean user code
    /// or reconciliation failed; the caller escalates them to the host as
    /// an emergency stop instead of letting them kill the delivery thread.
    pub fn deliver_frame(
        &mut self,
        frame: &mut Frame,
        timestamp: Option<Instant>,
    ) -> Result<(), CameraError> {
        let frame_start = Instant::now();

        if let Some(prev) = self.last_frame_at.replace(frame_start) {
            self.interval_stats
                .push(frame_start.duration_since(prev).as_secs_f64() * 1000.0);
        }
        let mean_interval = self.interval_stats.mean();
        let avg_fps = if mean_interval > 0.0 {
            (1000.0 / mean_interval) as f32
        } else {
            0.0
        };

        if frame.is_empty() {
            return Err(CameraError::Device("adapter delivered an empty frame".into()));
        }

        // Rotate onto the dedicated scratch, never in place: a quarter
        // turn swaps width/height, which would invalidate any sub-region
        // view user code holds into the delivered buffer.
        let input: &mut Frame = match self.rotation.correction() {
            Some(rot) => {
                frame.rotate_into(rot, &mut self.rotate_scratch);
                &mut self.rotate_scratch
            }
            None => frame,
        };
        let (in_w, in_h) = input.dimensions();
        let in_fmt = input.format();

        // One consistent processor reference for the whole frame; the
        // slot lock is held only for this clone.
        let installed = self.slot.lock().unwrap().clone();

        match installed {
            Some(installed) => {
                let mut processor = match installed.processor.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if !installed.initialized.swap(true, Ordering::Relaxed) {
                    processor.init(input);
                }

                let pipeline_start = Instant::now();
                let Processed {
                    frame: out_frame,
                    draw_context,
                } = processor
                    .process(input, timestamp)
                    .map_err(CameraError::Processor)?;
                self.pipeline_stats
                    .push(pipeline_start.elapsed().as_secs_f64() * 1000.0);

                let display = reconcile_output(
                    out_frame,
                    (in_w, in_h),
                    in_fmt,
                    &mut self.letterbox_scratch,
                    &mut self.convert_scratch,
                )?;

                let ctx = draw_context.map(|user| {
                    Box::new(DispatchDrawContext {
                        processor: Arc::clone(&installed.processor),
                        user,
                    }) as DrawContext
                });
                self.viewport.post(display, ctx)?;
                fulfill_snapshot(
                    &self.snapshot_req,
                    &self.renderer,
                    display,
                    self.last_overlay_stats,
                    self.overlay_in_snapshots,
                );
            }
            None => {
                // Pass-through mode: the raw (or rotated) frame is
                // displayed unmodified.
                let display: &Frame = input;
                self.viewport.post(display, None)?;
                fulfill_snapshot(
                    &self.snapshot_req,
                    &self.renderer,
                    display,
                    self.last_overlay_stats,
                    self.overlay_in_snapshots,
                );
            }
        }

        let avg_pipeline = self.pipeline_stats.mean().round() as u32;
        let avg_total = self.total_stats.mean().round() as u32;
        let avg_overhead = avg_total.saturating_sub(avg_pipeline);
        self.viewport.notify_statistics(avg_fps, avg_pipeline, avg_overhead);
        self.last_overlay_stats = StatsSnapshot {
            fps: avg_fps,
            pipeline_ms: avg_pipeline,
            overhead_ms: avg_overhead,
        };
        self.counters.record(avg_fps, avg_pipeline, avg_overhead, avg_total);
        self.total_stats
            .push(frame_start.elapsed().as_secs_f64() * 1000.0);
        Ok(())
    }
}

/// Validate the processing stage's output against the input geometry and
/// produce the frame that goes to the screen.
fn reconcile_output<'a>(
    output: &'a Frame,
    input_dims: (u32, u32),
    input_format: PixelFormat,
    letterbox: &'a mut Option<Frame>,
    convert: &'a mut Frame,
) -> Result<&'a Frame, CameraError> {
    let (in_w, in_h) = input_dims;

    if output.is_empty() {
        return Err(CameraError::InvalidOutput(
            "processing stage returned an empty frame".into(),
        ));
    }

    let (out_w, out_h) = output.dimensions();
    if out_w > in_w || out_h > in_h {
        return Err(CameraError::InvalidOutput(format!(
            "processing stage returned {out_w}x{out_h}, larger than the {in_w}x{in_h} input"
        )));
    }

    if (out_w, out_h) == (in_w, in_h) && output.format() == input_format {
        return Ok(output);
    }

    // Single-channel (or otherwise mismatched) output: expand to the
    // display format on a separate scratch, never in place, to avoid
    // breaking user-held views of the output buffer.
    let src: &Frame = if output.format() == input_format {
        output
    } else {
        output
            .convert_into(input_format, convert)
            .map_err(|_| CameraError::UnsupportedFormat(output.format()))?;
        convert
    };

    if (out_w, out_h) == (in_w, in_h) {
        return Ok(src);
    }

    // Cropped output: composite onto a marker-colored backing of the full
    // input size so the user can see what they cut off.
    let backing = letterbox.get_or_insert_with(|| Frame::new(in_w, in_h, input_format));
    backing.reshape(in_w, in_h, input_format);
    backing.fill(CROP_MARKER);
    backing.blit_top_left(src)?;
    Ok(backing)
}

/// Deliver a pending one-shot preview snapshot, if armed.
fn fulfill_snapshot(
    req: &Mutex<Option<SnapshotConsumer>>,
    renderer: &ViewRenderer,
    display: &Frame,
    stats: StatsSnapshot,
    overlay: bool,
) {
    let Some(consumer) = req.lock().unwrap().take() else {
        return;
    };

    let mut w = SNAPSHOT_MAX_W;
    let mut h = SNAPSHOT_MAX_H;
    let image_aspect = display.width() as f32 / display.height() as f32;
    let fixed_aspect = w as f32 / h as f32;
    if image_aspect > fixed_aspect {
        h = (w as f32 / image_aspect).round().max(1.0) as u32;
    } else {
        w = (h as f32 * image_aspect).round().max(1.0) as u32;
    }

    debug!(w, h, "rendering preview snapshot");
    let mut canvas = SoftwareCanvas::new(w, h);
    renderer.render(&mut canvas, display, overlay, &stats, None, None);
    consumer(canvas.into_frame().to_rgba_image());
}
