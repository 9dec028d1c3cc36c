//! Streams the synthetic test pattern through a small processing stage and
//! writes a rendered preview snapshot to disk.
//!
//! Run with: `cargo run --example synthetic_preview`

use std::any::Any;
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{error, info};
use visor::{
    Camera, CameraRotation, Canvas, Color, Frame, FrameProcessor, FrameSource, HookParams,
    HostLink, Processed, ProcessorError, Rect, SoftwareSurface, SyntheticCamera,
};

struct LoggingHost;

impl HostLink for LoggingHost {
    fn emergency_stop(&self, diagnostic: &str) {
        error!(diagnostic, "EMERGENCY STOP");
    }
}

/// Where the "detection" landed, in frame coordinates.
struct TargetBox {
    x: i32,
    y: i32,
}

/// Inverts a horizontal band of the frame and marks a fake detection via
/// the render-thread draw hook.
struct BandInverter;

impl FrameProcessor for BandInverter {
    fn process<'a>(
        &'a mut self,
        input: &'a mut Frame,
        _timestamp: Option<Instant>,
    ) -> Result<Processed<'a>, ProcessorError> {
        let (width, height) = input.dimensions();
        for y in height / 3..2 * height / 3 {
            for x in 0..width {
                let c = input.pixel(x, y);
                input.put_pixel(x, y, Color::rgb(255 - c.r, 255 - c.g, 255 - c.b));
            }
        }
        Ok(Processed::new(input).with_draw_context(TargetBox {
            x: width as i32 / 2,
            y: height as i32 / 2,
        }))
    }

    fn on_draw(&mut self, canvas: &mut dyn Canvas, params: &HookParams, ctx: &mut (dyn Any + Send)) {
        if let Some(target) = ctx.downcast_ref::<TargetBox>() {
            let s = params.scale_px_to_canvas;
            canvas.fill_rect(
                Rect::new(
                    (target.x as f32 * s) as i32 - 4,
                    (target.y as f32 * s) as i32 - 4,
                    8,
                    8,
                ),
                Color::rgb(255, 0, 0),
            );
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let surface = Arc::new(SoftwareSurface::new(640, 480));
    let camera = Camera::new(
        SyntheticCamera::new(),
        Arc::clone(&surface) as Arc<dyn visor::DrawSurface>,
        Arc::new(LoggingHost) as Arc<dyn HostLink>,
    );

    camera.open_device()?;
    camera.start_streaming(320, 240, CameraRotation::Upright)?;
    camera.set_processor(Some(Arc::new(Mutex::new(BandInverter))));

    let (tx, rx) = mpsc::channel();
    camera.request_snapshot(Box::new(move |img| {
        let _ = tx.send(img);
    }));

    std::thread::sleep(Duration::from_secs(2));

    let stats = camera.stats();
    info!(
        fps = stats.fps,
        pipeline_ms = stats.pipeline_ms,
        overhead_ms = stats.overhead_ms,
        frames = stats.frame_count,
        "streaming statistics"
    );

    if let Ok(snapshot) = rx.try_recv() {
        snapshot.save("synthetic_preview.png")?;
        info!("snapshot written to synthetic_preview.png");
    }

    camera.stop_streaming()?;
    camera.close_device()?;
    Ok(())
}
