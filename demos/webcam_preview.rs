//! Streams a real webcam into a software surface and reports statistics.
//!
//! Run with: `cargo run --example webcam_preview --features webcam`

use std::sync::{mpsc, Arc};
use std::time::Duration;

use tracing::{error, info};
use visor::{Camera, CameraRotation, FrameSource, HostLink, SoftwareSurface, Webcam};

struct LoggingHost;

impl HostLink for LoggingHost {
    fn emergency_stop(&self, diagnostic: &str) {
        error!(diagnostic, "EMERGENCY STOP");
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

    for device in Webcam::list_devices()? {
        info!(device = %device, "found webcam");
    }

    let surface = Arc::new(SoftwareSurface::new(1280, 720));
    let camera = Camera::new(
        Webcam::new(0),
        Arc::clone(&surface) as Arc<dyn visor::DrawSurface>,
        Arc::new(LoggingHost) as Arc<dyn HostLink>,
    );

    camera.open_device()?;
    camera.start_streaming(640, 480, CameraRotation::Upright)?;

    let (tx, rx) = mpsc::channel();
    camera.request_snapshot(Box::new(move |img| {
        let _ = tx.send(img);
    }));

    std::thread::sleep(Duration::from_secs(3));

    let stats = camera.stats();
    info!(
        fps = stats.fps,
        pipeline_ms = stats.pipeline_ms,
        overhead_ms = stats.overhead_ms,
        frames = stats.frame_count,
        max_fps = stats.max_fps_estimate(),
        "streaming statistics"
    );

    if let Ok(snapshot) = rx.try_recv() {
        snapshot.save("webcam_preview.png")?;
        info!("snapshot written to webcam_preview.png");
    }

    camera.stop_streaming()?;
    camera.close_device()?;
    Ok(())
}
