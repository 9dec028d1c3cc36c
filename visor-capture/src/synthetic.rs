//! Synthetic test-pattern camera.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info};
use visor_camera::{CameraAdapter, CameraError, FrameSink};
use visor_frame::{Frame, PixelFormat};

/// A camera adapter that generates a moving RGB gradient on its own
/// delivery thread at a fixed interval. Stands in for real hardware in
/// tests, demos, and bench setups.
pub struct SyntheticCamera {
    interval: Duration,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    opened: bool,
}

impl SyntheticCamera {
    /// A pattern generator pacing itself at ~30 fps.
    pub fn new() -> Self {
        Self::with_frame_interval(Duration::from_millis(33))
    }

    pub fn with_frame_interval(interval: Duration) -> Self {
        Self {
            interval,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            opened: false,
        }
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraAdapter for SyntheticCamera {
    fn name(&self) -> &str {
        "synthetic camera"
    }

    fn open(&mut self) -> Result<(), CameraError> {
        self.opened = true;
        info!("synthetic camera opened");
        Ok(())
    }

    fn close(&mut self) -> Result<(), CameraError> {
        if self.worker.is_some() {
            self.stop_stream()?;
        }
        self.opened = false;
        Ok(())
    }

    fn frame_format(&self) -> PixelFormat {
        PixelFormat::Rgb8
    }

    fn start_stream(&mut self, width: u32, height: u32, sink: FrameSink) -> Result<(), CameraError> {
        if !self.opened {
            return Err(CameraError::IllegalState("synthetic camera not open".into()));
        }
        if self.worker.is_some() {
            return Err(CameraError::IllegalState("stream already running".into()));
        }

        self.stop.store(false, Ordering::SeqCst);
        let stop = Arc::clone(&self.stop);
        let interval = self.interval;

        let worker = thread::Builder::new()
            .name("visor-synthetic".into())
            .spawn(move || {
                let mut frame = Frame::new(width, height, PixelFormat::Rgb8);
                let mut tick = 0u32;
                while !stop.load(Ordering::SeqCst) {
                    let begin = Instant::now();
                    paint_test_pattern(&mut frame, tick);
                    sink.deliver(&mut frame, Some(begin));
                    tick = tick.wrapping_add(1);

                    // Pace to the target interval, compensating for the
                    // time the frame itself took.
                    if let Some(rest) = interval.checked_sub(begin.elapsed()) {
                        thread::sleep(rest);
                    }
                }
                debug!(frames = tick, "synthetic stream ended");
            })
            .map_err(|e| CameraError::Device(format!("failed to spawn pattern thread: {e}")))?;

        self.worker = Some(worker);
        info!(width, height, "synthetic stream started");
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), CameraError> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| CameraError::Device("pattern thread panicked".into()))?;
        }
        Ok(())
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        let _ = self.stop_stream();
    }
}

fn paint_test_pattern(frame: &mut Frame, tick: u32) {
    let (width, height) = frame.dimensions();
    let pitch = frame.pitch();
    let data = frame.data_mut();
    for y in 0..height as usize {
        let row = &mut data[y * pitch..(y + 1) * pitch];
        for x in 0..width as usize {
            let px = &mut row[x * 3..x * 3 + 3];
            px[0] = (x as u32 + tick) as u8;
            px[1] = (y as u32 + tick / 2) as u8;
            px[2] = (x as u32 + y as u32) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;
    use visor_camera::{Camera, HostLink};
    use visor_frame::CameraRotation;
    use visor_viewport::{DrawSurface, SoftwareSurface};

    #[derive(Default)]
    struct QuietHost {
        stops: Mutex<Vec<String>>,
    }

    impl HostLink for QuietHost {
        fn emergency_stop(&self, diagnostic: &str) {
            self.stops.lock().unwrap().push(diagnostic.to_string());
        }
    }

    #[test]
    fn test_pattern_moves_between_ticks() {
        let mut a = Frame::new(16, 16, PixelFormat::Rgb8);
        let mut b = Frame::new(16, 16, PixelFormat::Rgb8);
        paint_test_pattern(&mut a, 0);
        paint_test_pattern(&mut b, 7);
        assert_ne!(a.data(), b.data());
    }

    #[test]
    fn test_streams_frames_into_camera() {
        let host = Arc::new(QuietHost::default());
        let surface = Arc::new(SoftwareSurface::new(64, 48));
        let camera = Camera::new(
            SyntheticCamera::with_frame_interval(Duration::from_millis(5)),
            Arc::clone(&surface) as Arc<dyn DrawSurface>,
            Arc::clone(&host) as Arc<dyn HostLink>,
        );

        camera.open_device().unwrap();
        camera
            .start_streaming(32, 24, CameraRotation::Upright)
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while camera.stats().frame_count < 5 {
            assert!(Instant::now() < deadline, "no frames delivered");
            thread::sleep(Duration::from_millis(5));
        }

        camera.stop_streaming().unwrap();
        let counted = camera.stats().frame_count;
        thread::sleep(Duration::from_millis(30));
        assert_eq!(camera.stats().frame_count, counted);
        assert!(host.stops.lock().unwrap().is_empty());

        camera.close_device().unwrap();
    }
}
