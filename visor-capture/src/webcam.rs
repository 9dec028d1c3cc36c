//! Webcam capture using nokhwa.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use tracing::{debug, info, warn};
use visor_camera::{CameraAdapter, CameraError, FrameSink};
use visor_frame::{Frame, PixelFormat};

/// Webcam adapter.
///
/// The nokhwa device is created and used entirely on the delivery thread;
/// `start_stream` blocks until that thread reports whether the device
/// accepted the requested mode.
pub struct Webcam {
    index: u32,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    opened: bool,
}

impl Webcam {
    /// Create a webcam adapter for the given device index.
    pub fn new(index: u32) -> Self {
        Self {
            index,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            opened: false,
        }
    }

    /// List available webcam devices.
    pub fn list_devices() -> Result<Vec<String>, CameraError> {
        let devices = nokhwa::query(ApiBackend::Auto)
            .map_err(|e| CameraError::Device(e.to_string()))?;

        Ok(devices
            .into_iter()
            .map(|info| format!("{}: {}", info.index(), info.human_name()))
            .collect())
    }
}

impl CameraAdapter for Webcam {
    fn name(&self) -> &str {
        "webcam"
    }

    fn open(&mut self) -> Result<(), CameraError> {
        let devices =
            nokhwa::query(ApiBackend::Auto).map_err(|e| CameraError::Device(e.to_string()))?;
        let found = devices
            .iter()
            .any(|info| matches!(info.index(), CameraIndex::Index(i) if *i == self.index));
        if !found {
            return Err(CameraError::Device(format!(
                "webcam index {} not found",
                self.index
            )));
        }
        self.opened = true;
        info!(index = self.index, "webcam opened");
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
            return Err(CameraError::IllegalState("webcam not open".into()));
        }
        if self.worker.is_some() {
            return Err(CameraError::IllegalState("stream already running".into()));
        }

        self.stop.store(false, Ordering::SeqCst);
        let stop = Arc::clone(&self.stop);
        let index = self.index;
        let (init_tx, init_rx) = mpsc::channel::<Result<(), CameraError>>();

        let worker = thread::Builder::new()
            .name("visor-webcam".into())
            .spawn(move || {
                // The device lives entirely on this thread.
                let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
                    CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, 30),
                ));
                let mut camera =
                    match nokhwa::Camera::new(CameraIndex::Index(index), requested)
                        .map_err(|e| CameraError::Device(e.to_string()))
                    {
                        Ok(camera) => camera,
                        Err(e) => {
                            let _ = init_tx.send(Err(e));
                            return;
                        }
                    };

                let resolution = camera.resolution();
                if resolution.width() != width || resolution.height() != height {
                    let _ = init_tx.send(Err(CameraError::Device(format!(
                        "webcam does not support {}x{} (closest is {}x{})",
                        width,
                        height,
                        resolution.width(),
                        resolution.height()
                    ))));
                    return;
                }
                info!(
                    "webcam streaming {}x{} @ {:?} fps",
                    resolution.width(),
                    resolution.height(),
                    camera.frame_rate()
                );
                let _ = init_tx.send(Ok(()));

                let mut frame_count = 0u64;
                while !stop.load(Ordering::SeqCst) {
                    let captured_at = Instant::now();
                    let buffer = match camera.frame() {
                        Ok(buffer) => buffer,
                        Err(e) => {
                            warn!(error = %e, "webcam frame capture failed; skipping");
                            continue;
                        }
                    };
                    let decoded = match buffer.decode_image::<RgbFormat>() {
                        Ok(decoded) => decoded,
                        Err(e) => {
                            warn!(error = %e, "webcam frame decode failed; skipping");
                            continue;
                        }
                    };
                    if decoded.dimensions() != (width, height) {
                        warn!(
                            "webcam delivered {}x{}, expected {}x{}; skipping",
                            decoded.width(),
                            decoded.height(),
                            width,
                            height
                        );
                        continue;
                    }

                    // Move the decoded bytes straight into a Frame rather
                    // than going through image-crate types, which nokhwa
                    // pins to a different version.
                    let mut frame = match Frame::from_raw(
                        width,
                        height,
                        PixelFormat::Rgb8,
                        decoded.into_raw(),
                    ) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "webcam frame had unexpected layout; skipping");
                            continue;
                        }
                    };
                    sink.deliver(&mut frame, Some(captured_at));
                    frame_count += 1;
                    debug!(frame_count, "delivered webcam frame");
                }
                info!("webcam capture stopped after {} frames", frame_count);
            })
            .map_err(|e| CameraError::Device(format!("failed to spawn capture thread: {e}")))?;

        self.worker = Some(worker);

        match init_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                // Setup failed; the thread has already exited.
                if let Some(worker) = self.worker.take() {
                    let _ = worker.join();
                }
                Err(e)
            }
            Err(_) => {
                if let Some(worker) = self.worker.take() {
                    let _ = worker.join();
                }
                Err(CameraError::Device("webcam capture thread died during setup".into()))
            }
        }
    }

    fn stop_stream(&mut self) -> Result<(), CameraError> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| CameraError::Device("webcam capture thread panicked".into()))?;
        }
        Ok(())
    }
}

impl Drop for Webcam {
    fn drop(&mut self) {
        let _ = self.stop_stream();
    }
}
