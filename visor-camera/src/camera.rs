//! Camera adapters and the composed camera: device lifecycle, streaming,
//! processor installation, and emergency-stop escalation.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{error, info, warn};

use crate::dispatch::{DispatchCounters, DispatchDrawContext, FrameDispatcher, SnapshotConsumer};
use crate::error::CameraError;
use crate::processor::{FrameProcessor, InstalledProcessor, ProcessorSlot};
use visor_frame::{CameraRotation, Frame, PixelFormat};
use visor_viewport::{DrawSurface, Viewport};

/// Host-provided escalation interface.
///
/// Replaces in-band error propagation for failures inside the per-frame
/// path: the camera adapter's delivery thread must stay alive for clean
/// shutdown, so user-code failures are reported here instead of unwinding
/// through it.
pub trait HostLink: Send + Sync {
    /// Halt whatever higher-level task is running and surface `diagnostic`
    /// to the operator.
    fn emergency_stop(&self, diagnostic: &str);
}

/// A device-specific frame producer.
///
/// Implementations own their delivery thread and must serialize calls into
/// [`FrameSink::deliver`]; `deliver` returns before the adapter may reuse
/// the frame buffer it passed in.
pub trait CameraAdapter: Send {
    fn name(&self) -> &str;

    fn open(&mut self) -> Result<(), CameraError>;

    fn close(&mut self) -> Result<(), CameraError>;

    /// Pixel format of the frames this adapter delivers.
    fn frame_format(&self) -> PixelFormat;

    /// Begin producing `width` x `height` frames into `sink` from the
    /// adapter's own thread.
    fn start_stream(&mut self, width: u32, height: u32, sink: FrameSink) -> Result<(), CameraError>;

    /// Stop producing frames. Must not return until the delivery thread
    /// has made its last `deliver` call.
    fn stop_stream(&mut self) -> Result<(), CameraError>;
}

struct SinkInner {
    dispatcher: Mutex<FrameDispatcher>,
    host: Arc<dyn HostLink>,
}

/// Entry point adapters deliver frames into.
///
/// Dispatch runs synchronously on the calling thread; any error or panic
/// from the per-frame path is contained here and escalated to
/// [`HostLink::emergency_stop`] rather than propagated to the adapter.
#[derive(Clone)]
pub struct FrameSink {
    inner: Arc<SinkInner>,
}

impl FrameSink {
    pub fn deliver(&self, frame: &mut Frame, timestamp: Option<Instant>) {
        let mut dispatcher = match self.inner.dispatcher.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| dispatcher.deliver_frame(frame, timestamp)));
        drop(dispatcher);

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, "frame processing failed; escalating emergency stop");
                self.inner
                    .host
                    .emergency_stop(&format!("uncaught failure in frame processing: {e}"));
            }
            Err(panic) => {
                let msg = panic_message(&panic);
                error!(message = %msg, "frame processing panicked; escalating emergency stop");
                self.inner
                    .host
                    .emergency_stop(&format!("frame processing panicked: {msg}"));
            }
        }
    }

    pub(crate) fn with_dispatcher<R>(&self, f: impl FnOnce(&mut FrameDispatcher) -> R) -> R {
        let mut guard = match self.inner.dispatcher.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Aggregated frame statistics for the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct CameraStats {
    pub fps: f32,
    pub pipeline_ms: u32,
    pub overhead_ms: u32,
    pub total_frame_ms: u32,
    pub frame_count: u64,
}

impl CameraStats {
    /// Upper bound on achievable FPS given the average total frame time.
    pub fn max_fps_estimate(&self) -> u32 {
        if self.total_frame_ms != 0 {
            1000 / self.total_frame_ms
        } else {
            0
        }
    }
}

/// Anything that can produce preview snapshots on demand. An external
/// preview server takes this as an explicit dependency instead of the
/// camera registering itself with process-wide state.
pub trait FrameSource: Send + Sync {
    /// Arm a one-shot snapshot of the next successfully dispatched frame.
    fn request_snapshot(&self, consumer: SnapshotConsumer);
}

#[derive(Default)]
struct DeviceState {
    opened: bool,
    streaming: bool,
}

/// A camera device composed with the dispatch engine and a viewport.
pub struct Camera<A: CameraAdapter> {
    name: String,
    adapter: Mutex<A>,
    state: Mutex<DeviceState>,
    sink: FrameSink,
    viewport: Arc<Viewport>,
    slot: Arc<ProcessorSlot>,
    snapshot_req: Arc<Mutex<Option<SnapshotConsumer>>>,
    counters: Arc<DispatchCounters>,
    shutdown_done: AtomicBool,
}

impl<A: CameraAdapter> Camera<A> {
    pub fn new(adapter: A, surface: Arc<dyn DrawSurface>, host: Arc<dyn HostLink>) -> Self {
        let name = adapter.name().to_string();
        let viewport = Arc::new(Viewport::new(surface));
        let slot: Arc<ProcessorSlot> = Arc::new(Mutex::new(None));
        let snapshot_req: Arc<Mutex<Option<SnapshotConsumer>>> = Arc::new(Mutex::new(None));
        let counters = Arc::new(DispatchCounters::default());

        // The annotation hook runs against the processor that generated
        // the frame's context, which may no longer be the installed one.
        viewport.set_render_hook(Arc::new(|canvas, params, ctx| {
            if let Some(dc) = ctx.as_mut().downcast_mut::<DispatchDrawContext>() {
                let mut processor = match dc.processor.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                processor.on_draw(canvas, params, dc.user.as_mut());
            }
        }));

        let dispatcher = FrameDispatcher::new(
            Arc::clone(&viewport),
            Arc::clone(&slot),
            Arc::clone(&snapshot_req),
            Arc::clone(&counters),
        );
        let sink = FrameSink {
            inner: Arc::new(SinkInner {
                dispatcher: Mutex::new(dispatcher),
                host,
            }),
        };

        info!(camera = %name, "camera created");
        Self {
            name,
            adapter: Mutex::new(adapter),
            state: Mutex::new(DeviceState::default()),
            sink,
            viewport,
            slot,
            snapshot_req,
            counters,
            shutdown_done: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The viewport, for surface lifecycle events and pause/resume.
    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn open_device(&self) -> Result<(), CameraError> {
        let mut state = self.state.lock().unwrap();
        if state.opened {
            return Err(CameraError::IllegalState("camera device already open".into()));
        }
        self.adapter.lock().unwrap().open()?;
        state.opened = true;
        info!(camera = %self.name, "camera device opened");
        Ok(())
    }

    /// Size the viewport for the post-rotation frame geometry, activate
    /// it, and start the adapter's stream.
    pub fn start_streaming(
        &self,
        width: u32,
        height: u32,
        rotation: CameraRotation,
    ) -> Result<(), CameraError> {
        let mut state = self.state.lock().unwrap();
        if !state.opened {
            return Err(CameraError::IllegalState(
                "open_device() must succeed before start_streaming()".into(),
            ));
        }
        if state.streaming {
            return Err(CameraError::IllegalState("already streaming".into()));
        }

        let format = self.adapter.lock().unwrap().frame_format();
        let (view_w, view_h) = rotation.size_after_correction(width, height);

        self.sink.with_dispatcher(|d| d.reset_for_stream(rotation));
        self.viewport.set_size(view_w, view_h, format)?;
        self.viewport.activate();

        if let Err(e) = self
            .adapter
            .lock()
            .unwrap()
            .start_stream(width, height, self.sink.clone())
        {
            self.viewport.deactivate();
            return Err(e);
        }

        state.streaming = true;
        info!(camera = %self.name, width, height, ?rotation, "streaming started");
        Ok(())
    }

    pub fn stop_streaming(&self) -> Result<(), CameraError> {
        let mut state = self.state.lock().unwrap();
        if !state.streaming {
            return Err(CameraError::IllegalState("not streaming".into()));
        }
        // The adapter joins its delivery thread first, so nothing posts
        // into the viewport after it deactivates.
        self.adapter.lock().unwrap().stop_stream()?;
        self.viewport.deactivate();
        state.streaming = false;
        info!(camera = %self.name, "streaming stopped");
        Ok(())
    }

    /// Close the device, stopping any stream first. Idempotent.
    pub fn close_device(&self) -> Result<(), CameraError> {
        let mut state = self.state.lock().unwrap();
        if state.streaming {
            self.adapter.lock().unwrap().stop_stream()?;
            self.viewport.deactivate();
            state.streaming = false;
        }
        if state.opened {
            self.adapter.lock().unwrap().close()?;
            state.opened = false;
            info!(camera = %self.name, "camera device closed");
        }
        Ok(())
    }

    /// Install (or clear, with `None`) the processing stage. Swappable at
    /// any time without blocking an in-flight frame; the new processor's
    /// `init` runs on its first frame.
    pub fn set_processor(&self, processor: Option<Arc<Mutex<dyn FrameProcessor>>>) {
        *self.slot.lock().unwrap() = processor.map(|p| {
            Arc::new(InstalledProcessor {
                processor: p,
                initialized: AtomicBool::new(false),
            })
        });
    }

    pub fn pause_viewport(&self) {
        self.viewport.pause();
    }

    pub fn resume_viewport(&self) {
        self.viewport.resume();
    }

    /// Toggle the statistics overlay on the viewport and in snapshots.
    pub fn set_overlay_enabled(&self, enabled: bool) {
        self.viewport.set_overlay_enabled(enabled);
        self.sink.with_dispatcher(|d| d.set_overlay_enabled(enabled));
    }

    /// Forward a host-detected tap on the viewport to the installed
    /// processor.
    pub fn notify_viewport_tapped(&self) {
        let installed = self.slot.lock().unwrap().clone();
        if let Some(installed) = installed {
            let mut processor = match installed.processor.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            processor.on_viewport_tapped();
        }
    }

    pub fn stats(&self) -> CameraStats {
        self.counters.stats()
    }

    /// The host's exactly-once shutdown hook: invoked when the embedding
    /// task ends. Stops streaming and closes the device, best-effort.
    pub fn on_host_shutdown(&self) {
        if self.shutdown_done.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(camera = %self.name, "host task stopped; shutting down camera");
        if let Err(e) = self.close_device() {
            warn!(camera = %self.name, error = %e, "shutdown cleanup failed");
        }
    }
}

impl<A: CameraAdapter> FrameSource for Camera<A> {
    fn request_snapshot(&self, consumer: SnapshotConsumer) {
        *self.snapshot_req.lock().unwrap() = Some(consumer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{Processed, ProcessorError};
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;
    use visor_frame::{Color, Rect};
    use visor_viewport::{Canvas, HookParams, RenderingState, SoftwareSurface};

    /// Adapter driven by hand: `start_stream` just publishes the sink.
    struct TestAdapter {
        sink: Arc<Mutex<Option<FrameSink>>>,
    }

    impl TestAdapter {
        fn new() -> (Self, Arc<Mutex<Option<FrameSink>>>) {
            let sink = Arc::new(Mutex::new(None));
            (
                Self {
                    sink: Arc::clone(&sink),
                },
                sink,
            )
        }
    }

    impl CameraAdapter for TestAdapter {
        fn name(&self) -> &str {
            "test adapter"
        }

        fn open(&mut self) -> Result<(), CameraError> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), CameraError> {
            Ok(())
        }

        fn frame_format(&self) -> PixelFormat {
            PixelFormat::Rgb8
        }

        fn start_stream(
            &mut self,
            _width: u32,
            _height: u32,
            sink: FrameSink,
        ) -> Result<(), CameraError> {
            *self.sink.lock().unwrap() = Some(sink);
            Ok(())
        }

        fn stop_stream(&mut self) -> Result<(), CameraError> {
            *self.sink.lock().unwrap() = None;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingHost {
        stops: Mutex<Vec<String>>,
    }

    impl HostLink for RecordingHost {
        fn emergency_stop(&self, diagnostic: &str) {
            self.stops.lock().unwrap().push(diagnostic.to_string());
        }
    }

    struct PanicProcessor;

    impl FrameProcessor for PanicProcessor {
        fn process<'a>(
            &'a mut self,
            _input: &'a mut Frame,
            _timestamp: Option<Instant>,
        ) -> Result<Processed<'a>, ProcessorError> {
            panic!("user code exploded");
        }
    }

    struct FailingProcessor;

    impl FrameProcessor for FailingProcessor {
        fn process<'a>(
            &'a mut self,
            _input: &'a mut Frame,
            _timestamp: Option<Instant>,
        ) -> Result<Processed<'a>, ProcessorError> {
            Err("no lock on target".into())
        }
    }

    struct CountingProcessor {
        hits: Arc<AtomicUsize>,
        inits: Arc<AtomicUsize>,
    }

    impl FrameProcessor for CountingProcessor {
        fn init(&mut self, _first_frame: &Frame) {
            self.inits.fetch_add(1, Ordering::SeqCst);
        }

        fn process<'a>(
            &'a mut self,
            input: &'a mut Frame,
            _timestamp: Option<Instant>,
        ) -> Result<Processed<'a>, ProcessorError> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(Processed::new(input))
        }
    }

    struct AnnotatingProcessor;

    impl FrameProcessor for AnnotatingProcessor {
        fn process<'a>(
            &'a mut self,
            input: &'a mut Frame,
            _timestamp: Option<Instant>,
        ) -> Result<Processed<'a>, ProcessorError> {
            Ok(Processed::new(input).with_draw_context(7u32))
        }

        fn on_draw(
            &mut self,
            canvas: &mut dyn Canvas,
            _params: &HookParams,
            ctx: &mut (dyn Any + Send),
        ) {
            assert_eq!(*ctx.downcast_mut::<u32>().unwrap(), 7);
            canvas.fill_rect(Rect::new(0, 0, 4, 4), Color::rgb(1, 2, 3));
        }
    }

    fn camera_under_test() -> (
        Camera<TestAdapter>,
        Arc<Mutex<Option<FrameSink>>>,
        Arc<RecordingHost>,
        Arc<SoftwareSurface>,
    ) {
        let (adapter, sink) = TestAdapter::new();
        let host = Arc::new(RecordingHost::default());
        let surface = Arc::new(SoftwareSurface::new(64, 48));
        let camera = Camera::new(
            adapter,
            Arc::clone(&surface) as Arc<dyn DrawSurface>,
            Arc::clone(&host) as Arc<dyn HostLink>,
        );
        (camera, sink, host, surface)
    }

    fn deliver_one(sink: &Arc<Mutex<Option<FrameSink>>>, width: u32, height: u32) {
        let sink = sink.lock().unwrap().clone().expect("stream not started");
        let mut frame = Frame::new(width, height, PixelFormat::Rgb8);
        frame.fill(Color::rgb(50, 60, 70));
        sink.deliver(&mut frame, Some(Instant::now()));
    }

    #[test]
    fn test_streaming_lifecycle() {
        let (camera, _sink, _host, _surface) = camera_under_test();

        assert!(matches!(
            camera.start_streaming(32, 24, CameraRotation::Upright),
            Err(CameraError::IllegalState(_))
        ));

        camera.open_device().unwrap();
        camera.start_streaming(32, 24, CameraRotation::Upright).unwrap();
        assert_eq!(camera.viewport().state(), RenderingState::Active);

        assert!(matches!(
            camera.start_streaming(32, 24, CameraRotation::Upright),
            Err(CameraError::IllegalState(_))
        ));

        camera.stop_streaming().unwrap();
        assert_eq!(camera.viewport().state(), RenderingState::Stopped);
        camera.close_device().unwrap();
    }

    #[test]
    fn test_processor_runs_with_one_init() {
        let (camera, sink, host, _surface) = camera_under_test();
        camera.open_device().unwrap();
        camera.start_streaming(32, 24, CameraRotation::Upright).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let inits = Arc::new(AtomicUsize::new(0));
        camera.set_processor(Some(Arc::new(Mutex::new(CountingProcessor {
            hits: Arc::clone(&hits),
            inits: Arc::clone(&inits),
        }))));

        deliver_one(&sink, 32, 24);
        deliver_one(&sink, 32, 24);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert_eq!(camera.stats().frame_count, 2);
        assert!(host.stops.lock().unwrap().is_empty());

        camera.close_device().unwrap();
    }

    #[test]
    fn test_panicking_processor_escalates_estop() {
        let (camera, sink, host, _surface) = camera_under_test();
        camera.open_device().unwrap();
        camera.start_streaming(32, 24, CameraRotation::Upright).unwrap();
        camera.set_processor(Some(Arc::new(Mutex::new(PanicProcessor))));

        deliver_one(&sink, 32, 24);
        let stops = host.stops.lock().unwrap().clone();
        assert_eq!(stops.len(), 1);
        assert!(stops[0].contains("user code exploded"));
        drop(stops);

        // The delivery path stays usable afterwards.
        camera.set_processor(None);
        deliver_one(&sink, 32, 24);
        assert_eq!(host.stops.lock().unwrap().len(), 1);

        camera.close_device().unwrap();
    }

    #[test]
    fn test_failing_processor_escalates_estop() {
        let (camera, sink, host, _surface) = camera_under_test();
        camera.open_device().unwrap();
        camera.start_streaming(32, 24, CameraRotation::Upright).unwrap();
        camera.set_processor(Some(Arc::new(Mutex::new(FailingProcessor))));

        deliver_one(&sink, 32, 24);
        let stops = host.stops.lock().unwrap();
        assert_eq!(stops.len(), 1);
        assert!(stops[0].contains("no lock on target"));
    }

    #[test]
    fn test_rotation_resizes_viewport() {
        let (camera, sink, host, _surface) = camera_under_test();
        camera.open_device().unwrap();
        // Sideways mounting: 32x24 stream renders as 24x32.
        camera
            .start_streaming(32, 24, CameraRotation::SidewaysLeft)
            .unwrap();

        deliver_one(&sink, 32, 24);
        assert!(host.stops.lock().unwrap().is_empty());
        assert_eq!(camera.stats().frame_count, 1);
        camera.close_device().unwrap();
    }

    #[test]
    fn test_draw_hook_annotates_rendered_frame() {
        let (camera, sink, _host, surface) = camera_under_test();
        camera.set_overlay_enabled(false);
        camera.open_device().unwrap();
        camera.start_streaming(32, 24, CameraRotation::Upright).unwrap();
        camera.set_processor(Some(Arc::new(Mutex::new(AnnotatingProcessor))));

        // Let the render thread get past its initial fill, then feed it.
        let deadline = Instant::now() + Duration::from_secs(5);
        while surface.presented_count() < 1 {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }
        deliver_one(&sink, 32, 24);
        while surface.snapshot().pixel(0, 0) != Color::rgba(1, 2, 3, 255) {
            assert!(Instant::now() < deadline, "annotation never appeared");
            thread::sleep(Duration::from_millis(5));
        }

        camera.close_device().unwrap();
    }

    #[test]
    fn test_snapshot_request_via_frame_source() {
        let (camera, sink, _host, _surface) = camera_under_test();
        camera.open_device().unwrap();
        camera.start_streaming(32, 24, CameraRotation::Upright).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let source: &dyn FrameSource = &camera;
        source.request_snapshot(Box::new(move |img| {
            tx.send(img.dimensions()).unwrap();
        }));
        deliver_one(&sink, 32, 24);
        assert_eq!(rx.recv().unwrap(), (960, 720));
    }

    #[test]
    fn test_host_shutdown_hook_is_idempotent() {
        let (camera, _sink, _host, _surface) = camera_under_test();
        camera.open_device().unwrap();
        camera.start_streaming(32, 24, CameraRotation::Upright).unwrap();

        camera.on_host_shutdown();
        assert_eq!(camera.viewport().state(), RenderingState::Stopped);
        camera.on_host_shutdown();

        // Already shut down: a fresh open still works explicitly.
        camera.open_device().unwrap();
        camera.close_device().unwrap();
    }
}
