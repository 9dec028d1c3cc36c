//! Viewport lifecycle: STOPPED / ACTIVE / PAUSED and the render thread.
//!
//! The effective state is recomputed from three inputs (user activation
//! intent, user pause intent, surface availability) every time one of them
//! changes; recompute is idempotent. The render thread is owned here:
//! started on activation, interrupted out of its blocking queue wait and
//! joined before deactivation returns, so the host may tear the surface
//! down immediately afterwards.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::pool::{FramePool, PoolError};
use crate::queue::EvictingQueue;
use crate::renderer::{StatsBoard, ViewRenderer};
use crate::surface::DrawSurface;
use visor_frame::{Color, Frame, FrameError, PixelFormat};

/// In-flight frames awaiting render. Small on purpose: the contract is
/// "show the newest frame", not "show every frame".
pub const PREVIEW_QUEUE_CAPACITY: usize = 2;

/// One extra buffer for the stage currently writing and one for the stage
/// currently reading, on top of a full queue.
pub const FRAMEBUFFER_POOL_CAPACITY: usize = PREVIEW_QUEUE_CAPACITY + 2;

const PAUSED_IDLE: Duration = Duration::from_millis(50);

/// Opaque per-frame data attached by the processing stage and handed back
/// to it by the render hook.
pub type DrawContext = Box<dyn Any + Send>;

/// Geometry the render hook needs to map frame-space coordinates onto the
/// canvas.
#[derive(Debug, Clone, Copy)]
pub struct HookParams {
    /// On-screen width of the scaled image region.
    pub onscreen_width: u32,
    /// On-screen height of the scaled image region.
    pub onscreen_height: u32,
    /// Multiply frame pixel coordinates by this to get canvas coordinates
    /// within the image region.
    pub scale_px_to_canvas: f32,
}

/// Annotation hook run on the render thread for frames that carry a draw
/// context. Runs on a different thread than the processing stage.
pub type RenderHook = Arc<dyn Fn(&mut dyn crate::surface::Canvas, &HookParams, &mut DrawContext) + Send + Sync>;

/// A pooled framebuffer plus the draw context it was posted with.
pub struct PooledFrame {
    pub frame: Frame,
    pub ctx: Option<DrawContext>,
}

#[derive(Debug, Error)]
pub enum ViewportError {
    #[error("illegal viewport state: {0}")]
    IllegalState(String),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Effective rendering state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RenderingState {
    Stopped = 0,
    Active = 1,
    Paused = 2,
}

impl RenderingState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => RenderingState::Active,
            2 => RenderingState::Paused,
            _ => RenderingState::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FrameSpec {
    width: u32,
    height: u32,
    format: PixelFormat,
}

struct Lifecycle {
    state: RenderingState,
    user_requested_active: bool,
    user_requested_pause: bool,
    force_deactivate: bool,
    surface_ready: bool,
    spec: Option<FrameSpec>,
    pool: Option<Arc<FramePool>>,
    queue: Option<Arc<EvictingQueue<PooledFrame>>>,
    exit_flag: Option<Arc<AtomicBool>>,
    join: Option<JoinHandle<()>>,
}

struct Shared {
    lifecycle: Mutex<Lifecycle>,
    /// Mirror of `Lifecycle::state`, read lock-free by the render loop.
    state: AtomicU8,
    surface: Arc<dyn DrawSurface>,
    stats: StatsBoard,
    overlay_enabled: AtomicBool,
    render_hook: Mutex<Option<RenderHook>>,
}

/// The viewport: owns the framebuffer pool, the eviction queue, and the
/// render thread, and mediates between surface availability and user
/// activation/pause intents.
pub struct Viewport {
    shared: Arc<Shared>,
}

impl Viewport {
    pub fn new(surface: Arc<dyn DrawSurface>) -> Self {
        Self {
            shared: Arc::new(Shared {
                lifecycle: Mutex::new(Lifecycle {
                    state: RenderingState::Stopped,
                    user_requested_active: false,
                    user_requested_pause: false,
                    force_deactivate: false,
                    surface_ready: true,
                    spec: None,
                    pool: None,
                    queue: None,
                    exit_flag: None,
                    join: None,
                }),
                state: AtomicU8::new(RenderingState::Stopped as u8),
                surface,
                stats: StatsBoard::default(),
                overlay_enabled: AtomicBool::new(true),
                render_hook: Mutex::new(None),
            }),
        }
    }

    /// Current effective state.
    pub fn state(&self) -> RenderingState {
        RenderingState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Configure the frame geometry. Only legal while STOPPED: clears the
    /// queue and rebuilds the framebuffer pool at the new dimensions.
    pub fn set_size(&self, width: u32, height: u32, format: PixelFormat) -> Result<(), ViewportError> {
        let mut lc = self.shared.lifecycle.lock().unwrap();
        if lc.state != RenderingState::Stopped {
            return Err(ViewportError::IllegalState(
                "cannot set size while renderer is active".into(),
            ));
        }
        if width == 0 || height == 0 {
            return Err(ViewportError::IllegalState(
                "viewport size cannot be zero".into(),
            ));
        }

        // Drop anything left over from an earlier stream before the pool
        // it came from goes away.
        if let Some(queue) = &lc.queue {
            queue.clear();
        }
        if let Some(pool) = &lc.pool {
            pool.close();
        }

        let pool = Arc::new(FramePool::new(FRAMEBUFFER_POOL_CAPACITY, width, height, format));
        let evict_pool = Arc::clone(&pool);
        let queue = Arc::new(EvictingQueue::new(
            PREVIEW_QUEUE_CAPACITY,
            move |pf: PooledFrame| evict_pool.give_back(pf.frame),
        ));

        lc.spec = Some(FrameSpec {
            width,
            height,
            format,
        });
        lc.pool = Some(pool);
        lc.queue = Some(queue);
        debug!(width, height, ?format, "viewport sized");
        Ok(())
    }

    /// Post a frame for display. When ACTIVE, the frame is copied into a
    /// pooled buffer and offered to the queue (possibly evicting the
    /// oldest); in any other state this is a cheap no-op, skipping the
    /// copy. Never blocks on the render thread.
    pub fn post(&self, frame: &Frame, ctx: Option<DrawContext>) -> Result<(), ViewportError> {
        let (pool, queue) = {
            let lc = self.shared.lifecycle.lock().unwrap();
            if lc.state != RenderingState::Active {
                return Ok(());
            }
            match (&lc.pool, &lc.queue) {
                (Some(p), Some(q)) => (Arc::clone(p), Arc::clone(q)),
                _ => return Ok(()),
            }
        };

        // The checkout happens outside the lifecycle lock; worst case the
        // viewport stops underneath us and the pool reports Closed.
        let mut buf = match pool.checkout() {
            Ok(buf) => buf,
            Err(PoolError::Closed) => {
                debug!("pool closed during post; dropping frame");
                return Ok(());
            }
        };

        if let Err(e) = buf.copy_from(frame) {
            pool.give_back(buf);
            return Err(e.into());
        }
        queue.offer(PooledFrame {
            frame: buf,
            ctx,
        });
        Ok(())
    }

    /// Request activation.
    pub fn activate(&self) {
        let mut lc = self.shared.lifecycle.lock().unwrap();
        lc.user_requested_active = true;
        self.check_state(&mut lc);
    }

    /// Request deactivation. When this returns the render thread has
    /// exited; the caller must not be the render thread itself.
    pub fn deactivate(&self) {
        let mut lc = self.shared.lifecycle.lock().unwrap();
        lc.user_requested_active = false;
        self.check_state(&mut lc);
    }

    pub fn pause(&self) {
        let mut lc = self.shared.lifecycle.lock().unwrap();
        lc.user_requested_pause = true;
        self.check_state(&mut lc);
    }

    pub fn resume(&self) {
        let mut lc = self.shared.lifecycle.lock().unwrap();
        lc.user_requested_pause = false;
        self.check_state(&mut lc);
    }

    /// The host's surface became usable.
    pub fn surface_created(&self) {
        let mut lc = self.shared.lifecycle.lock().unwrap();
        lc.force_deactivate = false;
        lc.surface_ready = true;
        self.check_state(&mut lc);
    }

    /// The host's surface is about to be destroyed. Forces a synchronous
    /// stop regardless of user intent: when this returns the render thread
    /// no longer touches the surface.
    pub fn surface_destroyed(&self) {
        let mut lc = self.shared.lifecycle.lock().unwrap();
        lc.force_deactivate = true;
        self.check_state(&mut lc);
        lc.surface_ready = false;
    }

    pub fn set_overlay_enabled(&self, enabled: bool) {
        self.shared.overlay_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Install the annotation hook run for frames that carry a draw
    /// context.
    pub fn set_render_hook(&self, hook: RenderHook) {
        *self.shared.render_hook.lock().unwrap() = Some(hook);
    }

    /// Publish statistics for the overlay. Lock-free; read by the render
    /// thread on its next cycle.
    pub fn notify_statistics(&self, fps: f32, pipeline_ms: u32, overhead_ms: u32) {
        self.shared.stats.publish(fps, pipeline_ms, overhead_ms);
    }

    /// Recompute the effective state from the current intents. Idempotent;
    /// called with the lifecycle lock held.
    fn check_state(&self, lc: &mut Lifecycle) {
        if !lc.surface_ready {
            debug!("check_state: surface not ready or doesn't exist");
            return;
        }

        if !lc.user_requested_active || lc.force_deactivate {
            if lc.state != RenderingState::Stopped {
                debug!("check_state: deactivating viewport");

                // Break the render thread out of its blocking queue wait,
                // then wait for it to die. It never takes the lifecycle
                // lock, so joining while holding it cannot deadlock.
                if let Some(exit) = &lc.exit_flag {
                    exit.store(true, Ordering::Release);
                }
                if let Some(queue) = &lc.queue {
                    queue.interrupt();
                }
                if let Some(join) = lc.join.take() {
                    if join.join().is_err() {
                        error!("render thread terminated abnormally");
                    }
                }
                lc.exit_flag = None;
                self.set_state(lc, RenderingState::Stopped);
            } else {
                debug!("check_state: already deactivated");
            }
        } else if lc.user_requested_active && lc.state == RenderingState::Stopped {
            let (pool, queue) = match (&lc.pool, &lc.queue) {
                (Some(p), Some(q)) => (Arc::clone(p), Arc::clone(q)),
                _ => {
                    warn!("check_state: cannot activate before set_size()");
                    return;
                }
            };

            debug!("check_state: activating viewport");
            self.set_state(
                lc,
                if lc.user_requested_pause {
                    RenderingState::Paused
                } else {
                    RenderingState::Active
                },
            );

            let exit = Arc::new(AtomicBool::new(false));
            let render_loop = RenderLoop {
                shared: Arc::clone(&self.shared),
                pool,
                queue,
                exit: Arc::clone(&exit),
                renderer: ViewRenderer::new(),
            };
            lc.exit_flag = Some(exit);
            lc.join = Some(
                thread::Builder::new()
                    .name("visor-render".into())
                    .spawn(move || render_loop.run())
                    .expect("failed to spawn render thread"),
            );
        }

        if lc.state != RenderingState::Stopped {
            let want = if lc.user_requested_pause {
                RenderingState::Paused
            } else {
                RenderingState::Active
            };
            if lc.state != want {
                debug!(?want, "check_state: pause state change");
                self.set_state(lc, want);
                // Kick the render thread out of its blocking wait so it
                // notices promptly.
                if let Some(queue) = &lc.queue {
                    queue.interrupt();
                }
            }
        }
    }

    fn set_state(&self, lc: &mut Lifecycle, state: RenderingState) {
        lc.state = state;
        self.shared.state.store(state as u8, Ordering::Release);
    }

    #[cfg(test)]
    fn pool_free_count(&self) -> usize {
        let lc = self.shared.lifecycle.lock().unwrap();
        lc.pool.as_ref().map(|p| p.free_count()).unwrap_or(0)
    }

    #[cfg(test)]
    fn queue_len(&self) -> usize {
        let lc = self.shared.lifecycle.lock().unwrap();
        lc.queue.as_ref().map(|q| q.len()).unwrap_or(0)
    }
}

impl Drop for Viewport {
    fn drop(&mut self) {
        // Make sure the render thread is gone even if the host forgot to
        // deactivate.
        let mut lc = self.shared.lifecycle.lock().unwrap();
        lc.user_requested_active = false;
        lc.force_deactivate = true;
        self.check_state(&mut lc);
    }
}

struct RenderLoop {
    shared: Arc<Shared>,
    pool: Arc<FramePool>,
    queue: Arc<EvictingQueue<PooledFrame>>,
    exit: Arc<AtomicBool>,
    renderer: ViewRenderer,
}

impl RenderLoop {
    fn run(mut self) {
        // Drop any frames hanging around from an earlier activation.
        self.queue.clear();
        debug!("render thread alive");

        if !self
            .shared
            .surface
            .with_canvas(&mut |canvas| canvas.fill(Color::BLUE))
        {
            debug!("canvas unavailable for initial fill");
        }

        let mut paint_paused_screen = true;

        loop {
            if self.exit.load(Ordering::Acquire) {
                break;
            }

            match RenderingState::from_u8(self.shared.state.load(Ordering::Acquire)) {
                RenderingState::Active => {
                    paint_paused_screen = true;
                    match self.queue.take() {
                        Ok(pf) => self.render_one(pf),
                        // Interrupted: loop around and re-check exit/state.
                        Err(_) => continue,
                    }
                }
                RenderingState::Paused => {
                    if paint_paused_screen {
                        paint_paused_screen = false;
                        let renderer = &self.renderer;
                        if !self
                            .shared
                            .surface
                            .with_canvas(&mut |canvas| renderer.render_paused(canvas))
                        {
                            debug!("canvas unavailable for paused screen");
                        }
                    }
                    self.queue.idle_wait(PAUSED_IDLE);
                }
                // Transiently observable while deactivation is in
                // progress; idle until the exit flag lands.
                RenderingState::Stopped => self.queue.idle_wait(PAUSED_IDLE),
            }
        }

        debug!("render thread exiting");
        self.queue.clear();
    }

    fn render_one(&mut self, mut pf: PooledFrame) {
        let stats = self.shared.stats.snapshot();
        let overlay = self.shared.overlay_enabled.load(Ordering::Relaxed);
        let hook = self.shared.render_hook.lock().unwrap().clone();

        let renderer = &self.renderer;
        let frame = &pf.frame;
        let ctx = &mut pf.ctx;
        let drew = self.shared.surface.with_canvas(&mut |canvas| {
            // A panicking hook (user code) must not kill the render
            // thread; skip the frame and keep going.
            let result = catch_unwind(AssertUnwindSafe(|| {
                renderer.render(canvas, frame, overlay, &stats, hook.as_deref(), ctx.as_mut());
            }));
            if result.is_err() {
                error!("render cycle panicked; frame skipped");
            }
        });
        if !drew {
            debug!("canvas was unavailable; skipping frame");
        }

        self.pool.give_back(pf.frame);
    }
}
