//! Fixed-capacity framebuffer pool.
//!
//! All buffers are allocated up front at the configured frame geometry so
//! steady-state operation never allocates. The free list has its own lock
//! and condvar, independent of the viewport lifecycle lock, so the camera
//! delivery thread and the render thread never contend through the state
//! machine.

use std::sync::{Condvar, Mutex};

use thiserror::Error;
use tracing::debug;
use visor_frame::{Frame, PixelFormat};

#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool was closed (viewport reconfigured or shut down) while a
    /// checkout was waiting or about to wait.
    #[error("framebuffer pool closed")]
    Closed,
}

struct PoolInner {
    free: Vec<Frame>,
    outstanding: usize,
    closed: bool,
}

/// A pool of pre-allocated, reusable framebuffers.
///
/// `checkout()` blocks until a buffer is free; `give_back()` may be called
/// from any thread. The conservation invariant (free + outstanding ==
/// capacity) is asserted on every return; a violation is a programming
/// error in the caller's buffer accounting, not a runtime condition.
pub struct FramePool {
    inner: Mutex<PoolInner>,
    available: Condvar,
    capacity: usize,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl FramePool {
    pub fn new(capacity: usize, width: u32, height: u32, format: PixelFormat) -> Self {
        assert!(capacity > 0, "pool capacity must be nonzero");
        let free = (0..capacity).map(|_| Frame::new(width, height, format)).collect();
        debug!(capacity, width, height, ?format, "allocated framebuffer pool");
        Self {
            inner: Mutex::new(PoolInner {
                free,
                outstanding: 0,
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
            width,
            height,
            format,
        }
    }

    /// Take a buffer out of the pool, blocking until one is free.
    ///
    /// Returns `Err(PoolError::Closed)` once [`FramePool::close`] has been
    /// called; waiters are woken rather than left blocked forever.
    pub fn checkout(&self) -> Result<Frame, PoolError> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.closed {
                return Err(PoolError::Closed);
            }
            if let Some(frame) = inner.free.pop() {
                inner.outstanding += 1;
                return Ok(frame);
            }
            inner = self.available.wait(inner).unwrap();
        }
    }

    /// Return a buffer to the pool. Safe from any thread.
    ///
    /// Returning a buffer that did not come from this pool, or returning
    /// one twice, trips the conservation asserts.
    pub fn give_back(&self, frame: Frame) {
        assert_eq!(
            frame.dimensions(),
            (self.width, self.height),
            "framebuffer does not match this pool's geometry"
        );
        assert_eq!(
            frame.format(),
            self.format,
            "framebuffer does not match this pool's pixel format"
        );

        let mut inner = self.inner.lock().unwrap();
        assert!(
            inner.outstanding > 0,
            "framebuffer returned to a pool with none outstanding"
        );
        inner.outstanding -= 1;
        if !inner.closed {
            inner.free.push(frame);
        }
        drop(inner);
        self.available.notify_one();
    }

    /// Close the pool: drop the free buffers and wake any blocked
    /// checkouts with `PoolError::Closed`. Outstanding buffers are dropped
    /// as they come back.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        inner.free.clear();
        drop(inner);
        self.available.notify_all();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffers currently sitting in the free list.
    pub fn free_count(&self) -> usize {
        self.inner.lock().unwrap().free.len()
    }

    /// Buffers currently checked out.
    pub fn outstanding_count(&self) -> usize {
        self.inner.lock().unwrap().outstanding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_conservation_across_checkouts() {
        let pool = FramePool::new(4, 8, 8, PixelFormat::Rgba8);
        let a = pool.checkout().unwrap();
        let b = pool.checkout().unwrap();
        assert_eq!(pool.free_count() + pool.outstanding_count(), 4);
        pool.give_back(a);
        assert_eq!(pool.free_count() + pool.outstanding_count(), 4);
        pool.give_back(b);
        assert_eq!(pool.free_count(), 4);
        assert_eq!(pool.outstanding_count(), 0);
    }

    #[test]
    fn test_blocked_checkout_woken_by_give_back() {
        let pool = Arc::new(FramePool::new(1, 4, 4, PixelFormat::Gray8));
        let only = pool.checkout().unwrap();

        let (tx, rx) = mpsc::channel();
        let p2 = Arc::clone(&pool);
        let waiter = thread::spawn(move || {
            let frame = p2.checkout().unwrap();
            tx.send(()).unwrap();
            p2.give_back(frame);
        });

        // The waiter cannot make progress until we return the buffer.
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        pool.give_back(only);
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        waiter.join().unwrap();
    }

    #[test]
    fn test_close_wakes_blocked_checkout() {
        let pool = Arc::new(FramePool::new(1, 4, 4, PixelFormat::Gray8));
        let _held = pool.checkout().unwrap();

        let p2 = Arc::clone(&pool);
        let waiter = thread::spawn(move || p2.checkout());
        thread::sleep(Duration::from_millis(20));
        pool.close();
        assert!(matches!(waiter.join().unwrap(), Err(PoolError::Closed)));
    }

    #[test]
    fn test_give_back_after_close_drops_buffer() {
        let pool = FramePool::new(2, 4, 4, PixelFormat::Gray8);
        let frame = pool.checkout().unwrap();
        pool.close();
        pool.give_back(frame);
        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.outstanding_count(), 0);
    }

    #[test]
    #[should_panic(expected = "none outstanding")]
    fn test_double_return_is_fatal() {
        let pool = FramePool::new(2, 4, 4, PixelFormat::Gray8);
        pool.give_back(Frame::new(4, 4, PixelFormat::Gray8));
    }
}
