//! Bounded frame queue that evicts instead of blocking the producer.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use thiserror::Error;

/// Cooperative-cancellation signal from a blocking [`EvictingQueue::take`].
/// Not a failure: the waiter is expected to re-check state and either retry
/// or shut down.
#[derive(Debug, Error)]
#[error("blocking wait interrupted")]
pub struct Interrupted;

struct QueueState<T> {
    items: VecDeque<T>,
    interrupted: bool,
}

/// Bounded FIFO handoff between the frame producer and the render thread.
///
/// `offer` never blocks: at capacity the oldest entry is handed to the
/// eviction sink (which returns it to the framebuffer pool) before the new
/// entry is inserted. `take` blocks until an entry arrives or the queue is
/// interrupted; the interrupt flag is consumed by exactly one wait, like a
/// thread interrupt status.
pub struct EvictingQueue<T> {
    capacity: usize,
    evict: Box<dyn Fn(T) + Send + Sync>,
    state: Mutex<QueueState<T>>,
    ready: Condvar,
}

impl<T> EvictingQueue<T> {
    pub fn new(capacity: usize, evict: impl Fn(T) + Send + Sync + 'static) -> Self {
        assert!(capacity > 0, "queue capacity must be nonzero");
        Self {
            capacity,
            evict: Box::new(evict),
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                interrupted: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Insert an entry, evicting the oldest if the queue is full.
    ///
    /// The eviction sink runs outside the queue lock so the producer never
    /// holds two locks at once on its way back to the pool.
    pub fn offer(&self, item: T) {
        let evicted = {
            let mut st = self.state.lock().unwrap();
            let evicted = if st.items.len() == self.capacity {
                st.items.pop_front()
            } else {
                None
            };
            st.items.push_back(item);
            evicted
        };
        if let Some(old) = evicted {
            (self.evict)(old);
        }
        self.ready.notify_one();
    }

    /// Block until an entry is available or [`EvictingQueue::interrupt`] is
    /// called. A pending interrupt wins over a pending entry so state
    /// changes are noticed promptly; no entry is lost (it stays queued).
    pub fn take(&self) -> Result<T, Interrupted> {
        let mut st = self.state.lock().unwrap();
        loop {
            if st.interrupted {
                st.interrupted = false;
                return Err(Interrupted);
            }
            if let Some(item) = st.items.pop_front() {
                return Ok(item);
            }
            st = self.ready.wait(st).unwrap();
        }
    }

    /// Sleep until `timeout` elapses or the queue is interrupted, without
    /// consuming entries. Used by the paused render loop, which must wake
    /// promptly when the state machine pokes it.
    pub fn idle_wait(&self, timeout: Duration) {
        let mut st = self.state.lock().unwrap();
        if st.interrupted {
            st.interrupted = false;
            return;
        }
        let (mut st, _timed_out) = self.ready.wait_timeout(st, timeout).unwrap();
        if st.interrupted {
            st.interrupted = false;
        }
    }

    /// Break the current (or next) blocking wait out with `Interrupted`.
    pub fn interrupt(&self) {
        self.state.lock().unwrap().interrupted = true;
        self.ready.notify_all();
    }

    /// Drain every entry through the eviction sink.
    pub fn clear(&self) {
        let drained: Vec<T> = {
            let mut st = self.state.lock().unwrap();
            st.items.drain(..).collect()
        };
        for item in drained {
            (self.evict)(item);
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
