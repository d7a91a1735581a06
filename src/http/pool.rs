//! Free-list of reusable request objects.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::queue::ArrayQueue;

/// Bounded pool of boxed instances with a factory for misses.
///
/// Callers reset instances themselves; the pool only stores them. When the
/// free-list is full on release the instance is dropped.
pub struct Pool<T> {
    free: ArrayQueue<Box<T>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    created: AtomicU64,
    reused: AtomicU64,
}

impl<T> Pool<T> {
    pub fn new(capacity: usize, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            free: ArrayQueue::new(capacity.max(1)),
            factory: Box::new(factory),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    /// Take an instance off the free-list, or build one.
    pub fn acquire(&self) -> Box<T> {
        match self.free.pop() {
            Some(item) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                item
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                Box::new((self.factory)())
            }
        }
    }

    /// Put an instance back. It must no longer be referenced by any request.
    pub fn release(&self, item: Box<T>) {
        if self.free.push(item).is_err() {
            tracing::trace!("Pool full, dropping instance");
        }
    }

    /// Instances built because the free-list was empty.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Acquisitions served from the free-list.
    pub fn reused(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }

    /// Instances currently waiting on the free-list.
    pub fn idle(&self) -> usize {
        self.free.len()
    }
}
