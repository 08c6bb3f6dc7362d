//! Free-list pools for per-request scratch state.
//!
//! [`Pool::acquire`] hands out a [`Pooled`] guard. The guard owns the item
//! exclusively and may move between tasks and threads; dropping it recycles
//! the item and puts it back on the free list, so release happens exactly once
//! on every exit path, unwinding included.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Reset hook run when a pooled item is released.
pub trait Recycle {
    fn recycle(&mut self);
}

/// Snapshot of a pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Items currently parked on the free list.
    pub idle: usize,
    /// Items constructed because the free list was empty.
    pub created: usize,
}

pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    max_idle: usize,
    created: AtomicUsize,
}

impl<T> Pool<T>
where
    T: Recycle + Default,
{
    pub fn new(max_idle: usize) -> Arc<Self> {
        Arc::new(Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
            created: AtomicUsize::new(0),
        })
    }

    pub fn acquire(self: &Arc<Self>) -> Pooled<T> {
        let item = self.idle.lock().pop().unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            T::default()
        });
        Pooled {
            item: Some(item),
            pool: Arc::clone(self),
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.idle.lock().len(),
            created: self.created.load(Ordering::Relaxed),
        }
    }

    fn release(&self, mut item: T) {
        item.recycle();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(item);
        }
    }
}

/// Exclusive handle to a pooled item; returns it to the pool on drop.
pub struct Pooled<T>
where
    T: Recycle + Default,
{
    item: Option<T>,
    pool: Arc<Pool<T>>,
}

impl<T> Pooled<T>
where
    T: Recycle + Default,
{
    /// Explicit release. Equivalent to dropping the guard.
    pub fn release(self) {}
}

impl<T> Deref for Pooled<T>
where
    T: Recycle + Default,
{
    type Target = T;

    fn deref(&self) -> &T {
        // Only `Drop` takes the item out.
        match &self.item {
            Some(item) => item,
            None => unreachable!("pooled item accessed after release"),
        }
    }
}

impl<T> DerefMut for Pooled<T>
where
    T: Recycle + Default,
{
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pooled item accessed after release"),
        }
    }
}

impl<T> Drop for Pooled<T>
where
    T: Recycle + Default,
{
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

impl<T> fmt::Debug for Pooled<T>
where
    T: Recycle + Default + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&**self).finish()
    }
}

/// Pooled byte buffer for response bodies and batch slots.
#[derive(Debug, Default)]
pub struct Buffer {
    bytes: Vec<u8>,
    max_retained: Option<usize>,
}

impl Buffer {
    pub(crate) fn limit_retained(&mut self, max_retained: usize) {
        self.max_retained = Some(max_retained);
    }
}

impl Deref for Buffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.bytes
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.bytes
    }
}

impl Recycle for Buffer {
    fn recycle(&mut self) {
        self.bytes.clear();
        if let Some(max) = self.max_retained
            && self.bytes.capacity() > max
        {
            self.bytes.shrink_to(max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        hits: usize,
        recycled: usize,
    }

    impl Recycle for Counter {
        fn recycle(&mut self) {
            self.hits = 0;
            self.recycled += 1;
        }
    }

    #[test]
    fn test_reuses_released_items() {
        let pool = Pool::<Counter>::new(4);
        {
            let mut c = pool.acquire();
            c.hits = 3;
        }
        let c = pool.acquire();
        assert_eq!(c.hits, 0);
        assert_eq!(c.recycled, 1);
        assert_eq!(pool.stats().created, 1);
    }

    #[test]
    fn test_idle_list_is_bounded() {
        let pool = Pool::<Counter>::new(2);
        let guards: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        drop(guards);
        assert_eq!(pool.stats(), PoolStats { idle: 2, created: 5 });
    }

    #[test]
    fn test_release_across_threads() {
        let pool = Pool::<Buffer>::new(64);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let mut buf = pool.acquire();
                std::thread::spawn(move || {
                    buf.extend_from_slice(format!("item {i}").as_bytes());
                    buf.release();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pool.stats().idle, 8);
        for _ in 0..8 {
            assert!(pool.acquire().is_empty());
        }
    }

    #[test]
    fn test_buffer_drops_excess_capacity() {
        let mut buf = Buffer::default();
        buf.limit_retained(16);
        buf.extend_from_slice(&[0u8; 1024]);
        buf.recycle();
        assert!(buf.is_empty());
        assert!(buf.capacity() < 1024);
    }
}
