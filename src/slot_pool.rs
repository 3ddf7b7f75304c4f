//! Completion-notification slot pool.
//!
//! Every offloaded transfer needs one completion slot to carry its result back through the
//! scheduler. Slots are plain capacity tokens: acquiring one decrements the free count, dropping
//! the [`CompletionSlot`] handle increments it again.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct SlotInner {
    name: String,
    capacity: usize,
    free: AtomicUsize,
}

/// Cloneable handle to a bounded pool of completion slots.
#[derive(Clone)]
pub struct CompletionPool {
    inner: Arc<SlotInner>,
}

impl CompletionPool {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(SlotInner {
                name: name.into(),
                capacity,
                free: AtomicUsize::new(capacity),
            }),
        }
    }

    /// Take one slot, or `None` when every slot is attached to an in-flight transfer.
    pub fn acquire(&self) -> Option<CompletionSlot> {
        self.inner
            .free
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |free| free.checked_sub(1))
            .ok()?;
        Some(CompletionSlot {
            pool: self.inner.clone(),
        })
    }

    pub fn available(&self) -> usize {
        self.inner.free.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl fmt::Debug for CompletionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionPool")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("available", &self.available())
            .finish()
    }
}

/// One leased completion slot; released back to its pool on drop.
pub struct CompletionSlot {
    pool: Arc<SlotInner>,
}

impl Drop for CompletionSlot {
    fn drop(&mut self) {
        self.pool.free.fetch_add(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for CompletionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSlot")
            .field("pool", &self.pool.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_until_exhausted_then_release() {
        let pool = CompletionPool::new("compl", 2);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        assert_eq!(pool.available(), 0);

        drop(a);
        assert_eq!(pool.available(), 1);
        drop(b);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn empty_pool_never_hands_out_slots() {
        let pool = CompletionPool::new("none", 0);
        assert!(pool.acquire().is_none());
        assert_eq!(pool.available(), 0);
    }
}
