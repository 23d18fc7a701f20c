//! A single-slot holder whose content can be exchanged atomically with
//! the content of another holder.

use std::fmt;
use std::mem;

use crate::sync::{lazy_static, AtomicUsize, Mutex, MutexGuard, Ordering};

lazy_static! {
    /// Source of cell ranks. Every cell ever created gets a distinct one.
    static ref NEXT_RANK: AtomicUsize = AtomicUsize::new(0);
}

/// A reference cell supporting an atomic pairwise [`swap`](ExchangeCell::swap).
///
/// This is a deadlock-free simulation of an atomic double-exchange
/// instruction: each cell is guarded by its own lock and `swap` takes the
/// two locks in increasing rank order. Nobody can observe a state where
/// only one side of an exchange has happened.
///
/// The cell itself is not lock-free. The constructions built on top of it
/// treat `swap` as an indivisible primitive and are wait-free relative to it.
pub struct ExchangeCell<T> {
    rank: usize,
    value: Mutex<T>,
}

impl<T> ExchangeCell<T> {
    pub fn new(value: T) -> Self {
        ExchangeCell {
            rank: NEXT_RANK.fetch_add(1, Ordering::Relaxed),
            value: Mutex::new(value),
        }
    }

    /// Returns a copy of the current content.
    pub fn read(&self) -> T
    where
        T: Clone,
    {
        self.value.lock().clone()
    }

    /// Overwrites the content. The previous content is dropped after the
    /// lock is released.
    pub fn write(&self, value: T) {
        drop(self.replace(value));
    }

    /// Overwrites the content and hands back what was there.
    pub fn replace(&self, value: T) -> T {
        mem::replace(&mut *self.value.lock(), value)
    }

    /// Borrows the content without locking.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    /// Atomically exchanges the contents of `self` and `other`.
    ///
    /// Swapping a cell with itself does nothing.
    pub fn swap(&self, other: &ExchangeCell<T>) {
        if self.rank == other.rank {
            return;
        }
        let (mut low, mut high) = self.lock_pair(other);
        mem::swap(&mut *low, &mut *high);
    }

    // Locks both cells, lower rank first. Ranks are unique so two
    // concurrent swaps over the same cells always agree on the order.
    fn lock_pair<'a>(&'a self, other: &'a ExchangeCell<T>) -> (MutexGuard<'a, T>, MutexGuard<'a, T>) {
        debug_assert_ne!(self.rank, other.rank);
        if self.rank < other.rank {
            let low = self.value.lock();
            (low, other.value.lock())
        } else {
            let low = other.value.lock();
            (low, self.value.lock())
        }
    }
}

impl<T: Default> Default for ExchangeCell<T> {
    fn default() -> Self {
        ExchangeCell::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for ExchangeCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeCell")
            .field("rank", &self.rank)
            .field("value", &*self.value.lock())
            .finish()
    }
}
