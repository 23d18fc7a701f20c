use std::fmt;
use std::marker::PhantomData;
use std::ptr;

use crate::sync::{AtomicPtr, Ordering};

// An owned, possibly empty Box<T> behind an atomic pointer. Both slot
// flavours below are thin policies over it.
struct RawSlot<T> {
    ptr: AtomicPtr<T>,
    marker: PhantomData<Box<T>>,
}

impl<T> RawSlot<T> {
    fn new(value: Option<T>) -> Self {
        let ptr = match value {
            Some(value) => Box::into_raw(Box::new(value)),
            None => ptr::null_mut(),
        };
        RawSlot {
            ptr: AtomicPtr::new(ptr),
            marker: PhantomData,
        }
    }

    fn publish(&self, value: T) -> Result<(), T> {
        let new = Box::into_raw(Box::new(value));
        match self
            .ptr
            .compare_exchange(ptr::null_mut(), new, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(_) => {
                // lost the race, `new` was never shared
                let rejected = unsafe { Box::from_raw(new) };
                Err(*rejected)
            }
        }
    }

    fn load(&self) -> *mut T {
        self.ptr.load(Ordering::Acquire)
    }

    fn swap_out(&self) -> Option<T> {
        let current = self.ptr.swap(ptr::null_mut(), Ordering::AcqRel);
        if current.is_null() {
            None
        } else {
            // the swap made us the only owner of `current`
            Some(*unsafe { Box::from_raw(current) })
        }
    }
}

impl<T> Drop for RawSlot<T> {
    fn drop(&mut self) {
        drop(self.swap_out());
    }
}

/// A slot that is published at most once.
///
/// Any number of threads may race to [`set`](OnceSlot::set) it; a single
/// compare-and-set from empty decides the winner and every loser gets its
/// value back. Once published, the value stays in place until the slot is
/// torn down, so [`get`](OnceSlot::get) can hand out plain borrows.
pub struct OnceSlot<T> {
    raw: RawSlot<T>,
}

/*
Sharing the slot hands out &T to several threads, hence Sync needs T: Sync.
*/
unsafe impl<T: Send> Send for OnceSlot<T> {}
unsafe impl<T: Send + Sync> Sync for OnceSlot<T> {}

impl<T> OnceSlot<T> {
    pub fn new() -> Self {
        OnceSlot { raw: RawSlot::new(None) }
    }

    pub fn with(value: T) -> Self {
        OnceSlot { raw: RawSlot::new(Some(value)) }
    }

    /// Publishes `value` unless the slot already holds one.
    pub fn set(&self, value: T) -> Result<(), T> {
        self.raw.publish(value)
    }

    pub fn get(&self) -> Option<&T> {
        // a published value is only freed through `&mut self`
        unsafe { self.raw.load().as_ref() }
    }

    pub fn is_set(&self) -> bool {
        !self.raw.load().is_null()
    }

    /// Empties the slot, returning the value it held.
    pub fn take(&mut self) -> Option<T> {
        self.raw.swap_out()
    }
}

impl<T> Default for OnceSlot<T> {
    fn default() -> Self {
        OnceSlot::new()
    }
}

/// A slot that hands a value from whoever publishes it to whoever takes it.
///
/// There is no way to borrow the content, it can only be moved in with
/// [`set`](HandoffSlot::set) and out with [`take`](HandoffSlot::take). The
/// value never is shared, so `T: Send` is enough to share the slot.
pub struct HandoffSlot<T> {
    raw: RawSlot<T>,
}

unsafe impl<T: Send> Send for HandoffSlot<T> {}
unsafe impl<T: Send> Sync for HandoffSlot<T> {}

impl<T> HandoffSlot<T> {
    pub fn new() -> Self {
        HandoffSlot { raw: RawSlot::new(None) }
    }

    pub fn with(value: T) -> Self {
        HandoffSlot { raw: RawSlot::new(Some(value)) }
    }

    /// Stores `value` unless the slot is occupied.
    pub fn set(&self, value: T) -> Result<(), T> {
        self.raw.publish(value)
    }

    /// Moves the value out, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        self.raw.swap_out()
    }
}

impl<T> Default for HandoffSlot<T> {
    fn default() -> Self {
        HandoffSlot::new()
    }
}

impl<T> fmt::Debug for HandoffSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.raw.load().is_null() { "<empty>" } else { "<occupied>" };
        f.debug_tuple("HandoffSlot").field(&format_args!("{}", state)).finish()
    }
}

impl<T: fmt::Debug> fmt::Debug for OnceSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("OnceSlot").field(value).finish(),
            None => f.write_str("OnceSlot(<unset>)"),
        }
    }
}
