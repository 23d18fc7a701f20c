#[cfg(loom)]
pub(crate) use  {
    loom::sync::atomic::{AtomicPtr, AtomicUsize},
    loom::sync::atomic::Ordering,
    loom::lazy_static,
};

#[cfg(not(loom))]
pub(crate) use  {
    std::sync::atomic::{AtomicPtr, AtomicUsize},
    std::sync::atomic::Ordering,
    lazy_static::lazy_static,
};

#[cfg(not(loom))]
pub(crate) use parking_lot::{Mutex, MutexGuard};

/*
loom's mutex poisons like std's does. No lock in this crate is ever held
across user code, so a poisoned lock is unreachable and the guard is
recovered instead of propagating.
*/
#[cfg(loom)]
pub(crate) struct Mutex<T>(loom::sync::Mutex<T>);

#[cfg(loom)]
pub(crate) type MutexGuard<'a, T> = loom::sync::MutexGuard<'a, T>;

#[cfg(loom)]
impl<T> Mutex<T> {
    pub(crate) fn new(value: T) -> Self {
        Mutex(loom::sync::Mutex::new(value))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // loom has no `get_mut`, go through the lock once instead.
    pub(crate) fn get_mut(&mut self) -> &mut T {
        let data: *mut T = &mut *self.lock();
        // `&mut self` keeps every other guard out while the borrow lives
        unsafe { &mut *data }
    }

    pub(crate) fn into_inner(self) -> T {
        self.0.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
