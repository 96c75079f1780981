use crate::{RawLock, RawSpin};
use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};

/// A named lock around a value of type `T`.
///
/// The name only shows up in diagnostics (`Debug`, panics of the owner).
pub struct Mutex<T, R = RawSpin> {
    name: &'static str,
    raw: R,
    cell: UnsafeCell<T>,
}

// Safety: mutual exclusion; only T: Send may cross threads.
unsafe impl<T: Send, R: Sync> Sync for Mutex<T, R> {}
unsafe impl<T: Send, R: Send> Send for Mutex<T, R> {}

impl<T> Mutex<T, RawSpin> {
    #[must_use]
    pub const fn new(name: &'static str, value: T) -> Self {
        Self::from_raw(name, RawSpin::new(), value)
    }
}

impl<T, R> Mutex<T, R> {
    #[must_use]
    pub const fn from_raw(name: &'static str, raw: R, value: T) -> Self {
        Self {
            name,
            raw,
            cell: UnsafeCell::new(value),
        }
    }

    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Mutable access when you have `&mut self` (no contention possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.cell.get_mut()
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.cell.into_inner()
    }
}

impl<T, R: RawLock> Mutex<T, R> {
    /// Spin until acquired, then return a guard.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T, R> {
        self.raw.lock();
        MutexGuard { m: self }
    }

    /// Try once; returns immediately.
    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, R>> {
        self.raw.try_lock().then(|| MutexGuard { m: self })
    }

    /// Closure convenience, built on the guard.
    #[inline]
    pub fn with_lock<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let mut g = self.lock();
        f(&mut g)
    }

    /// Racy snapshot; diagnostics only.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}

impl<T, R: RawLock> fmt::Debug for Mutex<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// RAII guard; the lock is released on drop, including during unwinding.
pub struct MutexGuard<'a, T, R: RawLock> {
    m: &'a Mutex<T, R>,
}

impl<T, R: RawLock> Deref for MutexGuard<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.m.cell.get() }
    }
}

impl<T, R: RawLock> DerefMut for MutexGuard<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.m.cell.get() }
    }
}

impl<T, R: RawLock> Drop for MutexGuard<'_, T, R> {
    fn drop(&mut self) {
        // Safety: a guard only exists while the lock is held.
        unsafe { self.m.raw.unlock() }
    }
}
