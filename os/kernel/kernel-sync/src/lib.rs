//! # Kernel synchronization primitives
//!
//! The lock every shared kernel structure sits behind. A [`Mutex`] pairs a
//! value with a raw lock implementing [`RawLock`]; the default raw lock is
//! the [`RawSpin`] test-and-test-and-set spin lock.
//!
//! Locks are **non-reentrant**: a context that already holds a lock must not
//! try to take it again, it would spin forever. Critical sections must not
//! block or yield.
//!
//! ```
//! use kernel_sync::SpinMutex;
//!
//! static COUNTER: SpinMutex<u64> = SpinMutex::new("counter", 0);
//!
//! COUNTER.with_lock(|c| *c += 1);
//! assert_eq!(*COUNTER.lock(), 1);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod mutex;
mod raw_spin;

pub use mutex::{Mutex, MutexGuard};
pub use raw_spin::RawSpin;

/// A [`Mutex`] backed by the [`RawSpin`] lock.
pub type SpinMutex<T> = Mutex<T, RawSpin>;

/// The raw mutual-exclusion primitive underneath a [`Mutex`].
///
/// Implementations only provide exclusion; they carry no data.
pub trait RawLock {
    /// Spin until exclusive ownership is obtained.
    fn lock(&self);

    /// Attempt to take the lock once; returns `true` on success.
    fn try_lock(&self) -> bool;

    /// Relinquish ownership.
    ///
    /// # Safety
    /// The caller must currently hold the lock.
    unsafe fn unlock(&self);

    /// Whether somebody holds the lock right now. Racy; diagnostics only.
    fn is_locked(&self) -> bool;
}
