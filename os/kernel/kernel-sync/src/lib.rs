//! # Kernel synchronization primitives
//!
//! Busy-waiting locks for code that runs with interrupts masked and must never
//! sleep. The memory core uses them for:
//!
//! * one lock per physical memory node (free-lists and per-CPU caches),
//! * one lock per address space (VMA tree, sibling list, access list),
//! * the global exchange lock serializing cross-address-space transfers.
//!
//! A [`Mutex`] pairs a value with a lock word implementing [`RawLock`].
//! [`SpinLock`] uses a test-and-test-and-set word; [`TicketLock`] serves
//! waiters in arrival order and is used where CPUs compete for one lock for
//! long stretches.
//!
//! ```
//! use kernel_sync::TicketLock;
//!
//! let pages = TicketLock::new(0_u64);
//! *pages.lock() += 512;
//! assert_eq!(pages.with_lock(|p| *p), 512);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::cast_possible_truncation)]

mod mutex;
mod raw_spin;
mod raw_ticket;

pub use mutex::{Mutex, MutexGuard};
pub use raw_spin::RawSpin;
pub use raw_ticket::RawTicket;

pub type SpinLock<T> = Mutex<T, RawSpin>;
pub type SpinLockGuard<'a, T> = MutexGuard<'a, T, RawSpin>;
pub type TicketLock<T> = Mutex<T, RawTicket>;
pub type TicketLockGuard<'a, T> = MutexGuard<'a, T, RawTicket>;

/// A lock word without data.
///
/// # Safety
/// Implementations must provide mutual exclusion: after `lock` or a
/// successful `try_lock` returns, no other caller can acquire the word until
/// `unlock` is called. Acquiring must have `Acquire` and releasing `Release`
/// ordering.
pub unsafe trait RawLock {
    /// An unlocked word.
    const UNLOCKED: Self;

    fn lock(&self);

    fn try_lock(&self) -> bool;

    /// Snapshot of the word; only meaningful for diagnostics.
    fn is_locked(&self) -> bool;

    /// # Safety
    /// The caller must currently hold the lock.
    unsafe fn unlock(&self);
}
