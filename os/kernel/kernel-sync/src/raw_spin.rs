use crate::RawLock;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

/// Test-and-test-and-set lock word.
///
/// Waiters spin on a plain load and only retry the exchange once the word
/// reads unlocked, keeping the cache line shared while the lock is held.
pub struct RawSpin {
    held: AtomicBool,
}

impl RawSpin {
    #[must_use]
    pub const fn new() -> Self {
        Self::UNLOCKED
    }
}

impl Default for RawSpin {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: the exchange from `false` to `true` succeeds for one caller only.
unsafe impl RawLock for RawSpin {
    #[allow(clippy::declare_interior_mutable_const)]
    const UNLOCKED: Self = Self {
        held: AtomicBool::new(false),
    };

    fn lock(&self) {
        while self
            .held
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.is_locked() {
                spin_loop();
            }
        }
    }

    fn try_lock(&self) -> bool {
        !self.is_locked()
            && self
                .held
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }

    unsafe fn unlock(&self) {
        self.held.store(false, Ordering::Release);
    }
}
