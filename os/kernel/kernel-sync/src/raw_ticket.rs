use crate::RawLock;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicU64, Ordering};

const NEXT_SHIFT: u32 = 32;
const NEXT_ONE: u64 = 1 << NEXT_SHIFT;
const SERVING_MASK: u64 = NEXT_ONE - 1;

/// FIFO ticket lock word.
///
/// One 64-bit word holds the next ticket to hand out (upper half) and the
/// ticket currently served (lower half), so `try_lock` is a single exchange.
pub struct RawTicket {
    word: AtomicU64,
}

impl RawTicket {
    #[must_use]
    pub const fn new() -> Self {
        Self::UNLOCKED
    }

    const fn next(word: u64) -> u32 {
        (word >> NEXT_SHIFT) as u32
    }

    const fn serving(word: u64) -> u32 {
        (word & SERVING_MASK) as u32
    }

    /// Tickets handed out but not yet released, the holder included.
    #[must_use]
    pub fn queued(&self) -> u32 {
        let word = self.word.load(Ordering::Relaxed);
        Self::next(word).wrapping_sub(Self::serving(word))
    }
}

impl Default for RawTicket {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: each ticket is handed out once and only its holder advances the
// served counter.
unsafe impl RawLock for RawTicket {
    #[allow(clippy::declare_interior_mutable_const)]
    const UNLOCKED: Self = Self {
        word: AtomicU64::new(0),
    };

    fn lock(&self) {
        let ticket = Self::next(self.word.fetch_add(NEXT_ONE, Ordering::Relaxed));
        while Self::serving(self.word.load(Ordering::Acquire)) != ticket {
            spin_loop();
        }
    }

    fn try_lock(&self) -> bool {
        let word = self.word.load(Ordering::Relaxed);
        Self::next(word) == Self::serving(word)
            && self
                .word
                .compare_exchange(word, word.wrapping_add(NEXT_ONE), Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.queued() != 0
    }

    unsafe fn unlock(&self) {
        // Only the holder writes the lower half; waiters only add to the upper.
        let _ = self.word.fetch_update(Ordering::Release, Ordering::Relaxed, |word| {
            let serving = u64::from(Self::serving(word).wrapping_add(1));
            Some((word & !SERVING_MASK) | serving)
        });
    }
}
