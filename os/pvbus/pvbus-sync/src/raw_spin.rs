use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

/// A data-less spin lock.
///
/// This is the lock callers typically embed next to the structures an object
/// cache feeds (id allocators, ring bookkeeping) and expose to the cache via
/// its lock callbacks, so that one acquisition covers both.
#[derive(Default)]
pub struct RawSpin {
    /// `true` while an owner is inside the critical section.
    owned: AtomicBool,
}

impl RawSpin {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            owned: AtomicBool::new(false),
        }
    }

    /// Spin until the caller owns the lock.
    ///
    /// Waiters only read the flag while it is set, so a contended lock does
    /// not bounce its cache line between processors.
    #[inline]
    pub fn lock(&self) {
        while !self.try_lock() {
            while self.is_locked() {
                spin_loop();
            }
        }
    }

    /// Take the lock if nobody owns it; never spins.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.owned
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Whether some caller currently holds the lock.
    ///
    /// Only meaningful as a debugging aid; the answer may be stale by the
    /// time it is returned.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.owned.load(Ordering::Relaxed)
    }

    /// # Safety
    /// The caller must hold the lock.
    #[inline]
    pub unsafe fn unlock(&self) {
        let was_owned = self.owned.swap(false, Ordering::Release);
        debug_assert!(was_owned, "unlocking a RawSpin that is not held");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_lock_fails_while_held() {
        let lock = RawSpin::new();
        assert!(lock.try_lock());
        assert!(lock.is_locked());
        assert!(!lock.try_lock());
        unsafe { lock.unlock() };
        assert!(!lock.is_locked());
        assert!(lock.try_lock());
        unsafe { lock.unlock() };
    }

    #[test]
    fn lock_after_try_lock_release() {
        let lock = RawSpin::default();
        lock.lock();
        assert!(!lock.try_lock());
        unsafe { lock.unlock() };
        assert!(!lock.is_locked());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "not held")]
    fn unlocking_a_free_lock_is_caught() {
        let lock = RawSpin::new();
        unsafe { lock.unlock() };
    }
}
