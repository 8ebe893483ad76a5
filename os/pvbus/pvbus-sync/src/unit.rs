/// The set of execution units (processors, or worker threads in a hosted
/// build) a per-unit cache is sharded over.
///
/// [`pin`](Self::pin) identifies the calling unit and keeps the caller on it
/// until the returned [`Pinned`] is dropped, the same way raising the
/// interrupt level keeps a kernel thread on its processor. Callers must treat
/// an index at or beyond [`count`](Self::count) as "no shard for this unit"
/// and fall back to their shared path.
pub trait ExecutionUnits: Sync {
    /// Whatever keeps the caller on its unit (an interrupt guard, or nothing).
    type Pin;

    /// Number of shards the caller should allocate.
    fn count(&self) -> usize;

    /// Identify and pin the calling unit.
    fn pin(&self) -> Pinned<Self::Pin>;
}

/// The calling unit's index, valid while the pin is held.
#[must_use = "dropping the pin releases the execution unit"]
pub struct Pinned<P> {
    index: usize,
    _pin: P,
}

impl<P> Pinned<P> {
    pub const fn new(index: usize, pin: P) -> Self {
        Self { index, _pin: pin }
    }

    #[inline]
    pub const fn index(&self) -> usize {
        self.index
    }
}

#[cfg(feature = "std")]
pub use hosted::ThreadUnits;

#[cfg(feature = "std")]
mod hosted {
    use super::{ExecutionUnits, Pinned};
    use core::num::NonZeroUsize;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_SEQUENCE: AtomicUsize = AtomicUsize::new(0);

    std::thread_local! {
        static SEQUENCE: usize = NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    }

    /// Hosted execution units: every OS thread is mapped onto one of `count`
    /// shards by its creation order.
    ///
    /// Threads cannot be pinned in user space, so several threads may share a
    /// shard; consumers guard shards with try-only locks and treat contention
    /// as a miss.
    #[derive(Debug, Clone, Copy)]
    pub struct ThreadUnits {
        count: NonZeroUsize,
    }

    impl ThreadUnits {
        #[must_use]
        pub const fn new(count: NonZeroUsize) -> Self {
            Self { count }
        }

        /// One shard per hardware thread the host reports.
        #[must_use]
        pub fn available() -> Self {
            Self::new(std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN))
        }
    }

    impl ExecutionUnits for ThreadUnits {
        type Pin = ();

        fn count(&self) -> usize {
            self.count.get()
        }

        fn pin(&self) -> Pinned<()> {
            let index = SEQUENCE.with(|sequence| *sequence % self.count.get());
            Pinned::new(index, ())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn index_is_stable_within_a_thread() {
            let units = ThreadUnits::new(NonZeroUsize::new(4).unwrap());
            let first = units.pin().index();
            let second = units.pin().index();
            assert_eq!(first, second);
            assert!(first < units.count());
        }

        #[test]
        fn threads_spread_across_shards() {
            let units = ThreadUnits::new(NonZeroUsize::new(64).unwrap());
            let indices: Vec<usize> = (0..8)
                .map(|_| std::thread::spawn(move || units.pin().index()))
                .map(|h| h.join().unwrap())
                .collect();

            assert!(indices.iter().all(|&i| i < 64));
            let mut unique = indices.clone();
            unique.sort_unstable();
            unique.dedup();
            assert_eq!(unique.len(), indices.len(), "fresh threads got fresh shards");
        }
    }
}
