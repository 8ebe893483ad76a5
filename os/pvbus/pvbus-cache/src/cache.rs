//! The object cache proper.
//!
//! ```text
//!           get / put (pinned to a unit, no lock)
//!                  │
//!   ┌──────────────▼───────────────┐
//!   │ Magazine[unit] (6 slots)     │ ── miss / overflow ──┐
//!   └──────────────────────────────┘                      │
//!                                                          ▼
//!   PutList  (lock-free push from anywhere) ──swizzle──▶ GetList (elevated lock)
//!                                                          │
//!                      Population < 0 on get ─▶ construct a fresh object
//! ```

use crate::config::CacheConfig;
use crate::error::{CacheError, Exhaustion};
use crate::fist::{FaultConfig, FaultInjector};
use crate::magazine::Magazine;
use crate::object::{CacheObject, Node, NodeList, NodeRef, PutList};
use crate::ops::{BackingAllocator, CacheOps, ElevatedGuard, GlobalBacking};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::alloc::Layout;
use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use log::{debug, error, trace};
use pvbus_sync::ExecutionUnits;

/// Trimming may run.
const TRIM_ARMED: u8 = 1 << 0;
/// A trim pass is in flight.
const TRIM_RUNNING: u8 = 1 << 1;

/// Counters of one cache.
///
/// Each field is read independently with a relaxed load; the four values do
/// not form a consistent snapshot. `population` in particular can briefly
/// read one lower than the truth (even `-1`) while a `get` is deciding
/// whether the shared lists have anything for it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatistics {
    /// Objects constructed and not yet destroyed.
    pub allocated: i32,
    /// High-water mark of `allocated`.
    pub maximum_allocated: i32,
    /// Objects sitting on the shared lists, ready for reuse.
    pub population: i32,
    /// Low-water mark of `population` since the last trim.
    pub minimum_population: i32,
}

/// A per-execution-unit caching allocator of constructed objects.
///
/// * Every live object is owned by exactly one of: a magazine slot, the
///   `GetList`, the `PutList`, or a caller.
/// * Objects are constructed lazily on a miss, kept while they are in
///   demand, and destroyed only by [`trim`](Self::trim) or teardown.
/// * [`get`](Self::get) and [`put`](Self::put) never block and never allocate
///   unless a brand-new object has to be constructed.
pub struct Cache<O, U, B = GlobalBacking>
where
    O: CacheOps,
    U: ExecutionUnits,
    B: BackingAllocator,
{
    name: String,
    reservation: i32,
    ops: O,
    units: U,
    backing: B,
    magazines: Box<[Magazine<O::Object>]>,
    get_list: UnsafeCell<NodeList<O::Object>>,
    put_list: PutList<O::Object>,
    allocated: AtomicI32,
    maximum_allocated: AtomicI32,
    population: AtomicI32,
    minimum_population: AtomicI32,
    fault: Option<FaultInjector>,
    trim_state: AtomicU8,
}

// Safety: the GetList is only accessed with the elevated lock held, the
// PutList is atomic, and magazines are try-locked.
unsafe impl<O, U, B> Send for Cache<O, U, B>
where
    O: CacheOps + Send,
    U: ExecutionUnits + Send,
    B: BackingAllocator + Send,
{
}

unsafe impl<O, U, B> Sync for Cache<O, U, B>
where
    O: CacheOps,
    U: ExecutionUnits,
    B: BackingAllocator,
{
}

impl<O, U> Cache<O, U, GlobalBacking>
where
    O: CacheOps,
    U: ExecutionUnits,
{
    /// Create a cache whose objects live in the global allocator.
    ///
    /// # Errors
    /// See [`with_backing`](Self::with_backing).
    pub fn new(
        config: CacheConfig,
        ops: O,
        units: U,
        faults: &impl FaultConfig,
    ) -> Result<Self, CacheError> {
        Self::with_backing(config, ops, units, GlobalBacking, faults)
    }
}

impl<O, U, B> Cache<O, U, B>
where
    O: CacheOps,
    U: ExecutionUnits,
    B: BackingAllocator,
{
    /// Create a cache, read its fault injection settings from `faults`, and
    /// construct `config.reservation` objects up front.
    ///
    /// Trimming is armed on return; the owner is expected to call
    /// [`trim`](Self::trim) every [`CacheConfig::TRIM_PERIOD`].
    ///
    /// # Errors
    /// * [`CacheError::InvalidName`] for an empty or over-long name.
    /// * [`CacheError::OutOfMemory`] if the magazine array cannot be
    ///   allocated or the reservation cannot be counted.
    /// * [`CacheError::Exhausted`] if building the reservation fails; every
    ///   object built so far is destroyed again.
    pub fn with_backing(
        config: CacheConfig,
        ops: O,
        units: U,
        backing: B,
        faults: &impl FaultConfig,
    ) -> Result<Self, CacheError> {
        if !config.is_valid_name() {
            error!("rejecting cache name {:?}", config.name);
            return Err(CacheError::InvalidName);
        }

        let reservation =
            i32::try_from(config.reservation).map_err(|_| CacheError::OutOfMemory)?;

        let count = units.count();
        let mut magazines = Vec::new();
        if magazines.try_reserve_exact(count).is_err() {
            error!("{}: cannot allocate {count} magazines", config.name);
            return Err(CacheError::OutOfMemory);
        }
        magazines.extend((0..count).map(|_| Magazine::new()));

        let fault = FaultInjector::from_config(&config.name, faults, config.fault_seed);

        let mut cache = Self {
            name: config.name,
            reservation,
            ops,
            units,
            backing,
            magazines: magazines.into_boxed_slice(),
            get_list: UnsafeCell::new(NodeList::new()),
            put_list: PutList::new(),
            allocated: AtomicI32::new(0),
            maximum_allocated: AtomicI32::new(0),
            population: AtomicI32::new(0),
            minimum_population: AtomicI32::new(0),
            fault,
            trim_state: AtomicU8::new(TRIM_ARMED),
        };

        for _ in 0..reservation {
            // On failure, dropping `cache` destroys what was reserved so far.
            let node = cache.create_object()?;
            cache.allocated.fetch_add(1, Ordering::SeqCst);
            cache.get_list.get_mut().push_back(node);
            cache.population.fetch_add(1, Ordering::SeqCst);
        }
        let allocated = cache.allocated.load(Ordering::SeqCst);
        cache.maximum_allocated.store(allocated, Ordering::Relaxed);
        cache.minimum_population.store(allocated, Ordering::Relaxed);

        debug!(
            "{}: created (object {} bytes, {count} magazines, reservation {reservation})",
            cache.name,
            size_of::<O::Object>(),
        );

        Ok(cache)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn ops(&self) -> &O {
        &self.ops
    }

    /// Take an object, acquiring the elevated lock only if the shared lists
    /// have to be consulted.
    ///
    /// # Errors
    /// An [`Exhaustion`] when a fresh object was needed and could not be
    /// allocated or constructed, or when fault injection fired.
    ///
    /// # Panics
    /// If the shared lists turn out to be empty although the population
    /// counter promised an object (list corruption).
    pub fn get(&self) -> Result<CacheObject<O::Object>, Exhaustion> {
        self.get_inner(false)
    }

    /// [`get`](Self::get) for callers that already hold the elevated lock.
    ///
    /// # Safety
    /// The caller must hold the lock that [`CacheOps::acquire_lock`] takes.
    ///
    /// # Errors
    /// As for [`get`](Self::get).
    pub unsafe fn get_locked(&self) -> Result<CacheObject<O::Object>, Exhaustion> {
        self.get_inner(true)
    }

    /// Return an object. Never fails: it lands in the calling unit's
    /// magazine, or on the lock-free `PutList` if the magazine is full.
    ///
    /// # Panics
    /// If the object's header is corrupt.
    pub fn put(&self, object: CacheObject<O::Object>) {
        self.put_inner(object, false);
    }

    /// [`put`](Self::put) for callers that already hold the elevated lock;
    /// on magazine overflow the object goes straight onto the `GetList`.
    ///
    /// # Safety
    /// The caller must hold the lock that [`CacheOps::acquire_lock`] takes.
    pub unsafe fn put_locked(&self, object: CacheObject<O::Object>) {
        self.put_inner(object, true);
    }

    /// Best-effort counters; see [`CacheStatistics`].
    #[must_use]
    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            allocated: self.allocated.load(Ordering::Relaxed),
            maximum_allocated: self.maximum_allocated.load(Ordering::Relaxed),
            population: self.population.load(Ordering::Relaxed),
            minimum_population: self.minimum_population.load(Ordering::Relaxed),
        }
    }

    /// One periodic trim tick; returns how many objects were destroyed.
    ///
    /// Under the elevated lock: flush every idle magazine onto the `GetList`,
    /// claim `max(minimum_population - reservation, 0)` objects, and reset
    /// the low-water mark to the resulting population. The claimed objects
    /// are destroyed after the lock is dropped.
    ///
    /// Returns 0 without doing anything if another trim is in flight or
    /// trimming has been cancelled.
    ///
    /// # Panics
    /// On list corruption or an `allocated` underflow.
    pub fn trim(&self) -> usize {
        if self
            .trim_state
            .compare_exchange(
                TRIM_ARMED,
                TRIM_ARMED | TRIM_RUNNING,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_err()
        {
            return 0;
        }
        let _running = TrimRunning(&self.trim_state);

        let mut doomed = NodeList::new();
        {
            let _lock = ElevatedGuard::acquire(&self.ops);
            self.flush_magazines();
            self.trim_shared(self.reservation, &mut doomed);
        }

        let destroyed = self.destroy_all(&mut doomed);
        trace!("{}: trimmed {destroyed} objects", self.name);
        destroyed
    }

    /// Stop trimming and wait for an in-flight trim to leave.
    ///
    /// The wait is bounded by one trim pass, which itself never blocks.
    pub fn cancel_trim(&self) {
        self.trim_state.fetch_and(!TRIM_ARMED, Ordering::AcqRel);
        while self.trim_state.load(Ordering::Acquire) & TRIM_RUNNING != 0 {
            spin_loop();
        }
    }

    /// Cancel trimming, flush every magazine and destroy every cached
    /// object. Equivalent to dropping the cache.
    ///
    /// # Panics
    /// If objects are still outstanding with callers (a leak), or the
    /// counters are otherwise inconsistent.
    pub fn teardown(self) {
        drop(self);
    }

    fn get_inner(&self, locked: bool) -> Result<CacheObject<O::Object>, Exhaustion> {
        if self.fault.as_ref().is_some_and(FaultInjector::should_fail) {
            return Err(Exhaustion::Injected);
        }

        let pin = self.units.pin();
        let node = match self
            .magazines
            .get(pin.index())
            .and_then(Magazine::try_get)
        {
            Some(node) => node,
            None => self.get_shared(locked)?,
        };
        drop(pin);

        Ok(CacheObject::new(node))
    }

    fn put_inner(&self, object: CacheObject<O::Object>, locked: bool) {
        let node = object.into_node();

        let pin = self.units.pin();
        let Some(magazine) = self.magazines.get(pin.index()) else {
            self.put_shared(node, locked);
            return;
        };
        if let Err(node) = magazine.try_put(node) {
            self.put_shared(node, locked);
        }
        drop(pin);
    }

    fn get_shared(&self, locked: bool) -> Result<NodeRef<O::Object>, Exhaustion> {
        let population = self.population.fetch_sub(1, Ordering::SeqCst) - 1;

        if population >= 0 {
            let node = self.with_get_list(locked, |list| {
                self.minimum_population
                    .fetch_min(population, Ordering::Relaxed);
                if list.is_empty() {
                    list.fill(self.put_list.detach());
                }
                list.pop_front()
            });

            let Some(node) = node else {
                panic!(
                    "{}: population {population} promised an object but the shared lists are empty",
                    self.name
                );
            };
            return Ok(node);
        }

        // Nothing to reuse: undo the claim and build a new object instead.
        self.population.fetch_add(1, Ordering::SeqCst);

        let node = self.create_object()?;
        let allocated = self.allocated.fetch_add(1, Ordering::SeqCst) + 1;

        if allocated > self.maximum_allocated.load(Ordering::Relaxed) {
            self.with_get_list(locked, |_| {
                self.maximum_allocated
                    .fetch_max(allocated, Ordering::Relaxed);
            });
        }

        Ok(node)
    }

    fn put_shared(&self, node: NodeRef<O::Object>, locked: bool) {
        if locked {
            // SAFETY: the caller holds the elevated lock.
            unsafe { (*self.get_list.get()).push_back(node) };
        } else {
            self.put_list.push(node);
        }

        self.population.fetch_add(1, Ordering::SeqCst);
    }

    /// Run `f` on the `GetList`, taking the elevated lock unless `locked`
    /// says the caller already holds it.
    fn with_get_list<R>(&self, locked: bool, f: impl FnOnce(&mut NodeList<O::Object>) -> R) -> R {
        let _lock = (!locked).then(|| ElevatedGuard::acquire(&self.ops));
        // SAFETY: the lock is held, by us or by the caller.
        let list = unsafe { &mut *self.get_list.get() };
        f(list)
    }

    /// Must be called with the elevated lock held. Returns the number of
    /// magazines that were busy and had to be skipped.
    fn flush_magazines(&self) -> usize {
        self.magazines
            .iter()
            .filter(|magazine| !magazine.try_flush(|node| self.put_shared(node, true)))
            .count()
    }

    /// Must be called with the elevated lock held.
    fn trim_shared(&self, reservation: i32, doomed: &mut NodeList<O::Object>) -> usize {
        let mut population = self.population.load(Ordering::SeqCst);
        let mut excess = (self.minimum_population.load(Ordering::Relaxed) - reservation).max(0);
        let mut claimed = 0;

        // SAFETY: the lock is held.
        let list = unsafe { &mut *self.get_list.get() };

        while excess != 0 {
            population = self.population.fetch_sub(1, Ordering::SeqCst) - 1;
            if population < 0 {
                population = self.population.fetch_add(1, Ordering::SeqCst) + 1;
                break;
            }

            if list.is_empty() {
                list.fill(self.put_list.detach());
            }
            let Some(node) = list.pop_front() else {
                panic!(
                    "{}: population {population} promised an object to trim but the shared lists are empty",
                    self.name
                );
            };
            doomed.push_back(node);

            let allocated = self.allocated.fetch_sub(1, Ordering::SeqCst) - 1;
            assert!(allocated >= 0, "{}: allocated count underflow", self.name);

            excess -= 1;
            claimed += 1;
        }

        self.minimum_population.store(population, Ordering::Relaxed);
        claimed
    }

    fn create_object(&self) -> Result<NodeRef<O::Object>, Exhaustion> {
        let layout = Layout::new::<Node<O::Object>>();

        let Some(block) = self.backing.allocate(layout) else {
            error!("{}: failed to allocate {} bytes", self.name, layout.size());
            return Err(Exhaustion::Allocation);
        };

        match self.ops.construct() {
            Ok(object) => {
                let node = block.cast::<Node<O::Object>>();
                unsafe {
                    node.as_ptr().write(Node::new(object));
                    Ok(NodeRef::from_raw(node))
                }
            }
            Err(err) => {
                error!("{}: failed to construct object: {err:?}", self.name);
                unsafe { self.backing.free(block, layout) };
                Err(Exhaustion::Construction)
            }
        }
    }

    fn destroy_object(&self, node: NodeRef<O::Object>) {
        let layout = Layout::new::<Node<O::Object>>();
        let block = node.as_non_null().cast::<u8>();

        // SAFETY: the node was unlinked from every list and its block is
        // released right below.
        let object = unsafe { node.take_object() };
        unsafe { self.backing.free(block, layout) };

        self.ops.destruct(object);
    }

    fn destroy_all(&self, list: &mut NodeList<O::Object>) -> usize {
        let mut destroyed = 0;
        while let Some(node) = list.pop_front() {
            self.destroy_object(node);
            destroyed += 1;
        }
        destroyed
    }
}

impl<O, U, B> Drop for Cache<O, U, B>
where
    O: CacheOps,
    U: ExecutionUnits,
    B: BackingAllocator,
{
    fn drop(&mut self) {
        self.cancel_trim();

        let mut doomed = NodeList::new();
        {
            let _lock = ElevatedGuard::acquire(&self.ops);
            let busy = self.flush_magazines();
            debug_assert_eq!(busy, 0, "a magazine was busy during teardown");

            self.minimum_population
                .store(self.population.load(Ordering::SeqCst), Ordering::Relaxed);
            self.trim_shared(0, &mut doomed);
        }
        self.destroy_all(&mut doomed);

        let stats = self.statistics();
        debug!(
            "{}: torn down (maximum allocated {})",
            self.name, stats.maximum_allocated
        );

        #[cfg(feature = "std")]
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            stats.population, 0,
            "{}: population {} left after teardown",
            self.name, stats.population
        );
        assert_eq!(
            stats.allocated, 0,
            "{}: {} objects were never returned",
            self.name, stats.allocated
        );
    }
}

/// Clears the running bit even if a destructor panics.
struct TrimRunning<'a>(&'a AtomicU8);

impl Drop for TrimRunning<'_> {
    fn drop(&mut self) {
        self.0.fetch_and(!TRIM_RUNNING, Ordering::Release);
    }
}
