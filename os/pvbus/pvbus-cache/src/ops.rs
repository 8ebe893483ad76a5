use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;

/// The owner's half of a cache: how objects are built and torn down, and
/// which elevated lock serializes the cache's shared lists.
///
/// `&self` is the opaque argument threaded through every callback. The lock
/// is usually the owner's own lock, so that the owner can call
/// [`Cache::get_locked`](crate::Cache::get_locked) while already holding it.
///
/// None of the callbacks may block.
pub trait CacheOps: Sync {
    type Object: Send;
    type Error: fmt::Debug;

    /// Build a fresh object. Called on a cache miss, outside the lock unless
    /// the caller of `get_locked` holds it.
    ///
    /// # Errors
    /// Any error makes the triggering `get` fail with
    /// [`Exhaustion::Construction`](crate::Exhaustion::Construction).
    fn construct(&self) -> Result<Self::Object, Self::Error>;

    /// Tear down an object the cache no longer wants. Never called with the
    /// lock held.
    fn destruct(&self, object: Self::Object) {
        drop(object);
    }

    fn acquire_lock(&self);

    fn release_lock(&self);
}

/// Supplier of the raw blocks objects live in.
///
/// # Safety
/// `allocate` must return a block valid for `layout` (or `None`), and `free`
/// must accept exactly the blocks `allocate` returned. Neither may block.
pub unsafe trait BackingAllocator: Sync {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// # Safety
    /// `block` must come from `allocate` on this allocator with the same
    /// `layout`, and must not be used afterwards.
    unsafe fn free(&self, block: NonNull<u8>, layout: Layout);
}

/// Blocks from the global allocator; allocation failure is reported, not
/// aborted on.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalBacking;

unsafe impl BackingAllocator for GlobalBacking {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert_ne!(layout.size(), 0);
        NonNull::new(unsafe { alloc::alloc::alloc(layout) })
    }

    unsafe fn free(&self, block: NonNull<u8>, layout: Layout) {
        unsafe { alloc::alloc::dealloc(block.as_ptr(), layout) }
    }
}

/// Holds the owner's elevated lock for the guard's lifetime.
pub(crate) struct ElevatedGuard<'a, O: CacheOps> {
    ops: &'a O,
}

impl<'a, O: CacheOps> ElevatedGuard<'a, O> {
    pub(crate) fn acquire(ops: &'a O) -> Self {
        ops.acquire_lock();
        Self { ops }
    }
}

impl<O: CacheOps> Drop for ElevatedGuard<'_, O> {
    fn drop(&mut self) {
        self.ops.release_lock();
    }
}
