//! Object storage: the header every cached object carries, the owning handle
//! callers hold, and the two shared free lists.
//!
//! ```text
//! +---------------------------+--------------------+
//! | magic | next (list link)  |  object: T         |
//! +---------------------------+--------------------+
//! ^ block from the BackingAllocator
//! ```
//!
//! `next` is only meaningful while the object sits on the `GetList` or the
//! `PutList`; it is null whenever the object is in a magazine or with a caller.

use core::fmt;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, Ordering};

pub(crate) const OBJECT_HEADER_MAGIC: u32 = 0x0212_1996;

#[repr(C)]
pub(crate) struct Node<T> {
    magic: u32,
    next: *mut Node<T>,
    object: T,
}

impl<T> Node<T> {
    pub(crate) const fn new(object: T) -> Self {
        Self {
            magic: OBJECT_HEADER_MAGIC,
            next: ptr::null_mut(),
            object,
        }
    }
}

/// A pointer to a constructed node that is owned by exactly one of: a
/// magazine slot, the `GetList`, the `PutList`, or a caller.
pub(crate) struct NodeRef<T>(NonNull<Node<T>>);

// Safety: a NodeRef is a unique owner of its node.
unsafe impl<T: Send> Send for NodeRef<T> {}

impl<T> NodeRef<T> {
    /// # Safety
    /// `node` must point to an initialized `Node<T>` nobody else owns.
    pub(crate) const unsafe fn from_raw(node: NonNull<Node<T>>) -> Self {
        Self(node)
    }

    pub(crate) const fn as_non_null(&self) -> NonNull<Node<T>> {
        self.0
    }

    fn assert_header(&self) {
        let magic = unsafe { (*self.0.as_ptr()).magic };
        assert_eq!(
            magic, OBJECT_HEADER_MAGIC,
            "object header corrupted (magic {magic:#010x})"
        );
    }

    const fn next(&self) -> *mut Node<T> {
        unsafe { (*self.0.as_ptr()).next }
    }

    const fn set_next(&mut self, next: *mut Node<T>) {
        unsafe { (*self.0.as_ptr()).next = next }
    }

    /// Move the object out of the node and invalidate the header.
    ///
    /// # Safety
    /// The node must not be reachable from any list, and its block must be
    /// released right after.
    pub(crate) unsafe fn take_object(self) -> T {
        self.assert_header();
        let node = self.0.as_ptr();
        unsafe {
            (*node).magic = 0;
            ptr::read(&raw const (*node).object)
        }
    }
}

/// An object handed out by [`Cache::get`](crate::Cache::get).
///
/// It must go back through [`Cache::put`](crate::Cache::put) on the cache it
/// came from; dropping it leaks the object, which the cache reports as a
/// fatal leak at teardown.
#[must_use = "cache objects must be returned with `Cache::put`"]
pub struct CacheObject<T> {
    node: NodeRef<T>,
}

unsafe impl<T: Sync> Sync for CacheObject<T> {}

impl<T> CacheObject<T> {
    pub(crate) const fn new(node: NodeRef<T>) -> Self {
        debug_assert!(node.next().is_null());
        Self { node }
    }

    pub(crate) fn into_node(self) -> NodeRef<T> {
        self.node.assert_header();
        assert!(
            self.node.next().is_null(),
            "object is linked on a free list while a caller owns it"
        );
        self.node
    }
}

impl<T> Deref for CacheObject<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &(*self.node.0.as_ptr()).object }
    }
}

impl<T> DerefMut for CacheObject<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut (*self.node.0.as_ptr()).object }
    }
}

impl<T: fmt::Debug> fmt::Debug for CacheObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CacheObject").field(&**self).finish()
    }
}

/// The `GetList`: FIFO, only ever touched with the elevated lock held.
pub(crate) struct NodeList<T> {
    head: *mut Node<T>,
    tail: *mut Node<T>,
}

impl<T> NodeList<T> {
    pub(crate) const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
        }
    }

    pub(crate) const fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        let mut len = 0;
        let mut at = self.head;
        while !at.is_null() {
            len += 1;
            at = unsafe { (*at).next };
        }
        len
    }

    pub(crate) fn push_back(&mut self, mut node: NodeRef<T>) {
        node.assert_header();
        debug_assert!(node.next().is_null());
        node.set_next(ptr::null_mut());

        let raw = node.as_non_null().as_ptr();
        if self.tail.is_null() {
            self.head = raw;
        } else {
            unsafe { (*self.tail).next = raw };
        }
        self.tail = raw;
    }

    pub(crate) fn pop_front(&mut self) -> Option<NodeRef<T>> {
        let head = NonNull::new(self.head)?;
        let mut node = unsafe { NodeRef::from_raw(head) };
        node.assert_header();

        self.head = node.next();
        if self.head.is_null() {
            self.tail = ptr::null_mut();
        }
        node.set_next(ptr::null_mut());
        Some(node)
    }

    /// Append a chain detached from the `PutList`, consuming its links.
    pub(crate) fn fill(&mut self, mut chain: *mut Node<T>) {
        while let Some(head) = NonNull::new(chain) {
            let mut node = unsafe { NodeRef::from_raw(head) };
            chain = node.next();
            node.set_next(ptr::null_mut());
            self.push_back(node);
        }
    }
}

/// The `PutList`: a lock-free multi-producer stack whose only consumer
/// detaches the whole chain at once, so pops never race pushes (no ABA).
pub(crate) struct PutList<T> {
    head: AtomicPtr<Node<T>>,
}

impl<T> PutList<T> {
    pub(crate) const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub(crate) fn push(&self, mut node: NodeRef<T>) {
        let raw = node.as_non_null().as_ptr();
        let mut old = self.head.load(Ordering::Relaxed);
        loop {
            node.set_next(old);
            match self
                .head
                .compare_exchange_weak(old, raw, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => old = current,
            }
        }
    }

    /// Swizzle half: take every pushed node in one exchange.
    pub(crate) fn detach(&self) -> *mut Node<T> {
        self.head.swap(ptr::null_mut(), Ordering::Acquire)
    }
}
