use crate::config::MAGAZINE_SLOTS;
use crate::object::NodeRef;
use pvbus_sync::SpinLock;

/// One execution unit's stash of ready objects.
///
/// Only ever acquired with `try_lock`: the owning unit treats a busy
/// magazine as empty (or full), and a flush from another unit skips it.
pub(crate) struct Magazine<T> {
    slots: SpinLock<[Option<NodeRef<T>>; MAGAZINE_SLOTS]>,
}

impl<T: Send> Magazine<T> {
    pub(crate) const fn new() -> Self {
        Self {
            slots: SpinLock::new([const { None }; MAGAZINE_SLOTS]),
        }
    }

    pub(crate) fn try_get(&self) -> Option<NodeRef<T>> {
        self.slots
            .try_with(|slots| slots.iter_mut().find_map(Option::take))
            .flatten()
    }

    /// Hands the node back if the magazine is full or busy.
    pub(crate) fn try_put(&self, node: NodeRef<T>) -> Result<(), NodeRef<T>> {
        let Some(mut slots) = self.slots.try_lock() else {
            return Err(node);
        };
        match slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(node);
                Ok(())
            }
            None => Err(node),
        }
    }

    /// Empty the magazine into `sink`. Returns `false` if it was busy.
    pub(crate) fn try_flush(&self, mut sink: impl FnMut(NodeRef<T>)) -> bool {
        self.slots
            .try_with(|slots| slots.iter_mut().filter_map(Option::take).for_each(&mut sink))
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Node;
    use alloc::boxed::Box;
    use alloc::vec::Vec;
    use core::ptr::NonNull;

    fn node(value: u8) -> NodeRef<u8> {
        let raw = Box::into_raw(Box::new(Node::new(value)));
        unsafe { NodeRef::from_raw(NonNull::new_unchecked(raw)) }
    }

    fn free(node: NodeRef<u8>) {
        drop(unsafe { Box::from_raw(node.as_non_null().as_ptr()) });
    }

    #[test]
    fn overflows_after_all_slots_fill() {
        let magazine = Magazine::new();
        for v in 0..MAGAZINE_SLOTS {
            assert!(magazine.try_put(node(u8::try_from(v).unwrap())).is_ok());
        }
        let rejected = magazine.try_put(node(99)).unwrap_err();
        free(rejected);

        let mut flushed = Vec::new();
        assert!(magazine.try_flush(|n| flushed.push(n)));
        assert_eq!(flushed.len(), MAGAZINE_SLOTS);
        flushed.into_iter().for_each(free);
        assert!(magazine.try_get().is_none());
    }

    #[test]
    fn busy_magazine_is_a_miss() {
        let magazine = Magazine::new();
        assert!(magazine.try_put(node(1)).is_ok());

        let held = magazine.slots.lock();
        assert!(magazine.try_get().is_none());
        assert!(!magazine.try_flush(|_| unreachable!()));
        let rejected = magazine.try_put(node(2)).unwrap_err();
        drop(held);
        free(rejected);

        free(magazine.try_get().unwrap());
    }
}
