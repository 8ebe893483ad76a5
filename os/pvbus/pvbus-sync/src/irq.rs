//! Bare-metal execution-unit pinning for x86-64 kernels.
//!
//! Disabling interrupts on the current processor is the cheapest way to keep
//! a caller from being preempted or migrated while it touches per-processor
//! state. [`IrqGuard`] does exactly that, and [`IrqUnits`] pairs it with the
//! embedder's processor-number source to implement [`ExecutionUnits`].
//!
//! # Safety & Privilege
//!
//! `cli`/`sti` are only legal in a privileged context (ring 0 or a suitable
//! hypervisor context). Using these types from user space faults.

use crate::{ExecutionUnits, Pinned};

/// Bit 9 of `RFLAGS`.
const RFLAGS_IF: u64 = 1 << 9;

#[inline]
fn rflags() -> u64 {
    let r: u64;
    unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(nostack, preserves_flags)) }
    r
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// Nesting is safe: an inner guard created while interrupts are already off
/// leaves them off when it is dropped.
///
/// ```no_run
/// use pvbus_sync::IrqGuard;
///
/// {
///     let _g = IrqGuard::new();
///     // touch this processor's shard
/// }
/// ```
pub struct IrqGuard {
    /// Whether interrupts were enabled (IF=1) when the guard was created.
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = rflags() & RFLAGS_IF != 0;
        if enabled {
            unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
        }
        Self {
            were_enabled: enabled,
        }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
        }
    }
}

/// Processors of an x86-64 machine.
///
/// `current` must return the logical number of the processor it runs on; it
/// is always called with interrupts disabled.
pub struct IrqUnits<F> {
    count: usize,
    current: F,
}

impl<F> IrqUnits<F>
where
    F: Fn() -> usize + Sync,
{
    pub const fn new(count: usize, current: F) -> Self {
        Self { count, current }
    }
}

impl<F> ExecutionUnits for IrqUnits<F>
where
    F: Fn() -> usize + Sync,
{
    type Pin = IrqGuard;

    fn count(&self) -> usize {
        self.count
    }

    fn pin(&self) -> Pinned<IrqGuard> {
        let guard = IrqGuard::new();
        Pinned::new((self.current)(), guard)
    }
}
