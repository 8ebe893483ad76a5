//! # Elevated-context synchronization primitives
//!
//! The paravirtual bus primitives run from contexts that must never block:
//! interrupt-like callbacks, timer callbacks, and code that has disabled
//! preemption on the current processor. Everything here is therefore built
//! from spinning or try-only acquisition.
//!
//! * [`RawSpin`] is the "elevated lock": a bare test-and-test-and-set lock,
//!   suitable as the lock a driver hands to an object cache through its lock
//!   callbacks.
//! * [`SpinLock`] wraps a [`RawSpin`] around the data it protects and hands
//!   out RAII guards.
//! * [`ExecutionUnits`] tells per-unit caches which shard the caller is on
//!   and keeps the caller there for the duration of a [`Pinned`] section.

#![cfg_attr(not(any(test, doctest, feature = "std")), no_std)]
#![allow(unsafe_code)]

#[cfg(target_arch = "x86_64")]
pub mod irq;
mod raw_spin;
mod spin_lock;
mod unit;

#[cfg(target_arch = "x86_64")]
pub use irq::{IrqGuard, IrqUnits};
pub use raw_spin::RawSpin;
pub use spin_lock::{SpinLock, SpinLockGuard};
#[cfg(feature = "std")]
pub use unit::ThreadUnits;
pub use unit::{ExecutionUnits, Pinned};
