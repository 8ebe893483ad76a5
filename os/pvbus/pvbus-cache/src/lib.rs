//! # Per-processor object cache
//!
//! A caching allocator of fixed-type, already-constructed objects for
//! paravirtual bus drivers (grant entries, event channel records, ring
//! request descriptors). Objects live in three tiers:
//!
//! 1. a small per-execution-unit **magazine** touched without any lock,
//! 2. a lock-free **`PutList`** any unit can push returned objects onto,
//! 3. a **`GetList`** guarded by the owner's elevated lock, refilled from the
//!    `PutList` in one exchange ("swizzle") when it runs dry.
//!
//! A periodic [`Cache::trim`] destroys objects that stayed idle for a whole
//! period, never going below the configured reservation. Fault injection
//! makes `get` fail on demand so owners can test their exhaustion paths.
//!
//! ```
//! use pvbus_cache::{Cache, CacheConfig, CacheOps, NoFaults};
//! use pvbus_sync::{RawSpin, ThreadUnits};
//!
//! #[derive(Default)]
//! struct Requests {
//!     lock: RawSpin,
//! }
//!
//! impl CacheOps for Requests {
//!     type Object = [u64; 8];
//!     type Error = core::convert::Infallible;
//!
//!     fn construct(&self) -> Result<[u64; 8], Self::Error> {
//!         Ok([0; 8])
//!     }
//!
//!     fn acquire_lock(&self) {
//!         self.lock.lock();
//!     }
//!
//!     fn release_lock(&self) {
//!         unsafe { self.lock.unlock() }
//!     }
//! }
//!
//! let cache = Cache::new(
//!     CacheConfig::new("requests"),
//!     Requests::default(),
//!     ThreadUnits::available(),
//!     &NoFaults,
//! )?;
//!
//! let mut request = cache.get()?;
//! request[0] = 42;
//! cache.put(request);
//!
//! cache.teardown();
//! # Ok::<(), pvbus_cache::CacheError>(())
//! ```

#![cfg_attr(not(any(test, doctest, feature = "std")), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod cache;
mod config;
mod error;
mod fist;
mod magazine;
mod object;
mod ops;
#[cfg(feature = "std")]
mod timer;

pub use cache::{Cache, CacheStatistics};
pub use config::{CacheConfig, FAULT_NAMESPACE, MAGAZINE_SLOTS, MAXIMUM_NAME_LENGTH};
pub use error::{CacheError, Exhaustion};
pub use fist::{FaultConfig, NoFaults};
pub use object::CacheObject;
pub use ops::{BackingAllocator, CacheOps, GlobalBacking};
#[cfg(feature = "std")]
pub use timer::{Trim, TrimTimer};
