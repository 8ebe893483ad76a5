//! Cache configuration parameters.

use alloc::string::String;
use core::time::Duration;

/// Number of objects each execution unit's magazine can hold.
pub const MAGAZINE_SLOTS: usize = 6;

/// Longest accepted cache name, in bytes.
pub const MAXIMUM_NAME_LENGTH: usize = 128;

/// Configuration node under which per-cache fault injection is looked up;
/// the full node is `"<namespace>/<cache name>"`.
pub const FAULT_NAMESPACE: &str = "fist/cache";

/// Configuration for one object cache.
///
/// Everything here is consumed by [`Cache::new`](crate::Cache::new) and is
/// immutable afterwards.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Name used in log lines and to find the fault injection settings.
    pub name: String,

    /// Objects constructed up front and never given back by trimming.
    ///
    /// Default: 0.
    pub reservation: u32,

    /// Seed of the fault injection PRNG.
    ///
    /// Default: a hash of `name`, so that two runs of the same driver inject
    /// the same failure sequence.
    pub fault_seed: u64,
}

impl CacheConfig {
    /// How often the owner of a cache should call
    /// [`Cache::trim`](crate::Cache::trim).
    pub const TRIM_PERIOD: Duration = Duration::from_secs(1);

    pub const DEFAULT_RESERVATION: u32 = 0;

    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let fault_seed = fnv1a(name.as_bytes());
        Self {
            name,
            reservation: Self::DEFAULT_RESERVATION,
            fault_seed,
        }
    }

    #[must_use]
    pub const fn with_reservation(mut self, reservation: u32) -> Self {
        self.reservation = reservation;
        self
    }

    #[must_use]
    pub const fn with_fault_seed(mut self, seed: u64) -> Self {
        self.fault_seed = seed;
        self
    }

    pub(crate) fn is_valid_name(&self) -> bool {
        !self.name.is_empty() && self.name.len() <= MAXIMUM_NAME_LENGTH
    }
}

const fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        i += 1;
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_follows_the_name() {
        assert_eq!(
            CacheConfig::new("gnttab").fault_seed,
            CacheConfig::new("gnttab").fault_seed
        );
        assert_ne!(
            CacheConfig::new("gnttab").fault_seed,
            CacheConfig::new("evtchn").fault_seed
        );
    }

    #[test]
    fn names_are_bounded() {
        assert!(CacheConfig::new("ring").is_valid_name());
        assert!(!CacheConfig::new("").is_valid_name());
        assert!(CacheConfig::new("x".repeat(MAXIMUM_NAME_LENGTH)).is_valid_name());
        assert!(!CacheConfig::new("x".repeat(MAXIMUM_NAME_LENGTH + 1)).is_valid_name());
    }
}
