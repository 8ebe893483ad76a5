//! Fault injection: synthetic `get` failures that exercise callers'
//! exhaustion handling.
//!
//! Settings are read once per cache, from node
//! `"fist/cache/<name>"` of whatever [`FaultConfig`] the owner supplies:
//!
//! * `defer`: number of `get` calls to let through before failures start.
//! * `probability`: percentage of the remaining calls that fail. `0` (or a
//!   missing key) disables injection; values above 100 are clamped.

use crate::config::FAULT_NAMESPACE;
use alloc::format;
use alloc::string::String;
use core::sync::atomic::{AtomicI32, Ordering};
use log::info;
use pvbus_sync::SpinLock;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Key-value source of fault injection settings.
pub trait FaultConfig {
    /// The raw string stored under `node`/`key`, if any.
    fn read(&self, node: &str, key: &str) -> Option<String>;
}

/// A configuration source that never injects faults.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFaults;

impl FaultConfig for NoFaults {
    fn read(&self, _node: &str, _key: &str) -> Option<String> {
        None
    }
}

impl<F> FaultConfig for F
where
    F: Fn(&str, &str) -> Option<String>,
{
    fn read(&self, node: &str, key: &str) -> Option<String> {
        self(node, key)
    }
}

pub(crate) struct FaultInjector {
    defer: AtomicI32,
    probability: u32,
    rng: SpinLock<SmallRng>,
}

impl FaultInjector {
    /// `None` when the configuration leaves injection disabled.
    pub(crate) fn from_config(name: &str, config: &impl FaultConfig, seed: u64) -> Option<Self> {
        let node = format!("{FAULT_NAMESPACE}/{name}");

        let defer = config
            .read(&node, "defer")
            .map_or(0, |value| saturate_i32(parse_long(&value)));
        let probability = config
            .read(&node, "probability")
            .map_or(0, |value| clamp_probability(parse_long(&value)));

        if probability == 0 {
            return None;
        }

        info!("{name}: Defer = {defer} Probability = {probability}");

        Some(Self {
            defer: AtomicI32::new(defer),
            probability,
            rng: SpinLock::new(SmallRng::seed_from_u64(seed)),
        })
    }

    pub(crate) fn should_fail(&self) -> bool {
        let previous = self
            .defer
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            })
            .unwrap_or_else(|d| d);
        if previous.saturating_sub(1) > 0 {
            return false;
        }

        let draw: u32 = self.rng.with_lock(|rng| rng.gen_range(0..100));
        draw < self.probability
    }

    #[cfg(test)]
    pub(crate) const fn probability(&self) -> u32 {
        self.probability
    }
}

fn saturate_i32(value: i64) -> i32 {
    i32::try_from(value).unwrap_or_else(|_| if value < 0 { i32::MIN } else { i32::MAX })
}

/// Negative inputs are read as huge unsigned values, so they clamp too.
fn clamp_probability(value: i64) -> u32 {
    u32::try_from(value).map_or(100, |p| p.min(100))
}

/// Parse an integer the way C's `strtol(text, NULL, 0)` does: leading
/// whitespace and sign, `0x` for hex, a leading `0` for octal, and anything
/// after the last valid digit ignored.
pub(crate) fn parse_long(text: &str) -> i64 {
    let text = text.trim_start();
    let (negative, text) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    let (radix, digits) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .map_or_else(
            || (if text.starts_with('0') { 8 } else { 10 }, text),
            |hex| (16, hex),
        );

    let magnitude = digits
        .chars()
        .map_while(|c| c.to_digit(radix))
        .fold(0_i64, |acc, d| {
            acc.saturating_mul(i64::from(radix))
                .saturating_add(i64::from(d))
        });

    if negative {
        magnitude.saturating_neg()
    } else {
        magnitude
    }
}
