//! # Range set
//!
//! Tracks which identifiers of a sparse integer space (event channel ports,
//! grant references) are free, as a list of disjoint closed ranges. Runs of
//! identifiers are withdrawn with [`RangeSet::pop`] or [`RangeSet::get`] and
//! returned with [`RangeSet::put`]; touching ranges are merged on the way
//! back in.
//!
//! ```
//! use pvbus_range_set::RangeSet;
//!
//! let mut ports = RangeSet::new()?;
//! ports.put(10, 20)?;
//! assert_eq!(ports.pop(), 10);
//!
//! ports.put(5, 9)?;
//! ports.get(15)?;
//! assert_eq!(ports.iter().collect::<Vec<_>>(), [(5, 9), (11, 14), (16, 20)]);
//! # Ok::<(), pvbus_range_set::RangeSetError>(())
//! ```
//!
//! Precondition violations (popping an empty set, getting an absent value,
//! putting an overlapping range) are bugs in the caller and panic. The
//! `audit` feature additionally re-checks every invariant after each
//! mutating call.

#![cfg_attr(not(any(test, doctest, feature = "std")), no_std)]

extern crate alloc;

mod error;
mod range_set;

pub use error::RangeSetError;
pub use range_set::{RangeSet, Ranges};
