use proptest::prelude::*;
use pvbus_range_set::RangeSet;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

const SPACE: i64 = 10_000;

fn ranges(set: &RangeSet) -> Vec<(i64, i64)> {
    set.iter().collect()
}

/// The minimal range list covering `model`.
fn coalesce(model: &BTreeSet<i64>) -> Vec<(i64, i64)> {
    let mut out: Vec<(i64, i64)> = Vec::new();
    for &value in model {
        match out.last_mut() {
            Some((_, end)) if *end + 1 == value => *end = value,
            _ => out.push((value, value)),
        }
    }
    out
}

fn assert_agrees(set: &RangeSet, model: &BTreeSet<i64>) {
    assert_eq!(ranges(set), coalesce(model));
    assert_eq!(set.len(), model.len() as u64);
    assert_eq!(set.is_empty(), model.is_empty());
    set.audit();
}

#[test]
fn pops_come_out_in_order() {
    let mut set = RangeSet::new().unwrap();
    set.put(10, 20).unwrap();

    for expected in 10..=20 {
        assert!(!set.is_empty(), "empty before popping {expected}");
        assert_eq!(set.pop(), expected);
    }
    assert!(set.is_empty());
    set.teardown();
}

#[test]
fn touching_puts_merge() {
    let mut set = RangeSet::new().unwrap();
    set.put(0, 4).unwrap();
    set.put(5, 9).unwrap();
    assert_eq!(ranges(&set), [(0, 9)]);

    for item in 0..=9 {
        assert!(set.contains(item));
        set.get(item).unwrap();
        assert!(!set.contains(item));
    }
    assert!(set.is_empty());
}

#[test]
fn merge_joins_both_neighbors() {
    let mut set = RangeSet::new().unwrap();
    set.put(0, 4).unwrap();
    set.put(10, 14).unwrap();
    set.put(5, 9).unwrap();
    assert_eq!(ranges(&set), [(0, 14)]);
    set.audit();
}

#[test]
fn interior_get_splits() {
    let mut set = RangeSet::new().unwrap();
    set.put(0, 9).unwrap();
    set.get(5).unwrap();
    assert_eq!(ranges(&set), [(0, 4), (6, 9)]);
    assert_eq!(set.len(), 9);
}

#[test]
#[should_panic(expected = "not present")]
fn second_get_of_the_same_value_panics() {
    let mut set = RangeSet::new().unwrap();
    set.put(0, 9).unwrap();
    set.get(5).unwrap();
    let _ = set.get(5);
}

#[test]
#[should_panic(expected = "overlaps")]
fn overlapping_put_panics() {
    let mut set = RangeSet::new().unwrap();
    set.put(0, 9).unwrap();
    set.put(20, 29).unwrap();
    set.put(40, 49).unwrap();
    // Disjoint from the cursor range, overlapping one further down.
    let _ = set.put(5, 15);
}

#[test]
#[should_panic(expected = "empty range set")]
fn pop_from_empty_panics() {
    let mut set = RangeSet::new().unwrap();
    set.pop();
}

#[test]
#[should_panic(expected = "torn down holding 3 values")]
fn teardown_requires_an_empty_set() {
    let mut set = RangeSet::new().unwrap();
    set.put(1, 3).unwrap();
    set.teardown();
}

#[test]
fn end_to_end() {
    let mut set = RangeSet::new().unwrap();
    set.put(10, 20).unwrap();
    assert!(!set.is_empty());
    assert_eq!(set.pop(), 10);

    set.put(5, 9).unwrap();
    assert_eq!(ranges(&set), [(5, 9), (11, 20)]);

    set.get(15).unwrap();
    assert_eq!(ranges(&set), [(5, 9), (11, 14), (16, 20)]);

    set.get(16).unwrap();
    assert_eq!(ranges(&set), [(5, 9), (11, 14), (17, 20)]);
    set.audit();
}

#[test]
fn random_history_matches_an_ordered_set() {
    let mut rng = SmallRng::seed_from_u64(0x0ddb_a11);
    let mut set = RangeSet::new().unwrap();
    let mut model = BTreeSet::new();

    for step in 0..10_000 {
        let put = model.is_empty() || rng.gen_bool(0.5);
        if put {
            let start = rng.gen_range(0..SPACE);
            if model.contains(&start) {
                continue;
            }
            // Grow the range up to the next held value.
            let limit = model.range(start..).next().map_or(SPACE, |&next| next);
            let end = (start + rng.gen_range(0..16)).min(limit - 1);

            set.put(start, end).unwrap();
            model.extend(start..=end);
        } else {
            let probe = rng.gen_range(0..SPACE);
            let item = *model
                .range(probe..)
                .next()
                .or_else(|| model.iter().next())
                .unwrap();

            set.get(item).unwrap();
            model.remove(&item);
        }

        assert_eq!(
            ranges(&set),
            coalesce(&model),
            "step {step}: ranges disagree with the model"
        );
        assert_eq!(set.len(), model.len() as u64);
    }

    set.audit();
    while !model.is_empty() {
        assert_eq!(Some(set.pop()), model.pop_first());
    }
    set.teardown();
}

#[test]
fn membership_matches_value_by_value() {
    let mut set = RangeSet::new().unwrap();
    let mut model = BTreeSet::new();
    for start in (0..500).step_by(7) {
        set.put(start, start + 3).unwrap();
        model.extend(start..=start + 3);
    }
    for item in (0..500).step_by(3) {
        if model.remove(&item) {
            set.get(item).unwrap();
        }
    }

    for value in -5..510 {
        assert_eq!(set.contains(value), model.contains(&value), "value {value}");
    }
}

#[derive(Debug, Clone)]
enum Op {
    Put { start: i64, len: i64 },
    Get(i64),
    Pop,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0_i64..256, 1_i64..8).prop_map(|(start, len)| Op::Put { start, len }),
        3 => (0_i64..256).prop_map(Op::Get),
        1 => Just(Op::Pop),
    ]
}

proptest! {
    #[test]
    fn agrees_with_an_ordered_set(ops in proptest::collection::vec(op(), 1..200)) {
        let mut set = RangeSet::new().unwrap();
        let mut model = BTreeSet::new();

        for op in ops {
            match op {
                Op::Put { start, len } => {
                    let end = start + len - 1;
                    if model.range(start..=end).next().is_some() {
                        continue;
                    }
                    set.put(start, end).unwrap();
                    model.extend(start..=end);
                }
                Op::Get(item) => {
                    if !model.remove(&item) {
                        continue;
                    }
                    set.get(item).unwrap();
                }
                Op::Pop => {
                    let Some(smallest) = model.pop_first() else {
                        continue;
                    };
                    prop_assert_eq!(set.pop(), smallest);
                }
            }
            assert_agrees(&set, &model);
        }
    }
}
