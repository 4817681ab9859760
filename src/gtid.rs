// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Global transaction identifiers and GTID sets.
//!
//! A [`Gtid`] is the pair `(sid, gno)` of spec.md §3: `sid` is the UUID of
//! the group (or of the originator, for specified identifiers) and `gno` is
//! a monotonic integer starting at 1. A [`GtidSet`] represents a set of
//! GTIDs as a compact per-`sid` list of closed, disjoint, merged intervals.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// UUID portion of a GTID. Identifies either the group or a specified
/// originator.
pub type Sid = Uuid;

/// Monotonic integer portion of a GTID. Mirrors `rpl_gno` (signed 64-bit)
/// from the source this design is distilled from.
pub type Gno = i64;

/// No GNO can ever exceed this value; reaching it exhausts the group's
/// identifier space and is a fatal, restart-requiring condition.
pub const MAX_GNO: Gno = i64::MAX;

/// A single globally unique transaction identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Gtid {
    pub sid: Sid,
    pub gno: Gno,
}

impl Gtid {
    pub fn new(sid: Sid, gno: Gno) -> Self {
        Self { sid, gno }
    }
}

impl fmt::Display for Gtid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sid, self.gno)
    }
}

/// A closed interval `[start, end]` of GNOs, both inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: Gno,
    pub end: Gno,
}

impl Interval {
    pub fn new(start: Gno, end: Gno) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn contains(&self, gno: Gno) -> bool {
        self.start <= gno && gno <= self.end
    }

    pub fn len(&self) -> Gno {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// A set of GTIDs, represented per-sid as a sorted list of disjoint,
/// merged closed intervals. Cloning is cheap-ish (BTreeMap + Vec) and the
/// certifier wraps values in `Arc` where sharing across write-set items
/// matters (see `certifier::SharedSnapshot`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GtidSet {
    intervals: BTreeMap<Sid, Vec<Interval>>,
}

impl GtidSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.values().all(|v| v.is_empty())
    }

    pub fn intervals_for(&self, sid: &Sid) -> &[Interval] {
        self.intervals.get(sid).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn sids(&self) -> impl Iterator<Item = &Sid> {
        self.intervals.keys()
    }

    pub fn contains(&self, gtid: &Gtid) -> bool {
        match self.intervals.get(&gtid.sid) {
            Some(ivs) => ivs
                .binary_search_by(|iv| {
                    if gtid.gno < iv.start {
                        std::cmp::Ordering::Greater
                    } else if gtid.gno > iv.end {
                        std::cmp::Ordering::Less
                    } else {
                        std::cmp::Ordering::Equal
                    }
                })
                .is_ok(),
            None => false,
        }
    }

    /// Adds a single GTID to the set, merging with adjacent/overlapping
    /// intervals.
    pub fn add(&mut self, gtid: Gtid) {
        self.add_interval(gtid.sid, Interval::new(gtid.gno, gtid.gno));
    }

    pub fn add_interval(&mut self, sid: Sid, interval: Interval) {
        let entry = self.intervals.entry(sid).or_default();
        entry.push(interval);
        entry.sort_by_key(|iv| iv.start);
        merge_in_place(entry);
    }

    /// Unions `other` into `self`.
    pub fn add_set(&mut self, other: &GtidSet) {
        for (sid, ivs) in &other.intervals {
            for iv in ivs {
                self.add_interval(*sid, *iv);
            }
        }
    }

    pub fn union(&self, other: &GtidSet) -> GtidSet {
        let mut result = self.clone();
        result.add_set(other);
        result
    }

    /// Returns true iff every GTID in `self` is also in `other`. Equal sets
    /// count as subsets (a transaction never conflicts with itself
    /// re-observed, per spec.md §4.3 step 1).
    pub fn is_subset(&self, other: &GtidSet) -> bool {
        for (sid, ivs) in &self.intervals {
            let other_ivs = other.intervals_for(sid);
            for iv in ivs {
                if !interval_covered(iv, other_ivs) {
                    return false;
                }
            }
        }
        true
    }

    /// True iff `self` is a (non-strict) subset of `other` and the two sets
    /// are not equal.
    pub fn is_subset_not_equals(&self, other: &GtidSet) -> bool {
        self.is_subset(other) && self != other
    }

    /// Intersection of `self` and `other`, per-sid interval overlap.
    pub fn intersect(&self, other: &GtidSet) -> GtidSet {
        let mut result = GtidSet::new();
        for (sid, ivs) in &self.intervals {
            let other_ivs = other.intervals_for(sid);
            for iv in ivs {
                for oiv in other_ivs {
                    let start = iv.start.max(oiv.start);
                    let end = iv.end.min(oiv.end);
                    if start <= end {
                        result.add_interval(*sid, Interval::new(start, end));
                    }
                }
            }
        }
        result
    }

    /// Complement of this set's intervals for `sid`, within `[1, max]`, as
    /// an ordered list of closed intervals. This is the "Available GTID
    /// Intervals" structure of spec.md §3.
    pub fn complement(&self, sid: &Sid, max: Gno) -> Vec<Interval> {
        let mut result = Vec::new();
        let mut cursor: Gno = 1;
        for iv in self.intervals_for(sid) {
            if iv.start > cursor {
                result.push(Interval::new(cursor, iv.start - 1));
            }
            cursor = cursor.max(iv.end.saturating_add(1));
            if cursor > max {
                return result;
            }
        }
        if cursor <= max {
            result.push(Interval::new(cursor, max));
        }
        result
    }
}

fn interval_covered(iv: &Interval, ivs: &[Interval]) -> bool {
    let mut cursor = iv.start;
    for o in ivs {
        if o.end < cursor {
            continue;
        }
        if o.start > cursor {
            return false;
        }
        cursor = o.end + 1;
        if cursor > iv.end {
            return true;
        }
    }
    false
}

fn merge_in_place(intervals: &mut Vec<Interval>) {
    if intervals.len() < 2 {
        return;
    }
    let mut merged = Vec::with_capacity(intervals.len());
    let mut current = intervals[0];
    for next in intervals.iter().skip(1) {
        if next.start <= current.end.saturating_add(1) {
            current.end = current.end.max(next.end);
        } else {
            merged.push(current);
            current = *next;
        }
    }
    merged.push(current);
    *intervals = merged;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> Sid {
        Uuid::from_u128(1)
    }

    #[test]
    fn add_and_contains() {
        let mut set = GtidSet::new();
        set.add(Gtid::new(sid(), 1));
        set.add(Gtid::new(sid(), 2));
        set.add(Gtid::new(sid(), 5));
        assert!(set.contains(&Gtid::new(sid(), 1)));
        assert!(set.contains(&Gtid::new(sid(), 2)));
        assert!(!set.contains(&Gtid::new(sid(), 3)));
        assert!(set.contains(&Gtid::new(sid(), 5)));
        assert_eq!(set.intervals_for(&sid()), &[Interval::new(1, 2), Interval::new(5, 5)]);
    }

    #[test]
    fn subset_and_equal_counts_as_subset() {
        let mut a = GtidSet::new();
        a.add(Gtid::new(sid(), 1));
        a.add(Gtid::new(sid(), 2));
        let mut b = a.clone();
        assert!(a.is_subset(&b));
        b.add(Gtid::new(sid(), 3));
        assert!(a.is_subset(&b));
        assert!(!b.is_subset(&a));
    }

    #[test]
    fn intersect_computes_stable_set() {
        let mut a = GtidSet::new();
        a.add_interval(sid(), Interval::new(1, 10));
        let mut b = GtidSet::new();
        b.add_interval(sid(), Interval::new(1, 7));
        let stable = a.intersect(&b);
        assert_eq!(stable.intervals_for(&sid()), &[Interval::new(1, 7)]);
    }

    #[test]
    fn complement_is_available_intervals() {
        let mut set = GtidSet::new();
        set.add_interval(sid(), Interval::new(1, 5));
        set.add_interval(sid(), Interval::new(10, 12));
        let avail = set.complement(&sid(), 20);
        assert_eq!(
            avail,
            vec![Interval::new(6, 9), Interval::new(13, 20)]
        );
    }

    #[test]
    fn complement_of_empty_set_is_whole_range() {
        let set = GtidSet::new();
        let avail = set.complement(&sid(), 5);
        assert_eq!(avail, vec![Interval::new(1, 5)]);
    }
}
