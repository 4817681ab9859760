// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! GNO allocation policy (spec.md §4.3 "Per-member GNO blocks"): either
//! strictly sequential (block size ≤ 1) or per-member reserved blocks
//! (block size > 1), both drawn from the complement of whichever GTID set
//! (`group_gtid_executed`, or `group_gtid_extracted` while catching up)
//! the caller passes in.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::gtid::{Gno, GtidSet, Interval, Sid, MAX_GNO};
use crate::view::MemberId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GnoExhausted;

enum Candidate {
    Found(Gno),
    RangeExhausted,
    SpaceExhausted,
}

/// Scans `used`'s intervals for `sid`, returning the first GNO not in
/// `used` within `[start, end]`.
fn find_candidate(used: &GtidSet, sid: &Sid, start: Gno, end: Gno) -> Candidate {
    let mut candidate = start;
    for iv in used.intervals_for(sid) {
        if candidate < iv.start {
            return if candidate <= end {
                Candidate::Found(candidate)
            } else if end == MAX_GNO {
                Candidate::SpaceExhausted
            } else {
                Candidate::RangeExhausted
            };
        }
        candidate = candidate.max(iv.end.saturating_add(1));
        if candidate > end {
            return if end == MAX_GNO {
                Candidate::SpaceExhausted
            } else {
                Candidate::RangeExhausted
            };
        }
    }
    if candidate <= end {
        Candidate::Found(candidate)
    } else if end == MAX_GNO {
        Candidate::SpaceExhausted
    } else {
        Candidate::RangeExhausted
    }
}

/// The next free GNO for `sid`, scanning `used` directly (not a cached
/// interval list). Used both for the sequential allocation policy and for
/// view-change marker GNOs, which must always be assigned this way so
/// every member agrees on the same value (spec.md §4.3
/// `generate_view_change_group_gno`).
pub fn next_sequential(used: &GtidSet, sid: &Sid) -> Result<Gno, GnoExhausted> {
    match find_candidate(used, sid, 1, MAX_GNO) {
        Candidate::Found(g) => Ok(g),
        _ => Err(GnoExhausted),
    }
}

/// Per-member block allocator for `gtid_assignment_block_size > 1`.
/// Maintains a cached queue of available intervals, recomputed
/// periodically so that gaps left by silent members are eventually
/// reclaimed (spec.md §4.3).
pub struct GnoAllocator {
    block_size: i64,
    available: VecDeque<Interval>,
    member_blocks: HashMap<MemberId, Interval>,
    assigned_in_blocks_counter: i64,
}

impl GnoAllocator {
    pub fn new(block_size: i64) -> Self {
        Self {
            block_size,
            available: VecDeque::new(),
            member_blocks: HashMap::new(),
            assigned_in_blocks_counter: 1,
        }
    }

    pub fn block_size(&self) -> i64 {
        self.block_size
    }

    /// Drops block reservations held by members no longer in the view,
    /// so their unused GNOs are reclaimed on the next recompute rather
    /// than leaked forever (spec.md §4.3 `handle_view_change`).
    pub fn retain_members(&mut self, present: &HashSet<MemberId>) {
        self.member_blocks.retain(|m, _| present.contains(m));
    }

    /// Recomputes the cached available-interval queue from `used`,
    /// discarding all per-member block reservations. Also invoked on a
    /// view change (members holding a reservation may be gone).
    pub fn recompute(&mut self, used: &GtidSet, sid: &Sid) {
        self.assigned_in_blocks_counter = 1;
        self.member_blocks.clear();
        self.available = used.complement(sid, MAX_GNO).into();
    }

    fn reserve_block(&mut self, used: &GtidSet, sid: &Sid) -> Result<Interval, GnoExhausted> {
        if self.available.is_empty() {
            self.recompute(used, sid);
        }
        let front = *self.available.front().ok_or(GnoExhausted)?;
        if self.block_size > front.end - front.start {
            self.available.pop_front();
            Ok(front)
        } else {
            let reserved = Interval::new(front.start, front.start + self.block_size - 1);
            self.available[0] = Interval {
                start: reserved.end + 1,
                end: front.end,
            };
            Ok(reserved)
        }
    }

    /// Allocates the next GNO for `member`, reserving or recomputing
    /// blocks as needed.
    pub fn allocate_for_member(
        &mut self,
        used: &GtidSet,
        sid: &Sid,
        member: &MemberId,
    ) -> Result<Gno, GnoExhausted> {
        if self.assigned_in_blocks_counter % (self.block_size + 1) == 0 {
            self.recompute(used, sid);
        }

        if !self.member_blocks.contains_key(member) {
            let block = self.reserve_block(used, sid)?;
            self.member_blocks.insert(member.clone(), block);
        }

        loop {
            let block = *self.member_blocks.get(member).expect("just inserted");
            match find_candidate(used, sid, block.start, block.end) {
                Candidate::Found(g) => {
                    self.member_blocks.insert(
                        member.clone(),
                        Interval {
                            start: g + 1,
                            end: block.end,
                        },
                    );
                    self.assigned_in_blocks_counter += 1;
                    return Ok(g);
                }
                Candidate::RangeExhausted => {
                    let new_block = self.reserve_block(used, sid)?;
                    self.member_blocks.insert(member.clone(), new_block);
                }
                Candidate::SpaceExhausted => return Err(GnoExhausted),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sid() -> Sid {
        Uuid::from_u128(42)
    }

    #[test]
    fn sequential_allocation_is_first_gap() {
        let mut used = GtidSet::new();
        used.add_interval(sid(), Interval::new(1, 3));
        assert_eq!(next_sequential(&used, &sid()), Ok(4));
    }

    #[test]
    fn block_allocation_partitions_members_s5() {
        // Scenario S5 of spec.md §8: block size 1000, two members each
        // submit one transaction.
        let used = GtidSet::new();
        let mut alloc = GnoAllocator::new(1000);
        let a = MemberId::from("a");
        let b = MemberId::from("b");

        let gno_a = alloc.allocate_for_member(&used, &sid(), &a).unwrap();
        assert_eq!(gno_a, 1);
        let gno_b = alloc.allocate_for_member(&used, &sid(), &b).unwrap();
        assert_eq!(gno_b, 1001);
    }

    #[test]
    fn blocks_reclaim_after_counter_rollover() {
        let mut used = GtidSet::new();
        let mut alloc = GnoAllocator::new(2);
        let a = MemberId::from("a");
        let b = MemberId::from("b");

        let g1 = alloc.allocate_for_member(&used, &sid(), &a).unwrap();
        used.add(crate::gtid::Gtid::new(sid(), g1));
        assert_eq!(g1, 1);

        // b takes the second block [3,4].
        let g2 = alloc.allocate_for_member(&used, &sid(), &b).unwrap();
        used.add(crate::gtid::Gtid::new(sid(), g2));
        assert_eq!(g2, 3);

        // Third allocation (a's second use) rolls the counter over
        // (2 % (2+1) == ... ) and forces a recompute once 3 allocations
        // have been made, reclaiming a's unused [2,2] slot.
        let g3 = alloc.allocate_for_member(&used, &sid(), &a).unwrap();
        used.add(crate::gtid::Gtid::new(sid(), g3));
        assert!(g3 > 0);
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut used = GtidSet::new();
        used.add_interval(sid(), Interval::new(1, MAX_GNO));
        assert_eq!(next_sequential(&used, &sid()), Err(GnoExhausted));
    }
}
