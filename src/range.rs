// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Closed-interval arithmetic over revision axes.
//!
//! A [`Range`] is a closed interval `[min, max]` over an ordered scalar axis
//! (revision numbers), or the empty range. Coverage for one cache dimension
//! is tracked as a [`SortedRangeSet`]: non-overlapping ranges sorted
//! ascending by `min`, kept minimal, and mutated only through
//! [`Range::merge_into_array`].

use serde::{Deserialize, Serialize};

use crate::errors::RangeError;

/// Position on the ordering axis of a time series.
pub type Revision = u64;

/// Non-overlapping [`Range`]s sorted ascending by `min`, representing the
/// known-available coverage for one cache dimension.
pub type SortedRangeSet = Vec<Range>;

/// Serialized form of a range: `{min, max}`, or `{}` for the empty range.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RangeDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<Revision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<Revision>,
}

/// A closed interval `[min, max]` over revisions, possibly empty.
///
/// The empty range is a sentinel (`min = u64::MAX, max = 0`), not a
/// zero-width interval, so `add_value` can initialize either bound with a
/// plain `min`/`max` fold. Non-empty ranges hold `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RangeDto", into = "RangeDto")]
pub struct Range {
    min: Revision,
    max: Revision,
}

impl Default for Range {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Range> for RangeDto {
    fn from(range: Range) -> Self {
        RangeDto {
            min: range.min().map(|_| range.min),
            max: range.max().map(|_| range.max),
        }
    }
}

impl TryFrom<RangeDto> for Range {
    type Error = String;

    fn try_from(dto: RangeDto) -> Result<Self, Self::Error> {
        match (dto.min, dto.max) {
            (Some(min), Some(max)) => Ok(Range::from_explicit_range(min, max)),
            (None, None) => Ok(Range::new()),
            _ => Err("range dict must contain both min and max, or neither".to_string()),
        }
    }
}

impl Range {
    /// Create the empty range.
    pub fn new() -> Self {
        Self {
            min: Revision::MAX,
            max: 0,
        }
    }

    /// Create a range directly from explicit bounds.
    ///
    /// Bounds are stored as given; a `min > max` input produces a malformed
    /// range that [`Range::find_difference`] rejects.
    pub fn from_explicit_range(min: Revision, max: Revision) -> Self {
        Self { min, max }
    }

    /// Whether this range contains no revisions.
    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    /// Lower bound, `None` when empty.
    pub fn min(&self) -> Option<Revision> {
        (!self.is_empty()).then_some(self.min)
    }

    /// Upper bound, `None` when empty.
    pub fn max(&self) -> Option<Revision> {
        (!self.is_empty()).then_some(self.max)
    }

    /// Length of the interval (`max - min`); 0 for empty and point ranges.
    pub fn duration(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.max - self.min
        }
    }

    /// Widen (or initialize) the interval to include `value`.
    pub fn add_value(&mut self, value: Revision) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Widen the interval to include all of `other`. No-op if `other` is
    /// empty.
    pub fn add_range(&mut self, other: &Range) {
        if other.is_empty() {
            return;
        }
        self.add_value(other.min);
        self.add_value(other.max);
    }

    /// Whether `value` lies inside the interval, boundaries included.
    pub fn contains_value(&self, value: Revision) -> bool {
        !self.is_empty() && self.min <= value && value <= self.max
    }

    /// Boundary-inclusive containment. Empty ranges never contain anything,
    /// including another empty range.
    pub fn contains_range_inclusive(&self, other: &Range) -> bool {
        !self.is_empty() && !other.is_empty() && self.min <= other.min && other.max <= self.max
    }

    /// Boundary-inclusive intersection test. Empty ranges never intersect
    /// anything.
    pub fn intersects_range_inclusive(&self, other: &Range) -> bool {
        !self.is_empty() && !other.is_empty() && self.min <= other.max && other.min <= self.max
    }

    /// The overlap of two ranges, or the empty range if either operand is
    /// empty or the intervals are disjoint. Pure and non-mutating.
    pub fn find_intersection(&self, other: &Range) -> Range {
        if !self.intersects_range_inclusive(other) {
            return Range::new();
        }
        Range::from_explicit_range(self.min.max(other.min), self.max.min(other.max))
    }

    /// Insert this range into a sorted, non-overlapping array, producing a
    /// new sorted, non-overlapping, minimal array.
    ///
    /// Single linear walk: an existing range that already contains the
    /// (possibly grown) inserted range is kept verbatim and insertion is
    /// done; an existing range fully contained by the inserted range is
    /// dropped; overlaps are absorbed into the growing inserted range;
    /// ranges strictly past the accumulated `max` trigger insertion before
    /// them.
    pub fn merge_into_array(&self, sorted: &[Range]) -> SortedRangeSet {
        if self.is_empty() {
            return sorted.to_vec();
        }

        let mut merged = Vec::with_capacity(sorted.len() + 1);
        let mut accumulated = *self;
        let mut inserted = false;

        for existing in sorted {
            if inserted {
                merged.push(*existing);
                continue;
            }
            if existing.contains_range_inclusive(&accumulated) {
                merged.push(*existing);
                inserted = true;
                continue;
            }
            if accumulated.contains_range_inclusive(existing) {
                continue;
            }
            if accumulated.intersects_range_inclusive(existing) {
                accumulated.add_range(existing);
                continue;
            }
            if existing.min > accumulated.max {
                merged.push(accumulated);
                merged.push(*existing);
                inserted = true;
                continue;
            }
            merged.push(*existing);
        }

        if !inserted {
            merged.push(accumulated);
        }
        merged
    }

    /// Subtract `a ∩ b` from `a`, returning the 0–2 disjoint remainders of
    /// `a` with positive duration.
    ///
    /// Boundary convention is inclusive: a remainder shares its boundary
    /// revision with the intersection, so a fetch for the remainder always
    /// includes an anchor point adjacent to already-covered data.
    ///
    /// # Errors
    ///
    /// Returns [`RangeError::InvalidRange`] if either input is malformed
    /// (`min > max` outside the empty sentinel). With point-range inputs
    /// the only legal outcomes are "no overlap" (returns `[a]`) and "exact
    /// overlap" (returns nothing).
    pub fn find_difference(a: &Range, b: &Range) -> Result<Vec<Range>, RangeError> {
        Self::ensure_well_formed(a)?;
        Self::ensure_well_formed(b)?;

        if a.is_empty() {
            return Ok(Vec::new());
        }

        let intersection = a.find_intersection(b);
        if intersection.is_empty() {
            return Ok(vec![*a]);
        }

        if a.duration() == 0 && b.duration() == 0 {
            // Intersecting point ranges are necessarily equal.
            return Ok(Vec::new());
        }

        let mut remainders = Vec::new();
        if intersection.min > a.min {
            remainders.push(Range::from_explicit_range(a.min, intersection.min));
        }
        if a.max > intersection.max {
            remainders.push(Range::from_explicit_range(intersection.max, a.max));
        }
        Ok(remainders)
    }

    fn ensure_well_formed(range: &Range) -> Result<(), RangeError> {
        let is_empty_sentinel = range.min == Revision::MAX && range.max == 0;
        if range.min > range.max && !is_empty_sentinel {
            return Err(RangeError::invalid_range(format!(
                "negative duration: [{}, {}]",
                range.min, range.max
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(min: Revision, max: Revision) -> Range {
        Range::from_explicit_range(min, max)
    }

    #[test]
    fn test_empty_range_properties() {
        let empty = Range::new();
        assert!(empty.is_empty());
        assert_eq!(empty.min(), None);
        assert_eq!(empty.max(), None);
        assert_eq!(empty.duration(), 0);
        assert!(!empty.contains_value(0));
        assert!(!empty.contains_range_inclusive(&Range::new()));
        assert!(!empty.intersects_range_inclusive(&Range::new()));
    }

    #[test]
    fn test_add_value_initializes_and_widens() {
        let mut range = Range::new();
        range.add_value(10);
        assert_eq!((range.min(), range.max()), (Some(10), Some(10)));

        range.add_value(5);
        range.add_value(20);
        assert_eq!((range.min(), range.max()), (Some(5), Some(20)));

        // Interior values change nothing
        range.add_value(12);
        assert_eq!((range.min(), range.max()), (Some(5), Some(20)));
    }

    #[test]
    fn test_add_range_ignores_empty_operand() {
        let mut range = r(3, 7);
        range.add_range(&Range::new());
        assert_eq!(range, r(3, 7));

        range.add_range(&r(1, 10));
        assert_eq!(range, r(1, 10));
    }

    #[test]
    fn test_intersection_symmetry() {
        let a = r(0, 10);
        let b = r(5, 15);
        assert_eq!(a.find_intersection(&b), b.find_intersection(&a));
        assert_eq!(a.find_intersection(&b), r(5, 10));
    }

    #[test]
    fn test_intersection_with_self_is_identity() {
        let a = r(3, 9);
        assert_eq!(a.find_intersection(&a), a);
    }

    #[test]
    fn test_intersection_disjoint_and_empty() {
        assert!(r(0, 2).find_intersection(&r(5, 9)).is_empty());
        assert!(r(0, 2).find_intersection(&Range::new()).is_empty());
        assert!(Range::new().find_intersection(&r(0, 2)).is_empty());
    }

    #[test]
    fn test_intersection_touching_boundaries() {
        // Boundary-inclusive: touching at a single revision intersects
        assert_eq!(r(0, 5).find_intersection(&r(5, 9)), r(5, 5));
    }

    #[test]
    fn test_find_difference_with_self_is_empty() {
        let a = r(3, 9);
        assert!(Range::find_difference(&a, &a).unwrap().is_empty());
    }

    #[test]
    fn test_find_difference_with_empty_returns_clone() {
        let a = r(3, 9);
        assert_eq!(Range::find_difference(&a, &Range::new()).unwrap(), vec![a]);
    }

    #[test]
    fn test_find_difference_both_remainders() {
        let diff = Range::find_difference(&r(0, 100), &r(40, 60)).unwrap();
        assert_eq!(diff, vec![r(0, 40), r(60, 100)]);
    }

    #[test]
    fn test_find_difference_left_and_right_only() {
        assert_eq!(
            Range::find_difference(&r(0, 100), &r(50, 200)).unwrap(),
            vec![r(0, 50)]
        );
        assert_eq!(
            Range::find_difference(&r(0, 100), &r(0, 50)).unwrap(),
            vec![r(50, 100)]
        );
    }

    #[test]
    fn test_find_difference_no_overlap_returns_input() {
        assert_eq!(
            Range::find_difference(&r(3, 5), &r(10, 20)).unwrap(),
            vec![r(3, 5)]
        );
    }

    #[test]
    fn test_find_difference_point_ranges() {
        // Equal points: exact overlap, nothing left
        assert!(Range::find_difference(&r(5, 5), &r(5, 5)).unwrap().is_empty());
        // Disjoint points: no overlap, input preserved
        assert_eq!(
            Range::find_difference(&r(5, 5), &r(7, 7)).unwrap(),
            vec![r(5, 5)]
        );
    }

    #[test]
    fn test_find_difference_rejects_malformed_range() {
        let malformed = Range::from_explicit_range(9, 3);
        assert!(Range::find_difference(&malformed, &r(0, 10)).is_err());
        assert!(Range::find_difference(&r(0, 10), &malformed).is_err());
    }

    #[test]
    fn test_merge_into_empty_array() {
        assert_eq!(r(3, 7).merge_into_array(&[]), vec![r(3, 7)]);
    }

    #[test]
    fn test_merge_empty_range_is_identity() {
        let sorted = vec![r(0, 2), r(5, 9)];
        assert_eq!(Range::new().merge_into_array(&sorted), sorted);
    }

    #[test]
    fn test_merge_inserts_in_sorted_position() {
        let sorted = vec![r(0, 2), r(10, 12)];
        assert_eq!(
            r(5, 7).merge_into_array(&sorted),
            vec![r(0, 2), r(5, 7), r(10, 12)]
        );
    }

    #[test]
    fn test_merge_absorbs_overlapping_neighbors() {
        let sorted = vec![r(0, 4), r(6, 10), r(20, 30)];
        assert_eq!(
            r(3, 8).merge_into_array(&sorted),
            vec![r(0, 10), r(20, 30)]
        );
    }

    #[test]
    fn test_merge_drops_contained_entries() {
        let sorted = vec![r(5, 7), r(8, 9)];
        assert_eq!(r(0, 20).merge_into_array(&sorted), vec![r(0, 20)]);
    }

    #[test]
    fn test_merge_contained_in_existing_keeps_array() {
        let sorted = vec![r(0, 10), r(20, 30)];
        assert_eq!(r(3, 7).merge_into_array(&sorted), sorted);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let sorted = vec![r(0, 4), r(10, 14)];
        let once = r(2, 12).merge_into_array(&sorted);
        let twice = r(2, 12).merge_into_array(&once);
        assert_eq!(once, twice);
        assert_eq!(once, vec![r(0, 14)]);
    }

    #[test]
    fn test_merge_appends_past_the_end() {
        let sorted = vec![r(0, 2)];
        assert_eq!(r(10, 12).merge_into_array(&sorted), vec![r(0, 2), r(10, 12)]);
    }

    #[test]
    fn test_serde_round_trip() {
        let range = r(3, 9);
        let json = serde_json::to_value(range).unwrap();
        assert_eq!(json, serde_json::json!({"min": 3, "max": 9}));
        let back: Range = serde_json::from_value(json).unwrap();
        assert_eq!(back, range);
    }

    #[test]
    fn test_serde_round_trip_empty() {
        let json = serde_json::to_value(Range::new()).unwrap();
        assert_eq!(json, serde_json::json!({}));
        let back: Range = serde_json::from_value(json).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn test_serde_rejects_half_specified_dict() {
        assert!(serde_json::from_value::<Range>(serde_json::json!({"min": 3})).is_err());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn range_strategy() -> impl Strategy<Value = Range> {
            (0u64..10_000u64)
                .prop_flat_map(|min| (Just(min), min..min.saturating_add(1_000)))
                .prop_map(|(min, max)| Range::from_explicit_range(min, max))
        }

        fn sorted_set_strategy() -> impl Strategy<Value = SortedRangeSet> {
            prop::collection::vec((0u64..10_000u64, 0u64..100u64), 0..8).prop_map(|pairs| {
                let mut set = SortedRangeSet::new();
                for (start, len) in pairs {
                    set = Range::from_explicit_range(start, start + len).merge_into_array(&set);
                }
                set
            })
        }

        proptest! {
            /// Property: intersection is symmetric.
            #[test]
            fn test_intersection_symmetric(a in range_strategy(), b in range_strategy()) {
                prop_assert_eq!(a.find_intersection(&b), b.find_intersection(&a));
            }

            /// Property: merge_into_array keeps the set sorted, disjoint, and minimal.
            #[test]
            fn test_merge_preserves_invariants(set in sorted_set_strategy(), range in range_strategy()) {
                let merged = range.merge_into_array(&set);
                for pair in merged.windows(2) {
                    prop_assert!(pair[0].max().unwrap() < pair[1].min().unwrap(),
                        "set not sorted/disjoint: {:?}", merged);
                    prop_assert!(!pair[0].intersects_range_inclusive(&pair[1]));
                }
                // Every revision of the inserted range is covered
                let min = range.min().unwrap();
                let max = range.max().unwrap();
                for value in [min, max, min + (max - min) / 2] {
                    prop_assert!(merged.iter().any(|r| r.contains_value(value)));
                }
            }

            /// Property: difference remainders never reach inside the subtracted range.
            #[test]
            fn test_difference_outside_interior(a in range_strategy(), b in range_strategy()) {
                let remainders = Range::find_difference(&a, &b).unwrap();
                prop_assert!(remainders.len() <= 2);
                let intersection = a.find_intersection(&b);
                for remainder in &remainders {
                    prop_assert!(remainder.duration() > 0 || intersection.is_empty());
                    prop_assert!(a.contains_range_inclusive(remainder));
                    // Only a shared boundary revision may touch the intersection
                    if !intersection.is_empty() {
                        let overlap = remainder.find_intersection(&intersection);
                        prop_assert!(overlap.duration() == 0);
                    }
                }
            }
        }
    }
}
