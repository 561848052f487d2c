//! Value predicates and candidate-list merging
//!
//! A [`Predicate`] is one bounded range on one indexed attribute, in the
//! scaled integer domain. The same predicate is evaluated three ways: exactly
//! against buffered values, against a cluster's zone map, and against a
//! block's range bitmap after translation to the cluster's base value.

use crate::index::range_bitmap::RangeBitmap;
use crate::index::synopsis::ClusterSummary;
use crate::query::{QueryError, QueryResult};
use crate::storage::CandidatePair;
use roaring::RoaringBitmap;
use std::cmp::Ordering;

/// Which bounds a predicate carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PredicateKind {
    HasMin = 1,
    HasMax = 2,
    HasBoth = 3,
}

impl TryFrom<u8> for PredicateKind {
    type Error = QueryError;

    fn try_from(mark: u8) -> Result<Self, Self::Error> {
        match mark {
            1 => Ok(PredicateKind::HasMin),
            2 => Ok(PredicateKind::HasMax),
            3 => Ok(PredicateKind::HasBoth),
            other => Err(QueryError::InvalidPredicateKind(other)),
        }
    }
}

/// Range predicate on one indexed attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Predicate {
    /// Position of the attribute among the indexed attributes
    pub attr: usize,
    pub kind: PredicateKind,
    /// Inclusive lower bound, `i64::MIN` when absent
    pub min: i64,
    /// Inclusive upper bound, `i64::MAX` when absent
    pub max: i64,
}

impl Predicate {
    /// Build a predicate from optional bounds
    pub fn new(attr: usize, min: Option<i64>, max: Option<i64>) -> QueryResult<Self> {
        let mark = (min.is_some() as u8) | ((max.is_some() as u8) << 1);
        let predicate = Self::from_mark(attr, mark, min.unwrap_or(i64::MIN), max.unwrap_or(i64::MAX))?;
        if predicate.min > predicate.max {
            return Err(QueryError::InvalidConstraint(format!(
                "empty range [{}, {}] on attribute {}",
                predicate.min, predicate.max, attr
            )));
        }
        Ok(predicate)
    }

    /// Build a predicate from its numeric mark (1 has-min, 2 has-max, 3 has-both)
    pub fn from_mark(attr: usize, mark: u8, min: i64, max: i64) -> QueryResult<Self> {
        let kind = PredicateKind::try_from(mark)?;
        Ok(match kind {
            PredicateKind::HasMin => Self { attr, kind, min, max: i64::MAX },
            PredicateKind::HasMax => Self { attr, kind, min: i64::MIN, max },
            PredicateKind::HasBoth => Self { attr, kind, min, max },
        })
    }

    /// Exact test against an attribute value
    pub fn matches(&self, value: i64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Test a full row of indexed values
    pub fn matches_row(&self, values: &[i64]) -> bool {
        values.get(self.attr).is_some_and(|&v| self.matches(v))
    }

    /// Zone-map check: can the cluster hold a matching value
    pub fn may_match(&self, summary: &ClusterSummary) -> bool {
        summary.may_contain(self.attr, self.min, self.max)
    }

    /// Shift the bounds into a cluster's `value - base` domain
    ///
    /// Offsets in a cluster reach up to `u64::MAX`, so the shift is exact in
    /// `i128` rather than saturating at the `i64` range.
    pub fn relative_to(&self, base: i64) -> RelativePredicate {
        let shift = |bound: i64| i128::from(bound) - i128::from(base);
        RelativePredicate {
            kind: self.kind,
            min: shift(self.min),
            max: shift(self.max),
        }
    }
}

/// A [`Predicate`] against the offsets stored in one cluster's range bitmap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativePredicate {
    pub kind: PredicateKind,
    pub min: i128,
    pub max: i128,
}

impl RelativePredicate {
    /// Rows of `bitmap` satisfying the predicate, restricted to `context`
    pub fn evaluate(&self, bitmap: &RangeBitmap, context: Option<&RoaringBitmap>) -> RoaringBitmap {
        match self.kind {
            PredicateKind::HasMin => bitmap.gte(self.min, context),
            PredicateKind::HasMax => bitmap.lte(self.max, context),
            PredicateKind::HasBoth => bitmap.between(self.min, self.max, context),
        }
    }
}

/// Merge two `(timestamp, rid)`-ordered lists, keeping one copy of equal pairs
pub fn merge_pairs(left: &[CandidatePair], right: &[CandidatePair]) -> Vec<CandidatePair> {
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        match left[i].cmp(&right[j]) {
            Ordering::Less => {
                merged.push(left[i]);
                i += 1;
            }
            Ordering::Greater => {
                merged.push(right[j]);
                j += 1;
            }
            Ordering::Equal => {
                merged.push(left[i]);
                i += 1;
                j += 1;
            }
        }
    }
    merged.extend_from_slice(&left[i..]);
    merged.extend_from_slice(&right[j..]);
    merged
}

/// Remove candidates whose timestamp equals a tombstone's
///
/// Both lists must be ordered by timestamp.
pub fn drop_tombstoned(matched: Vec<CandidatePair>, tombstones: &[CandidatePair]) -> Vec<CandidatePair> {
    if tombstones.is_empty() {
        return matched;
    }
    let mut cursor = 0;
    matched
        .into_iter()
        .filter(|pair| {
            while cursor < tombstones.len() && tombstones[cursor].timestamp < pair.timestamp {
                cursor += 1;
            }
            !(cursor < tombstones.len() && tombstones[cursor].timestamp == pair.timestamp)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::range_bitmap::RangeBitmapAppender;
    use crate::storage::Rid;

    fn pair(ts: i64, page: u32) -> CandidatePair {
        CandidatePair::new(ts, Rid::new(page, 0))
    }

    #[test]
    fn test_predicate_marks() {
        let p = Predicate::new(0, Some(5), None).unwrap();
        assert_eq!(p.kind, PredicateKind::HasMin);
        assert!(p.matches(5) && p.matches(i64::MAX) && !p.matches(4));

        let p = Predicate::new(1, None, Some(9)).unwrap();
        assert_eq!(p.kind, PredicateKind::HasMax);

        let p = Predicate::new(2, Some(1), Some(9)).unwrap();
        assert_eq!(p.kind, PredicateKind::HasBoth);

        assert!(matches!(
            Predicate::new(0, None, None),
            Err(QueryError::InvalidPredicateKind(0))
        ));
        assert!(matches!(
            Predicate::from_mark(0, 4, 0, 1),
            Err(QueryError::InvalidPredicateKind(4))
        ));
        assert!(matches!(
            Predicate::new(0, Some(10), Some(1)),
            Err(QueryError::InvalidConstraint(_))
        ));
    }

    #[test]
    fn test_relative_bounds_do_not_saturate() {
        let p = Predicate::new(0, Some(i64::MIN + 1), Some(100)).unwrap();
        let shifted = p.relative_to(50);
        assert_eq!(shifted.min, i128::from(i64::MIN) - 49);
        assert_eq!(shifted.max, 50);

        let open = Predicate::new(0, Some(60), None).unwrap().relative_to(50);
        assert_eq!(open.min, 10);

        let wide = Predicate::new(0, None, Some(10)).unwrap().relative_to(i64::MIN);
        assert_eq!(wide.max, (1i128 << 63) + 10);
    }

    #[test]
    fn test_evaluate_across_full_i64_spread() {
        // a cluster holding both ends of the i64 range
        let values = [i64::MIN, -5, 10, i64::MAX];
        let base = i64::MIN;
        let mut appender = RangeBitmapAppender::new();
        for v in values {
            appender.add(v.wrapping_sub(base) as u64);
        }
        let bitmap = appender.finish();

        let rows = |p: Predicate| -> Vec<u32> {
            p.relative_to(base).evaluate(&bitmap, None).iter().collect()
        };
        assert_eq!(rows(Predicate::new(0, None, Some(10)).unwrap()), vec![0, 1, 2]);
        assert_eq!(rows(Predicate::new(0, Some(11), None).unwrap()), vec![3]);
        assert_eq!(rows(Predicate::new(0, Some(-5), Some(10)).unwrap()), vec![1, 2]);
        assert_eq!(rows(Predicate::new(0, Some(i64::MAX), None).unwrap()), vec![3]);
        for (row, &v) in values.iter().enumerate() {
            let exact = Predicate::new(0, Some(v), Some(v)).unwrap();
            assert_eq!(rows(exact), vec![row as u32]);
        }
    }

    #[test]
    fn test_evaluate_on_bitmap() {
        let mut appender = RangeBitmapAppender::new();
        for v in [0u64, 10, 20, 30, 40] {
            appender.add(v);
        }
        let bitmap = appender.finish();

        // values stored against base 100
        let p = Predicate::new(0, Some(115), Some(135)).unwrap().relative_to(100);
        let rows: Vec<u32> = p.evaluate(&bitmap, None).iter().collect();
        assert_eq!(rows, vec![2, 3]);

        let below = Predicate::new(0, None, Some(50)).unwrap().relative_to(100);
        assert!(below.evaluate(&bitmap, None).is_empty());
    }

    #[test]
    fn test_merge_pairs_dedups() {
        let left = vec![pair(1, 0), pair(3, 0), pair(5, 0)];
        let right = vec![pair(2, 0), pair(3, 0), pair(5, 1)];
        assert_eq!(
            merge_pairs(&left, &right),
            vec![pair(1, 0), pair(2, 0), pair(3, 0), pair(5, 0), pair(5, 1)]
        );
        assert_eq!(merge_pairs(&[], &right), right);
    }

    #[test]
    fn test_drop_tombstoned() {
        let matched = vec![pair(1, 0), pair(2, 0), pair(2, 1), pair(4, 0), pair(7, 0)];
        let tombstones = vec![pair(2, 9), pair(5, 9), pair(7, 9)];
        assert_eq!(
            drop_tombstoned(matched, &tombstones),
            vec![pair(1, 0), pair(4, 0)]
        );
    }
}
