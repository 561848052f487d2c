//! Sorted interval set used for temporal pruning
//!
//! Holds disjoint, inclusive `[start, end]` intervals ordered by start. The
//! filtering operations sweep the set once against sorted input and then
//! drop every interval that matched nothing, so the set only ever shrinks
//! while a query moves from one pattern variable to the next.

use crate::query::{QueryError, QueryResult};
use crate::storage::CandidatePair;
use std::fmt;

/// Inclusive time interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
}

impl Interval {
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.end >= start && end >= self.start
    }
}

/// Ordered set of disjoint intervals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    intervals: Vec<Interval>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            intervals: Vec::with_capacity(capacity),
        }
    }

    /// Build the set from timestamp-ordered pairs, each widened to
    /// `[ts + left, ts + right]`.
    pub fn from_pairs(pairs: &[CandidatePair], left: i64, right: i64) -> QueryResult<Self> {
        let mut set = Self::with_capacity(pairs.len());
        for pair in pairs {
            set.insert(
                pair.timestamp.saturating_add(left),
                pair.timestamp.saturating_add(right),
            )?;
        }
        Ok(set)
    }

    /// Append an interval, merging it into the last one when they overlap.
    ///
    /// Starts must be non-decreasing across calls.
    pub fn insert(&mut self, start: i64, end: i64) -> QueryResult<()> {
        if end < start {
            return Err(QueryError::IllegalInterval {
                start,
                end,
                reason: "end before start",
            });
        }
        match self.intervals.last_mut() {
            Some(last) if start < last.start => Err(QueryError::IllegalInterval {
                start,
                end,
                reason: "start before previous start",
            }),
            Some(last) if start <= last.end => {
                last.end = last.end.max(end);
                Ok(())
            }
            _ => {
                self.intervals.push(Interval { start, end });
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// Whether `point` falls in any interval
    pub fn includes(&self, point: i64) -> bool {
        for interval in &self.intervals {
            if point < interval.start {
                return false;
            }
            if point <= interval.end {
                return true;
            }
        }
        false
    }

    /// Whether `[start, end]` overlaps any interval
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        let idx = self.intervals.partition_point(|iv| iv.end < start);
        self.intervals
            .get(idx)
            .is_some_and(|iv| iv.overlaps(start, end))
    }

    /// Overlap test for parallel `starts`/`ends` arrays in any order.
    /// Leaves the set unchanged.
    pub fn overlaps_ranges(&self, starts: &[i64], ends: &[i64]) -> Vec<bool> {
        starts
            .iter()
            .zip(ends)
            .map(|(&start, &end)| start <= end && self.overlaps(start, end))
            .collect()
    }

    /// Flag which of the sorted `timestamps` fall in the set, then drop
    /// intervals that held none of them.
    pub fn contains_sorted(&mut self, timestamps: &[i64]) -> Vec<bool> {
        let mut hit = vec![false; self.intervals.len()];
        let contained = self.sweep_points(timestamps.iter().copied(), &mut hit);
        self.reconstruct(&hit);
        contained
    }

    /// Keep the pairs (ordered by timestamp) that fall in the set, then drop
    /// intervals that held none of them.
    pub fn update_and_filter(&mut self, pairs: &[CandidatePair]) -> Vec<CandidatePair> {
        let mut hit = vec![false; self.intervals.len()];
        let contained = self.sweep_points(pairs.iter().map(|p| p.timestamp), &mut hit);
        self.reconstruct(&hit);
        pairs
            .iter()
            .zip(contained)
            .filter_map(|(pair, keep)| keep.then_some(*pair))
            .collect()
    }

    /// Flag which ranges (ordered by start) overlap the set, then drop
    /// intervals that no range touched.
    pub fn retain_overlapping(&mut self, ranges: &[(i64, i64)]) -> QueryResult<Vec<bool>> {
        let mut hit = vec![false; self.intervals.len()];
        let mut overlapping = vec![false; ranges.len()];
        let mut cursor = 0;
        let mut previous_start = i64::MIN;

        for (k, &(start, end)) in ranges.iter().enumerate() {
            if end < start || start < previous_start {
                return Err(QueryError::IllegalInterval {
                    start,
                    end,
                    reason: "ranges must be well formed and ordered by start",
                });
            }
            previous_start = start;

            while cursor < self.intervals.len() && self.intervals[cursor].end < start {
                cursor += 1;
            }
            let mut pos = cursor;
            while pos < self.intervals.len() && self.intervals[pos].start <= end {
                hit[pos] = true;
                overlapping[k] = true;
                pos += 1;
            }
        }

        self.reconstruct(&hit);
        Ok(overlapping)
    }

    fn sweep_points(&self, points: impl Iterator<Item = i64>, hit: &mut [bool]) -> Vec<bool> {
        let mut contained = Vec::with_capacity(points.size_hint().0);
        let mut cursor = 0;
        for t in points {
            while cursor < self.intervals.len() && self.intervals[cursor].end < t {
                cursor += 1;
            }
            let inside = cursor < self.intervals.len() && t >= self.intervals[cursor].start;
            if inside {
                hit[cursor] = true;
            }
            contained.push(inside);
        }
        contained
    }

    fn reconstruct(&mut self, hit: &[bool]) {
        let mut flags = hit.iter();
        self.intervals
            .retain(|_| flags.next().copied().unwrap_or(false));
    }
}

impl fmt::Display for IntervalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} intervals:", self.intervals.len())?;
        for iv in &self.intervals {
            write!(f, " [{},{}]", iv.start, iv.end)?;
        }
        Ok(())
    }
}
