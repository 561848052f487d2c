//! Synopsis table - in-memory zone map over flushed clusters
//!
//! Maps event type → ordered list of cluster summaries. Entries arrive in
//! flush order, which is also time order, and are never updated or removed.
//!
//! # Usage
//! ```ignore
//! // before touching disk for variable "v1" of type 3:
//! let (starts, ends) = synopsis.time_ranges(3);
//! let mask = intervals.overlaps_ranges(&starts, &ends);
//! let clusters = synopsis.select(3, &mask)?; // only these are mapped
//! ```

use crate::query::{QueryError, QueryResult};
use std::collections::HashMap;

/// Summary of one cluster: the rows of one event type inside one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSummary {
    /// Block the cluster was flushed into
    pub block_id: u32,
    /// Position of this cluster among the block's clusters
    pub cluster_id: u32,
    /// First row of the cluster within the block
    pub start: u32,
    /// Number of rows
    pub count: u32,
    pub start_time: i64,
    pub end_time: i64,
    /// Per indexed attribute minimum (also the base values are stored against)
    pub min_values: Vec<i64>,
    /// Per indexed attribute maximum
    pub max_values: Vec<i64>,
}

impl ClusterSummary {
    /// Row range `[start, start + count)` within the block
    pub fn rows(&self) -> std::ops::Range<u32> {
        self.start..self.start + self.count
    }

    /// Whether attribute `idx` can hold any value in `[min, max]`
    pub fn may_contain(&self, idx: usize, min: i64, max: i64) -> bool {
        match (self.min_values.get(idx), self.max_values.get(idx)) {
            (Some(&lo), Some(&hi)) => hi >= min && lo <= max,
            _ => false,
        }
    }
}

/// Append-only catalog of cluster summaries per event type
#[derive(Debug, Default)]
pub struct SynopsisTable {
    entries: HashMap<u32, Vec<ClusterSummary>>,
    cluster_count: usize,
}

impl SynopsisTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the summaries produced by one flush
    pub fn register(&mut self, type_id: u32, summary: ClusterSummary) {
        self.entries.entry(type_id).or_default().push(summary);
        self.cluster_count += 1;
    }

    /// Register a batch of `(type_id, summary)` pairs
    pub fn register_batch(&mut self, batch: impl IntoIterator<Item = (u32, ClusterSummary)>) {
        for (type_id, summary) in batch {
            self.register(type_id, summary);
        }
    }

    /// All summaries for a type, in flush order
    pub fn clusters(&self, type_id: u32) -> &[ClusterSummary] {
        self.entries
            .get(&type_id)
            .map(|v| v.as_slice())
            .unwrap_or_default()
    }

    /// Parallel start/end time arrays for a type
    pub fn time_ranges(&self, type_id: u32) -> (Vec<i64>, Vec<i64>) {
        self.clusters(type_id)
            .iter()
            .map(|c| (c.start_time, c.end_time))
            .unzip()
    }

    /// Summaries whose mask entry is set
    ///
    /// The mask must be aligned with [`SynopsisTable::clusters`] for the
    /// same type, as produced from [`SynopsisTable::time_ranges`].
    pub fn select(&self, type_id: u32, mask: &[bool]) -> QueryResult<Vec<&ClusterSummary>> {
        let clusters = self.clusters(type_id);
        if clusters.len() != mask.len() {
            return Err(QueryError::MaskMismatch {
                expected: clusters.len(),
                actual: mask.len(),
            });
        }
        Ok(clusters
            .iter()
            .zip(mask)
            .filter_map(|(c, &keep)| keep.then_some(c))
            .collect())
    }

    /// Number of event types with at least one cluster
    pub fn type_count(&self) -> usize {
        self.entries.len()
    }

    /// Total number of registered clusters
    pub fn cluster_count(&self) -> usize {
        self.cluster_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(block_id: u32, start: u32, count: u32, start_time: i64, end_time: i64) -> ClusterSummary {
        ClusterSummary {
            block_id,
            cluster_id: 0,
            start,
            count,
            start_time,
            end_time,
            min_values: vec![10],
            max_values: vec![20],
        }
    }

    #[test]
    fn test_register_and_fetch() {
        let mut table = SynopsisTable::new();
        table.register(1, summary(0, 0, 5, 0, 50));
        table.register(2, summary(0, 5, 3, 10, 40));
        table.register(1, summary(1, 0, 8, 60, 90));

        assert_eq!(table.clusters(1).len(), 2);
        assert_eq!(table.clusters(2).len(), 1);
        assert!(table.clusters(7).is_empty());
        assert_eq!(table.cluster_count(), 3);
        assert_eq!(table.type_count(), 2);

        let (starts, ends) = table.time_ranges(1);
        assert_eq!(starts, vec![0, 60]);
        assert_eq!(ends, vec![50, 90]);
    }

    #[test]
    fn test_select_with_mask() {
        let mut table = SynopsisTable::new();
        table.register_batch(vec![
            (1, summary(0, 0, 5, 0, 50)),
            (1, summary(1, 0, 5, 51, 99)),
            (1, summary(2, 0, 5, 100, 150)),
        ]);

        let chosen = table.select(1, &[true, false, true]).unwrap();
        let blocks: Vec<u32> = chosen.iter().map(|c| c.block_id).collect();
        assert_eq!(blocks, vec![0, 2]);

        let err = table.select(1, &[true]).unwrap_err();
        assert!(matches!(err, QueryError::MaskMismatch { expected: 3, actual: 1 }));
    }

    #[test]
    fn test_zone_map_check() {
        let s = summary(0, 0, 5, 0, 50);
        assert!(s.may_contain(0, 15, 30));
        assert!(s.may_contain(0, i64::MIN, 10));
        assert!(!s.may_contain(0, 21, i64::MAX));
        assert!(!s.may_contain(0, i64::MIN, 9));
        assert!(!s.may_contain(3, 0, 100));
        assert_eq!(s.rows(), 0..5);
    }
}
