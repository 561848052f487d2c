//! Downstream consumer of the filtered event stream
//!
//! The index only narrows the stream; deciding which candidates actually
//! form matches belongs to a pattern matcher fed one decoded record at a time
//! in `(timestamp, rid)` order.

use crate::storage::{EventSchema, Value};

pub trait PatternMatcher {
    /// Feed the next candidate record
    fn consume(&mut self, schema: &EventSchema, record: Vec<Value>);

    /// Number of matches found so far
    fn count(&self) -> usize;

    /// Matched tuples, one record list per match
    fn tuples(&self) -> Vec<Vec<Vec<Value>>>;
}

/// Treats every candidate as a single-event match
#[derive(Debug, Default)]
pub struct CandidateCollector {
    records: Vec<Vec<Value>>,
}

impl CandidateCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[Vec<Value>] {
        &self.records
    }
}

impl PatternMatcher for CandidateCollector {
    fn consume(&mut self, _schema: &EventSchema, record: Vec<Value>) {
        self.records.push(record);
    }

    fn count(&self) -> usize {
        self.records.len()
    }

    fn tuples(&self) -> Vec<Vec<Vec<Value>>> {
        self.records.iter().map(|r| vec![r.clone()]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_counts() {
        let schema = EventSchema::new("s", &[("k", "TYPE"), ("t", "TIMESTAMP")]).unwrap();
        let mut collector = CandidateCollector::new();
        collector.consume(&schema, vec![Value::Type(1), Value::Timestamp(5)]);
        collector.consume(&schema, vec![Value::Type(2), Value::Timestamp(6)]);
        assert_eq!(collector.count(), 2);
        assert_eq!(collector.tuples()[1], vec![vec![Value::Type(2), Value::Timestamp(6)]]);
    }
}
