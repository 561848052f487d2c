//! Buffer pool: per-type staging of events before they become a block
//!
//! A single pool-wide counter drives flushing. When it reaches `capacity`
//! every buffered type becomes one cluster of a new index block, in
//! ascending type-id order, and the pool is emptied.
//!
//! Flush pipeline per type:
//! ```text
//! triples ─[sort by ts if unordered]─┬─ value - min ──→ range bitmap appenders
//!                                    ├─ tombstones  ──→ deletion bitmap
//!                                    ├─ ts, rid     ──→ cluster stream
//!                                    └─ time/value ranges → ClusterSummary
//! ```

use crate::index::range_bitmap::RangeBitmapAppender;
use crate::index::synopsis::{ClusterSummary, SynopsisTable};
use crate::query::Predicate;
use crate::storage::block::{BlockBuilder, ClusterStream, EncodedBlock};
use crate::storage::{BufferedTriple, Candidates, StorageError, StorageResult};
use roaring::RoaringBitmap;
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Buffered events of one type
#[derive(Debug)]
struct TypeBuffer {
    triples: Vec<BufferedTriple>,
    /// Arrivals so far are in timestamp order
    ordered: bool,
    last_timestamp: i64,
}

impl TypeBuffer {
    fn new() -> Self {
        Self {
            triples: Vec::new(),
            ordered: true,
            last_timestamp: i64::MIN,
        }
    }
}

/// In-memory staging area shared by all event types
#[derive(Debug)]
pub struct BufferPool {
    capacity: usize,
    attr_count: usize,
    builder: BlockBuilder,
    buffers: BTreeMap<u32, TypeBuffer>,
    count: usize,
}

impl BufferPool {
    pub fn new(capacity: usize, attr_count: usize, builder: BlockBuilder) -> Self {
        Self {
            capacity,
            attr_count,
            builder,
            buffers: BTreeMap::new(),
            count: 0,
        }
    }

    /// Buffered events across all types
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffer one event. Returns the encoded block when this insert filled
    /// the pool; its summaries are already registered with `synopsis`.
    pub fn insert(
        &mut self,
        ordered_hint: bool,
        type_id: u32,
        block_id: u32,
        triple: BufferedTriple,
        synopsis: &mut SynopsisTable,
    ) -> StorageResult<Option<EncodedBlock>> {
        if triple.values.len() != self.attr_count {
            return Err(StorageError::InvalidRow(format!(
                "expected {} indexed values, got {}",
                self.attr_count,
                triple.values.len()
            )));
        }

        let buffer = self.buffers.entry(type_id).or_insert_with(TypeBuffer::new);
        buffer.ordered = buffer.ordered && ordered_hint && triple.timestamp >= buffer.last_timestamp;
        buffer.last_timestamp = triple.timestamp;
        buffer.triples.push(triple);
        self.count += 1;

        if self.count >= self.capacity {
            return self.flush(block_id, synopsis);
        }
        Ok(None)
    }

    /// Turn everything buffered into one block, even below capacity
    ///
    /// A failed build leaves the buffered events and the synopsis untouched,
    /// so every later insert retries the same flush. Callers treat the error
    /// as fatal for the index.
    pub fn flush(
        &mut self,
        block_id: u32,
        synopsis: &mut SynopsisTable,
    ) -> StorageResult<Option<EncodedBlock>> {
        if self.count == 0 {
            return Ok(None);
        }

        let mut appenders = vec![RangeBitmapAppender::new(); self.attr_count];
        let mut deletions = RoaringBitmap::new();
        let mut clusters = Vec::with_capacity(self.buffers.len());
        let mut summaries = Vec::with_capacity(self.buffers.len());
        let mut start = 0u32;

        for (&type_id, buffer) in self.buffers.iter_mut() {
            let triples = &mut buffer.triples;
            if triples.is_empty() {
                continue;
            }
            if !buffer.ordered {
                // stable: equal timestamps keep arrival order
                triples.sort_by_key(|t| t.timestamp);
            }

            let mut min_values = vec![i64::MAX; self.attr_count];
            let mut max_values = vec![i64::MIN; self.attr_count];
            for triple in triples.iter() {
                for (k, &v) in triple.values.iter().enumerate() {
                    min_values[k] = min_values[k].min(v);
                    max_values[k] = max_values[k].max(v);
                }
            }

            let mut stream = ClusterStream::with_capacity(triples.len());
            for (i, triple) in triples.iter().enumerate() {
                for (k, appender) in appenders.iter_mut().enumerate() {
                    appender.add(triple.values[k].wrapping_sub(min_values[k]) as u64);
                }
                if triple.tombstone {
                    deletions.insert(start + i as u32);
                }
                stream.push(triple.timestamp, triple.rid.to_key());
            }

            let count = triples.len() as u32;
            summaries.push((
                type_id,
                ClusterSummary {
                    block_id,
                    cluster_id: clusters.len() as u32,
                    start,
                    count,
                    start_time: stream.timestamps[0],
                    end_time: stream.timestamps[stream.len() - 1],
                    min_values,
                    max_values,
                },
            ));
            clusters.push(stream);
            start += count;
        }

        let block = self
            .builder
            .build(&appenders, &deletions, &clusters)
            .map_err(|e| {
                error!(block_id, events = self.count, error = %e, "Block build failed");
                e
            })?;

        debug!(
            block_id,
            events = self.count,
            clusters = summaries.len(),
            tombstones = deletions.len(),
            bytes = block.bytes.len(),
            "Buffer pool flushed"
        );

        synopsis.register_batch(summaries);
        self.buffers.clear();
        self.count = 0;
        Ok(Some(block))
    }

    /// Unflushed events of `type_id` satisfying every predicate, ordered by
    /// `(timestamp, rid)`
    pub fn query(&self, type_id: u32, predicates: &[Predicate]) -> Candidates {
        let mut candidates = Candidates::new();
        let Some(buffer) = self.buffers.get(&type_id) else {
            return candidates;
        };

        for triple in &buffer.triples {
            if predicates.iter().all(|p| p.matches_row(&triple.values)) {
                if triple.tombstone {
                    candidates.tombstones.push(triple.pair());
                } else {
                    candidates.matched.push(triple.pair());
                }
            }
        }
        if !buffer.ordered {
            candidates.matched.sort_unstable();
            candidates.tombstones.sort_unstable();
        }
        candidates
    }
}
