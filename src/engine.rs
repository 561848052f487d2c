//! ACER index engine
//!
//! Ties the components together:
//! - Write path: raw row → schema → sampler + record store → buffer pool → index block
//! - Read path: pattern → selectivity order → synopsis pruning → mapped clusters
//!   + buffer pool → interval pruning → merged candidate stream
//!
//! All calls are blocking and take `&mut self`; callers that share an index
//! across threads serialize access themselves.

use crate::config::IndexConfig;
use crate::index::{BufferPool, ReservoirSampler, SynopsisTable};
use crate::query::{
    drop_tombstoned, merge_pairs, IntervalSet, Pattern, PatternMatcher, Predicate, QueryResult,
};
use crate::storage::{
    BlockBuilder, BufferedTriple, CandidatePair, Candidates, EventSchema, IndexFile,
    IndexedAttributes, PagedRecordStore, ReadOptions, RecordStore, Rid, StorageResult, Value,
};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Capability interface of an event index
pub trait EventIndex {
    /// Insert one comma-separated raw row
    fn insert(&mut self, row: &str, is_update: bool) -> StorageResult<Rid>;

    /// Insert rows in order, stopping at the first error
    fn insert_batch(&mut self, rows: &[&str], is_update: bool) -> StorageResult<()>;

    /// Feed the candidates of `pattern` to `matcher` and return its match count
    fn query_count(&mut self, pattern: &Pattern, matcher: &mut dyn PatternMatcher)
        -> QueryResult<usize>;

    /// Feed the candidates of `pattern` to `matcher` and return its tuples
    fn query_tuples(
        &mut self,
        pattern: &Pattern,
        matcher: &mut dyn PatternMatcher,
    ) -> QueryResult<Vec<Vec<Vec<Value>>>>;
}

/// One pattern variable, ready to resolve
#[derive(Debug)]
struct VariablePlan {
    position: usize,
    /// `None` when no event of the type has arrived yet
    type_id: Option<u32>,
    predicates: Vec<Predicate>,
    selectivity: f64,
}

impl VariablePlan {
    /// Distinct attribute positions the predicates touch
    fn attrs(&self) -> Vec<usize> {
        let mut attrs: Vec<usize> = self.predicates.iter().map(|p| p.attr).collect();
        attrs.sort_unstable();
        attrs.dedup();
        attrs
    }
}

/// ACER index over one event schema
pub struct AcerIndex<S: RecordStore = PagedRecordStore> {
    config: IndexConfig,
    schema: EventSchema,
    indexed: IndexedAttributes,
    store: S,
    index_file: IndexFile,
    pool: BufferPool,
    synopsis: SynopsisTable,
    sampler: ReservoirSampler,
    type_counts: HashMap<u32, u64>,
    event_count: u64,
    tombstone_count: u64,
    ordered: bool,
    last_timestamp: i64,
}

impl AcerIndex<PagedRecordStore> {
    /// Create an index under `config.data_dir` with range bitmaps on
    /// the `indexed` attributes
    pub fn create(config: IndexConfig, schema: EventSchema, indexed: &[&str]) -> StorageResult<Self> {
        std::fs::create_dir_all(config.data_path())?;
        let store = PagedRecordStore::create(
            config.data_path(),
            schema.name(),
            config.page_size,
            schema.record_size(),
        )?;
        Self::with_store(config, schema, indexed, store)
    }
}

impl<S: RecordStore> AcerIndex<S> {
    /// Create an index that keeps its records in `store`
    pub fn with_store(
        config: IndexConfig,
        schema: EventSchema,
        indexed: &[&str],
        store: S,
    ) -> StorageResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(config.data_path())?;

        let indexed = schema.index_on(indexed)?;
        let index_file = IndexFile::create(config.data_path(), &config.name)?;
        let pool = BufferPool::new(
            config.capacity,
            indexed.len(),
            BlockBuilder::new(config.layout, config.codec),
        );
        let sampler = ReservoirSampler::new(indexed.len(), config.sample_capacity, config.sample_seed);

        info!(
            path = %index_file.path().display(),
            schema = schema.name(),
            indexed = ?indexed.names(),
            capacity = config.capacity,
            layout = %config.layout,
            codec = %config.codec,
            "Created ACER index"
        );

        Ok(Self {
            config,
            schema,
            indexed,
            store,
            index_file,
            pool,
            synopsis: SynopsisTable::new(),
            sampler,
            type_counts: HashMap::new(),
            event_count: 0,
            tombstone_count: 0,
            ordered: true,
            last_timestamp: i64::MIN,
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn schema(&self) -> &EventSchema {
        &self.schema
    }

    pub fn indexed(&self) -> &IndexedAttributes {
        &self.indexed
    }

    /// Insert a raw row; `is_update` stores it as a tombstone for the
    /// earlier event of the same type and timestamp
    pub fn insert(&mut self, row: &str, is_update: bool) -> StorageResult<Rid> {
        let parsed = self.schema.parse_row(row)?;
        let values = self.indexed.extract(&self.schema, &parsed)?;

        let ordered = self.ordered && parsed.timestamp >= self.last_timestamp;

        let rid = self.store.insert(&parsed.record)?;
        let triple =
            BufferedTriple::new(parsed.timestamp, rid, values.clone()).tombstone(is_update);
        let block_id = self.index_file.next_block_id();
        if let Some(block) =
            self.pool
                .insert(ordered, parsed.type_id, block_id, triple, &mut self.synopsis)?
        {
            self.index_file.append(block)?;
        }

        // counters move only once the event is stored and buffered
        if self.ordered && !ordered {
            warn!(
                timestamp = parsed.timestamp,
                previous = self.last_timestamp,
                "Out-of-order arrival, buffers will be sorted before flush"
            );
        }
        self.ordered = ordered;
        self.last_timestamp = parsed.timestamp;
        self.sampler.sample(&values, self.event_count);
        *self.type_counts.entry(parsed.type_id).or_insert(0) += 1;
        self.event_count += 1;
        if is_update {
            self.tombstone_count += 1;
        }
        Ok(rid)
    }

    /// Insert rows in order, stopping at the first error
    pub fn insert_batch<'a>(
        &mut self,
        rows: impl IntoIterator<Item = &'a str>,
        is_update: bool,
    ) -> StorageResult<()> {
        for row in rows {
            self.insert(row, is_update)?;
        }
        Ok(())
    }

    /// Write every buffered event into a block, even below capacity
    pub fn flush(&mut self) -> StorageResult<()> {
        let block_id = self.index_file.next_block_id();
        if let Some(block) = self.pool.flush(block_id, &mut self.synopsis)? {
            self.index_file.append(block)?;
        }
        Ok(())
    }

    /// Raw record bytes of an event
    pub fn read_record(&mut self, rid: Rid) -> StorageResult<Vec<u8>> {
        self.store.read(rid)
    }

    /// Candidate events of `pattern`, ordered by `(timestamp, rid)`
    ///
    /// The result is a superset of the events taking part in a match and
    /// never contains tombstones.
    pub fn query(&mut self, pattern: &Pattern) -> QueryResult<Vec<CandidatePair>> {
        pattern.validate()?;

        let mut plans = Vec::with_capacity(pattern.variables.len());
        for (position, variable) in pattern.variables.iter().enumerate() {
            let predicates = pattern.predicates(position, &self.schema, &self.indexed)?;
            let type_id = self.schema.lookup_type(&variable.event_type);
            let selectivity = self.estimate(type_id, &predicates);
            plans.push(VariablePlan {
                position,
                type_id,
                predicates,
                selectivity,
            });
        }
        // stable: ties keep pattern order
        plans.sort_by(|a, b| a.selectivity.total_cmp(&b.selectivity));

        let Some((first, rest)) = plans.split_first() else {
            return Ok(Vec::new());
        };

        let matched = self.resolve(first, None)?;
        debug!(
            variable = %pattern.variables[first.position].name,
            selectivity = first.selectivity,
            candidates = matched.len(),
            "Resolved most selective variable"
        );
        if matched.is_empty() {
            return Ok(Vec::new());
        }

        let (left, right) = pattern.interval_offsets(first.position);
        let mut intervals = IntervalSet::from_pairs(&matched, left, right)?;
        let mut retained: Vec<Vec<CandidatePair>> = vec![Vec::new(); pattern.variables.len()];
        retained[first.position] = matched;

        for plan in rest {
            let candidates = self.resolve(plan, Some(&intervals))?;
            let kept = intervals.update_and_filter(&candidates);
            debug!(
                variable = %pattern.variables[plan.position].name,
                selectivity = plan.selectivity,
                candidates = candidates.len(),
                kept = kept.len(),
                intervals = intervals.len(),
                "Filtered variable through interval set"
            );
            if kept.is_empty() {
                return Ok(Vec::new());
            }
            retained[plan.position] = kept;
        }

        let mut result = Vec::new();
        for list in &retained {
            let kept = intervals.update_and_filter(list);
            result = merge_pairs(&result, &kept);
        }
        debug!(candidates = result.len(), intervals = intervals.len(), "Query complete");
        Ok(result)
    }

    /// Estimated fraction of all events matching one variable
    fn estimate(&self, type_id: Option<u32>, predicates: &[Predicate]) -> f64 {
        let Some(type_id) = type_id else {
            return 0.0;
        };
        if self.event_count == 0 {
            return 0.0;
        }
        let arrivals = self.type_counts.get(&type_id).copied().unwrap_or(0);
        let share = arrivals as f64 / self.event_count as f64;
        predicates
            .iter()
            .fold(share, |acc, p| acc * self.sampler.selectivity(p.attr, p.min, p.max))
    }

    /// All live events of one variable, from disk and the buffer pool.
    /// With `window` set, only clusters overlapping it are read.
    fn resolve(
        &mut self,
        plan: &VariablePlan,
        window: Option<&IntervalSet>,
    ) -> QueryResult<Vec<CandidatePair>> {
        let Some(type_id) = plan.type_id else {
            return Ok(Vec::new());
        };
        let options = ReadOptions {
            mode: self.config.read_mode,
            truncate: self.config.truncate,
        };
        let attrs = plan.attrs();

        let clusters = match window {
            Some(set) => {
                let (starts, ends) = self.synopsis.time_ranges(type_id);
                let mask = set.overlaps_ranges(&starts, &ends);
                self.synopsis.select(type_id, &mask)?
            }
            None => self.synopsis.clusters(type_id).iter().collect(),
        };

        let mut disk = Candidates::new();
        let mut pruned = 0usize;
        let mut read = 0usize;
        for summary in clusters {
            if !plan.predicates.iter().all(|p| p.may_match(summary)) {
                pruned += 1;
                continue;
            }
            let cluster = self.index_file.read_cluster(summary, &attrs, options)?;
            let found = cluster.query(&plan.predicates)?;
            disk.matched.extend(found.matched);
            disk.tombstones.extend(found.tombstones);
            read += 1;
        }
        // clusters of out-of-order data may overlap in time
        disk.matched.sort_unstable();
        disk.tombstones.sort_unstable();

        let buffered = self.pool.query(type_id, &plan.predicates);
        let matched = merge_pairs(&disk.matched, &buffered.matched);
        let tombstones = merge_pairs(&disk.tombstones, &buffered.tombstones);

        debug!(
            type_id,
            clusters_read = read,
            clusters_pruned = pruned,
            matched = matched.len(),
            tombstones = tombstones.len(),
            "Resolved variable"
        );
        Ok(drop_tombstoned(matched, &tombstones))
    }

    /// Decode each candidate's record and hand it to `matcher`
    fn feed(&mut self, pattern: &Pattern, matcher: &mut dyn PatternMatcher) -> QueryResult<()> {
        for candidate in self.query(pattern)? {
            let record = self.store.read(candidate.rid)?;
            let values = self.schema.decode_record(&record)?;
            matcher.consume(&self.schema, values);
        }
        Ok(())
    }

    /// Get index statistics
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            events: self.event_count,
            blocks: self.index_file.blocks().len(),
            clusters: self.synopsis.cluster_count(),
            buffered: self.pool.len(),
            index_bytes: self.index_file.len(),
            ordered: self.ordered,
            tombstones: self.tombstone_count,
        }
    }
}

impl<S: RecordStore> EventIndex for AcerIndex<S> {
    fn insert(&mut self, row: &str, is_update: bool) -> StorageResult<Rid> {
        AcerIndex::insert(self, row, is_update)
    }

    fn insert_batch(&mut self, rows: &[&str], is_update: bool) -> StorageResult<()> {
        AcerIndex::insert_batch(self, rows.iter().copied(), is_update)
    }

    fn query_count(
        &mut self,
        pattern: &Pattern,
        matcher: &mut dyn PatternMatcher,
    ) -> QueryResult<usize> {
        self.feed(pattern, matcher)?;
        Ok(matcher.count())
    }

    fn query_tuples(
        &mut self,
        pattern: &Pattern,
        matcher: &mut dyn PatternMatcher,
    ) -> QueryResult<Vec<Vec<Vec<Value>>>> {
        self.feed(pattern, matcher)?;
        Ok(matcher.tuples())
    }
}

/// Index statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub events: u64,
    pub blocks: usize,
    pub clusters: usize,
    pub buffered: usize,
    pub index_bytes: u64,
    pub ordered: bool,
    pub tombstones: u64,
}

impl fmt::Display for IndexStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Events: {}, Blocks: {}, Clusters: {}, Buffered: {}, Index: {:.2} MB, Ordered: {}, Tombstones: {}",
            self.events,
            self.blocks,
            self.clusters,
            self.buffered,
            self.index_bytes as f64 / (1024.0 * 1024.0),
            self.ordered,
            self.tombstones
        )
    }
}
