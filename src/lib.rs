//! # ACER
//!
//! A selectivity-aware index that accelerates complex event pattern queries
//! over an append-only event log.
//!
//! ## Features
//!
//! - **Compact blocks**: Range bitmaps plus compressed timestamp/record-id streams
//! - **Zone-map pruning**: Per-cluster synopsis skips blocks before they are mapped
//! - **Selective reads**: Only the touched byte ranges of a block are memory-mapped
//! - **Two-phase filtering**: Most selective variable first, then interval pruning
//!
//! ## Modules
//!
//! - [`storage`]: Block format, codecs, index file and record store
//! - [`index`]: Buffer pool, synopsis table, range bitmaps and sampler
//! - [`query`]: Patterns, predicates and the interval set
//! - [`engine`]: The [`AcerIndex`] orchestrator
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use acer_index::{AcerIndex, CompareOp, Constraint, EventSchema, IndexConfig, Pattern};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let schema = EventSchema::new(
//!         "stock",
//!         &[("ticker", "TYPE"), ("open", "DOUBLE.2"), ("volume", "INT"), ("time", "TIMESTAMP")],
//!     )?;
//!     let mut index = AcerIndex::create(IndexConfig::new("acer_data"), schema, &["open", "volume"])?;
//!
//!     index.insert("IBM,101.50,120,1000", false)?;
//!     index.insert("MSFT,98.25,90,1040", false)?;
//!
//!     let pattern = Pattern::sequence(100)
//!         .variable("a", "IBM")
//!         .variable("b", "MSFT")
//!         .constraint(Constraint::new("a", "open").compare(CompareOp::Ge, 100.0))
//!         .constraint(Constraint::new("b", "volume").compare(CompareOp::Gt, 80.0));
//!
//!     let candidates = index.query(&pattern)?;
//!     println!("Found {} candidate events", candidates.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod index;
pub mod query;
pub mod storage;

// Re-export top-level types for convenience
pub use config::{Config, ConfigError, IndexConfig, LoggingConfig};

pub use engine::{AcerIndex, EventIndex, IndexStats};

pub use index::{BufferPool, ClusterSummary, ReservoirSampler, SynopsisTable};

pub use query::{
    CandidateCollector, CompareOp, Constraint, IntervalSet, Pattern, PatternKind, PatternMatcher,
    PatternNode, QueryError, QueryResult,
};

pub use storage::{
    CandidatePair, CodecKind, EventSchema, LayoutKind, PagedRecordStore, ReadMode, RecordStore,
    Rid, StorageError, StorageResult, Value,
};
