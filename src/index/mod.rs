//! ACER Index Structures
//!
//! In-memory side of the index:
//!
//! - **BufferPool**: Per-type staging area that flushes into index blocks
//! - **SynopsisTable**: Per-cluster zone map over time and value ranges
//! - **RangeBitmap**: Bit-sliced range index stored inside each block
//! - **ReservoirSampler**: Value sample used for selectivity estimates
//!
//! # Architecture
//!
//! ```text
//! Query: "a.price in [100, 165] within 10s of b"
//!        ↓
//! ReservoirSampler: order variables by estimated selectivity
//!        ↓
//! SynopsisTable: clusters whose ranges can match → [(blk0, c2), (blk3, c1)]
//!        ↓
//! RangeBitmap: matching rows inside each mapped cluster
//!        ↓
//! BufferPool: add unflushed matches
//! ```

pub mod buffer_pool;
pub mod range_bitmap;
pub mod sampler;
pub mod synopsis;

pub use buffer_pool::BufferPool;
pub use range_bitmap::{RangeBitmap, RangeBitmapAppender};
pub use sampler::ReservoirSampler;
pub use synopsis::{ClusterSummary, SynopsisTable};
