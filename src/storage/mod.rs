//! ACER Storage Layer
//!
//! Everything that touches bytes on disk:
//!
//! - **types**: Record ids, candidate pairs, buffered triples
//! - **codec**: Integer-sequence codecs for timestamp/rid streams
//! - **block**: Index block format and builder
//! - **mapped**: Memory-mapped reader for one cluster of a block
//! - **index_file**: Append-only file of index blocks
//! - **record_store**: Paged fixed-size event records
//! - **schema**: Row parsing and fixed-point scaling
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   row → EventSchema → RecordStore (rid)
//!                     → BufferPool → [flush] → BlockBuilder → IndexFile
//!
//! Read Path:
//!   ClusterSummary → IndexFile::read_cluster → MappedCluster::query → Candidates
//! ```

pub mod block;
pub mod codec;
pub mod error;
pub mod index_file;
pub mod mapped;
pub mod record_store;
pub mod schema;
pub mod types;

// Re-export commonly used types
pub use block::{BlockBuilder, BlockHeader, BlockMeta, EncodedBlock, LayoutKind, StreamLayout};
pub use codec::{CodecKind, SequenceCodec};
pub use error::{StorageError, StorageResult};
pub use index_file::IndexFile;
pub use mapped::{MappedCluster, ReadMode, ReadOptions};
pub use record_store::{PagedRecordStore, RecordStore};
pub use schema::{AttrType, EventSchema, IndexedAttributes, ParsedRow, Value};
pub use types::{BufferedTriple, CandidatePair, Candidates, Rid};
