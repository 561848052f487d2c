//! Index block format
//!
//! One block is produced per buffer-pool flush and appended to the index
//! file. Component sizes are kept in [`BlockMeta`] so a reader can compute
//! the byte range of any bitmap or stream segment without parsing the block.
//!
//! Layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (32 bytes)                       │
//! │   magic: [u8; 4] = "ACRB"               │
//! │   version: u16                          │
//! │   layout: u8                            │
//! │   codec: u8                             │
//! │   attr_count: u16                       │
//! │   event_count: u32                      │
//! │   start_timestamp: i64                  │
//! │   reserved: [u8; 6]                     │
//! │   checksum: u32                         │
//! ├─────────────────────────────────────────┤
//! │ DELETION BITMAP (deletion_size, may be 0)│
//! ├─────────────────────────────────────────┤
//! │ RANGE BITMAPS                           │
//! │   bitmap_0 .. bitmap_{attr_count-1}     │
//! ├─────────────────────────────────────────┤
//! │ STREAM SEGMENTS                         │
//! │   per-cluster: |ts_1|rid_1|...|ts_g|rid_g|
//! │   whole-block: |ts|rid|                 │
//! ├─────────────────────────────────────────┤
//! │ ZERO PADDING to a 1 KiB multiple        │
//! └─────────────────────────────────────────┘
//! ```

use crate::index::range_bitmap::RangeBitmapAppender;
use crate::storage::codec::{CodecKind, SequenceCodec};
use crate::storage::error::{StorageError, StorageResult};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Magic bytes for index block identification
const BLOCK_MAGIC: [u8; 4] = *b"ACRB";

/// Current block format version
const BLOCK_VERSION: u16 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 32;

/// Blocks are padded to a multiple of this many bytes
pub const BLOCK_ALIGNMENT: usize = 1024;

/// How timestamp/rid streams are laid out in a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LayoutKind {
    /// One independently decodable segment per cluster
    #[default]
    PerCluster = 0,
    /// One segment for the whole block
    WholeBlock = 1,
}

impl LayoutKind {
    /// The layout implementation for this kind
    pub fn layout(self) -> &'static dyn StreamLayout {
        match self {
            LayoutKind::PerCluster => &PerClusterLayout,
            LayoutKind::WholeBlock => &WholeBlockLayout,
        }
    }
}

impl TryFrom<u8> for LayoutKind {
    type Error = StorageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LayoutKind::PerCluster),
            1 => Ok(LayoutKind::WholeBlock),
            _ => Err(StorageError::InvalidBlock(format!(
                "Unknown stream layout: {}",
                value
            ))),
        }
    }
}

impl FromStr for LayoutKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "per_cluster" => Ok(LayoutKind::PerCluster),
            "whole_block" => Ok(LayoutKind::WholeBlock),
            other => Err(StorageError::Config(format!("Unknown layout: {}", other))),
        }
    }
}

impl fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutKind::PerCluster => f.write_str("per_cluster"),
            LayoutKind::WholeBlock => f.write_str("whole_block"),
        }
    }
}

/// Index block header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Magic bytes (should be "ACRB")
    pub magic: [u8; 4],
    /// Format version
    pub version: u16,
    pub layout: LayoutKind,
    pub codec: CodecKind,
    /// Number of range bitmaps
    pub attr_count: u16,
    /// Number of rows across all clusters
    pub event_count: u32,
    /// Smallest timestamp in the block
    pub start_timestamp: i64,
    /// Header checksum
    pub checksum: u32,
}

impl BlockHeader {
    pub fn new(layout: LayoutKind, codec: CodecKind, attr_count: u16) -> Self {
        Self {
            magic: BLOCK_MAGIC,
            version: BLOCK_VERSION,
            layout,
            codec,
            attr_count,
            event_count: 0,
            start_timestamp: i64::MAX,
            checksum: 0,
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0..4].copy_from_slice(&self.magic);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6] = self.layout as u8;
        buf[7] = self.codec as u8;
        buf[8..10].copy_from_slice(&self.attr_count.to_le_bytes());
        buf[10..14].copy_from_slice(&self.event_count.to_le_bytes());
        buf[14..22].copy_from_slice(&self.start_timestamp.to_le_bytes());
        // bytes 22-27 reserved

        let checksum = crc32fast::hash(&buf[0..28]);
        buf[28..32].copy_from_slice(&checksum.to_le_bytes());

        buf
    }

    /// Parse header from bytes
    pub fn from_bytes(buf: &[u8]) -> StorageResult<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(StorageError::InvalidBlock(format!(
                "Header truncated: {} bytes",
                buf.len()
            )));
        }

        let stored_checksum = u32::from_le_bytes([buf[28], buf[29], buf[30], buf[31]]);
        let computed_checksum = crc32fast::hash(&buf[0..28]);
        if stored_checksum != computed_checksum {
            return Err(StorageError::Corruption(format!(
                "Block header checksum mismatch: stored={}, computed={}",
                stored_checksum, computed_checksum
            )));
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        if magic != BLOCK_MAGIC {
            return Err(StorageError::InvalidBlock(format!(
                "Invalid magic: {:?}",
                magic
            )));
        }

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version > BLOCK_VERSION {
            return Err(StorageError::InvalidBlock(format!(
                "Unsupported version: {}",
                version
            )));
        }

        let mut ts = [0u8; 8];
        ts.copy_from_slice(&buf[14..22]);

        Ok(Self {
            magic,
            version,
            layout: LayoutKind::try_from(buf[6])?,
            codec: CodecKind::try_from(buf[7])?,
            attr_count: u16::from_le_bytes([buf[8], buf[9]]),
            event_count: u32::from_le_bytes([buf[10], buf[11], buf[12], buf[13]]),
            start_timestamp: i64::from_le_bytes(ts),
            checksum: stored_checksum,
        })
    }
}

/// Encoded sizes of one timestamp/rid segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSize {
    /// Values in each of the two streams
    pub count: u32,
    pub timestamps: u32,
    pub rids: u32,
}

impl SegmentSize {
    pub fn total(&self) -> usize {
        self.timestamps as usize + self.rids as usize
    }
}

/// Byte sizes of every component of a block, in layout order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockComponents {
    pub deletion_size: u32,
    pub bitmap_sizes: Vec<u32>,
    pub segments: Vec<SegmentSize>,
}

impl BlockComponents {
    pub fn deletion_range(&self) -> Range<usize> {
        HEADER_SIZE..HEADER_SIZE + self.deletion_size as usize
    }

    /// Block-relative byte range of attribute `attr`'s bitmap
    pub fn bitmap_range(&self, attr: usize) -> StorageResult<Range<usize>> {
        let size = *self.bitmap_sizes.get(attr).ok_or_else(|| {
            StorageError::InvalidBlock(format!(
                "Attribute {} out of range ({} bitmaps)",
                attr,
                self.bitmap_sizes.len()
            ))
        })? as usize;
        let start = self.deletion_range().end
            + self.bitmap_sizes[..attr]
                .iter()
                .map(|&s| s as usize)
                .sum::<usize>();
        Ok(start..start + size)
    }

    fn bitmaps_end(&self) -> usize {
        self.deletion_range().end + self.bitmap_sizes.iter().map(|&s| s as usize).sum::<usize>()
    }

    /// Block-relative byte ranges of segment `seg`'s timestamp and rid streams
    pub fn segment_ranges(&self, seg: usize) -> StorageResult<(Range<usize>, Range<usize>)> {
        let size = self.segments.get(seg).ok_or_else(|| {
            StorageError::InvalidBlock(format!(
                "Segment {} out of range ({} segments)",
                seg,
                self.segments.len()
            ))
        })?;
        let start = self.bitmaps_end() + self.segments[..seg].iter().map(|s| s.total()).sum::<usize>();
        let ts_end = start + size.timestamps as usize;
        Ok((start..ts_end, ts_end..ts_end + size.rids as usize))
    }

    /// Unpadded size of the block
    pub fn payload_size(&self) -> usize {
        self.bitmaps_end() + self.segments.iter().map(|s| s.total()).sum::<usize>()
    }
}

/// Location of one block inside the index file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMeta {
    pub block_id: u32,
    /// Offset from start of index file
    pub offset: u64,
    /// Padded size on disk
    pub size: u32,
    pub event_count: u32,
    /// CRC32 of the unpadded payload
    pub checksum: u32,
    pub components: BlockComponents,
}

/// Timestamp and rid streams of one cluster, in row order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterStream {
    pub timestamps: Vec<i64>,
    pub rids: Vec<i64>,
}

impl ClusterStream {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            timestamps: Vec::with_capacity(capacity),
            rids: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, timestamp: i64, rid: i64) {
        self.timestamps.push(timestamp);
        self.rids.push(rid);
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Which segment holds a cluster and how to slice it after decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSlice {
    pub segment: usize,
    /// Values to decode from the segment
    pub decode: usize,
    /// Decoded values to skip before the cluster's first row
    pub skip: usize,
}

/// Arrangement of timestamp/rid streams inside a block
pub trait StreamLayout: Send + Sync {
    fn kind(&self) -> LayoutKind;

    /// Encode the clusters' streams into `out`, returning the segment sizes
    fn encode(
        &self,
        codec: &dyn SequenceCodec,
        clusters: &[ClusterStream],
        out: &mut Vec<u8>,
    ) -> StorageResult<Vec<SegmentSize>>;

    /// Find the rows `[start, start + count)` of cluster `cluster_id`
    fn locate(
        &self,
        components: &BlockComponents,
        cluster_id: u32,
        start: u32,
        count: u32,
    ) -> StorageResult<SegmentSlice>;
}

fn encode_segment(
    codec: &dyn SequenceCodec,
    timestamps: &[i64],
    rids: &[i64],
    out: &mut Vec<u8>,
) -> StorageResult<SegmentSize> {
    let before = out.len();
    codec.encode(timestamps, out)?;
    let ts_size = out.len() - before;
    codec.encode(rids, out)?;
    let rid_size = out.len() - before - ts_size;
    Ok(SegmentSize {
        count: timestamps.len() as u32,
        timestamps: ts_size as u32,
        rids: rid_size as u32,
    })
}

/// `|ts_1|rid_1|...|ts_g|rid_g|`: a reader decodes only its cluster
#[derive(Debug, Clone, Copy, Default)]
pub struct PerClusterLayout;

impl StreamLayout for PerClusterLayout {
    fn kind(&self) -> LayoutKind {
        LayoutKind::PerCluster
    }

    fn encode(
        &self,
        codec: &dyn SequenceCodec,
        clusters: &[ClusterStream],
        out: &mut Vec<u8>,
    ) -> StorageResult<Vec<SegmentSize>> {
        clusters
            .iter()
            .map(|c| encode_segment(codec, &c.timestamps, &c.rids, out))
            .collect()
    }

    fn locate(
        &self,
        components: &BlockComponents,
        cluster_id: u32,
        _start: u32,
        count: u32,
    ) -> StorageResult<SegmentSlice> {
        let segment = cluster_id as usize;
        match components.segments.get(segment) {
            Some(size) if size.count == count => Ok(SegmentSlice {
                segment,
                decode: count as usize,
                skip: 0,
            }),
            Some(size) => Err(StorageError::Corruption(format!(
                "Cluster {} has {} rows but its segment holds {}",
                cluster_id, count, size.count
            ))),
            None => Err(StorageError::InvalidBlock(format!(
                "No segment for cluster {}",
                cluster_id
            ))),
        }
    }
}

/// `|ts|rid|`: one segment, readers decode everything and slice
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeBlockLayout;

impl StreamLayout for WholeBlockLayout {
    fn kind(&self) -> LayoutKind {
        LayoutKind::WholeBlock
    }

    fn encode(
        &self,
        codec: &dyn SequenceCodec,
        clusters: &[ClusterStream],
        out: &mut Vec<u8>,
    ) -> StorageResult<Vec<SegmentSize>> {
        let total: usize = clusters.iter().map(|c| c.len()).sum();
        let mut timestamps = Vec::with_capacity(total);
        let mut rids = Vec::with_capacity(total);
        for cluster in clusters {
            timestamps.extend_from_slice(&cluster.timestamps);
            rids.extend_from_slice(&cluster.rids);
        }
        Ok(vec![encode_segment(codec, &timestamps, &rids, out)?])
    }

    fn locate(
        &self,
        components: &BlockComponents,
        _cluster_id: u32,
        start: u32,
        count: u32,
    ) -> StorageResult<SegmentSlice> {
        let size = components
            .segments
            .first()
            .ok_or_else(|| StorageError::InvalidBlock("Block has no stream segment".to_string()))?;
        if start as u64 + count as u64 > size.count as u64 {
            return Err(StorageError::Corruption(format!(
                "Rows {}..{} exceed block of {} rows",
                start,
                start + count,
                size.count
            )));
        }
        Ok(SegmentSlice {
            segment: 0,
            decode: size.count as usize,
            skip: start as usize,
        })
    }
}

/// A serialized block ready to be appended to the index file
#[derive(Debug, Clone)]
pub struct EncodedBlock {
    /// Padded block bytes
    pub bytes: Vec<u8>,
    pub event_count: u32,
    pub checksum: u32,
    pub components: BlockComponents,
}

/// Serializes flushed clusters into the block format
#[derive(Debug, Clone, Copy)]
pub struct BlockBuilder {
    layout: LayoutKind,
    codec: CodecKind,
}

impl BlockBuilder {
    pub fn new(layout: LayoutKind, codec: CodecKind) -> Self {
        Self { layout, codec }
    }

    /// Build a block from one appender per attribute, the rows marked as
    /// tombstones, and the clusters' streams in row order.
    pub fn build(
        &self,
        appenders: &[RangeBitmapAppender],
        deletions: &RoaringBitmap,
        clusters: &[ClusterStream],
    ) -> StorageResult<EncodedBlock> {
        let event_count: usize = clusters.iter().map(|c| c.len()).sum();
        if let Some(appender) = appenders.iter().find(|a| a.rows() as usize != event_count) {
            return Err(StorageError::InvalidBlock(format!(
                "Bitmap holds {} rows, streams hold {}",
                appender.rows(),
                event_count
            )));
        }

        let mut header = BlockHeader::new(self.layout, self.codec, appenders.len() as u16);
        header.event_count = event_count as u32;
        header.start_timestamp = clusters
            .iter()
            .filter_map(|c| c.timestamps.iter().min())
            .min()
            .copied()
            .unwrap_or(0);

        let mut bytes = Vec::with_capacity(BLOCK_ALIGNMENT);
        bytes.extend_from_slice(&header.to_bytes());

        let deletion_size = if deletions.is_empty() {
            0
        } else {
            deletions.serialize_into(&mut bytes)?;
            deletions.serialized_size() as u32
        };

        let mut bitmap_sizes = Vec::with_capacity(appenders.len());
        for appender in appenders {
            let before = bytes.len();
            appender.serialize_into(&mut bytes)?;
            bitmap_sizes.push((bytes.len() - before) as u32);
        }

        let segments = self
            .layout
            .layout()
            .encode(self.codec.codec(), clusters, &mut bytes)?;

        let components = BlockComponents {
            deletion_size,
            bitmap_sizes,
            segments,
        };
        debug_assert_eq!(components.payload_size(), bytes.len());

        let checksum = crc32fast::hash(&bytes);
        let padded = bytes.len().div_ceil(BLOCK_ALIGNMENT) * BLOCK_ALIGNMENT;
        bytes.resize(padded, 0);

        Ok(EncodedBlock {
            bytes,
            event_count: event_count as u32,
            checksum,
            components,
        })
    }
}

/// Read-only view over a complete block held in memory or mapped
pub struct BlockView<'a> {
    pub header: BlockHeader,
    bytes: &'a [u8],
    components: &'a BlockComponents,
}

impl<'a> BlockView<'a> {
    /// Validate header and payload checksum of a complete block
    pub fn parse(bytes: &'a [u8], meta: &'a BlockMeta) -> StorageResult<Self> {
        let header = BlockHeader::from_bytes(bytes)?;
        let payload_size = meta.components.payload_size();
        let payload = bytes.get(..payload_size).ok_or_else(|| {
            StorageError::Corruption(format!(
                "Block {} truncated: need {} bytes, have {}",
                meta.block_id,
                payload_size,
                bytes.len()
            ))
        })?;
        let computed = crc32fast::hash(payload);
        if computed != meta.checksum {
            return Err(StorageError::Corruption(format!(
                "Block {} checksum mismatch: stored={}, computed={}",
                meta.block_id, meta.checksum, computed
            )));
        }
        if header.event_count != meta.event_count
            || header.attr_count as usize != meta.components.bitmap_sizes.len()
        {
            return Err(StorageError::Corruption(format!(
                "Block {} header disagrees with its metadata",
                meta.block_id
            )));
        }

        Ok(Self {
            header,
            bytes: payload,
            components: &meta.components,
        })
    }

    pub fn deletion_bytes(&self) -> &'a [u8] {
        &self.bytes[self.components.deletion_range()]
    }

    pub fn bitmap_bytes(&self, attr: usize) -> StorageResult<&'a [u8]> {
        Ok(&self.bytes[self.components.bitmap_range(attr)?])
    }

    /// Timestamp and rid bytes of segment `seg`
    pub fn segment_bytes(&self, seg: usize) -> StorageResult<(&'a [u8], &'a [u8])> {
        let (ts, rid) = self.components.segment_ranges(seg)?;
        Ok((&self.bytes[ts], &self.bytes[rid]))
    }

    /// Decode every segment and concatenate, giving full-block row order
    pub fn decode_all(&self) -> StorageResult<(Vec<i64>, Vec<i64>)> {
        let codec = self.header.codec.codec();
        let mut timestamps = Vec::with_capacity(self.header.event_count as usize);
        let mut rids = Vec::with_capacity(self.header.event_count as usize);
        for (seg, size) in self.components.segments.iter().enumerate() {
            let (ts_bytes, rid_bytes) = self.segment_bytes(seg)?;
            timestamps.extend(codec.decode(ts_bytes, size.count as usize)?);
            rids.extend(codec.decode(rid_bytes, size.count as usize)?);
        }
        Ok((timestamps, rids))
    }
}
