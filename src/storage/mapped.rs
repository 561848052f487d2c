//! Memory-mapped access to one cluster of an index block
//!
//! Opening a [`MappedCluster`] maps only what answering a query needs. The
//! selective path maps the header, the deletion bitmap, the bitmaps of the
//! requested attributes, and the cluster's stream segment, each at the
//! offset computed from [`BlockMeta`]. The whole-block path maps the full
//! block, checks its payload CRC, and decodes every stream.
//!
//! Bitmaps store `value - cluster_min`, so predicates are translated into
//! that domain before evaluation.

use crate::index::range_bitmap::RangeBitmap;
use crate::index::synopsis::ClusterSummary;
use crate::query::Predicate;
use crate::storage::block::{BlockHeader, BlockMeta, BlockView, HEADER_SIZE};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{CandidatePair, Candidates, Rid};
use memmap2::{Mmap, MmapOptions};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::ops::Range;
use std::str::FromStr;

/// How much of a block a reader maps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    /// Map only the byte ranges the query touches
    #[default]
    Selective,
    /// Map and verify the complete block
    WholeBlock,
}

impl FromStr for ReadMode {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "selective" => Ok(ReadMode::Selective),
            "whole_block" => Ok(ReadMode::WholeBlock),
            other => Err(StorageError::Config(format!("Unknown read mode: {}", other))),
        }
    }
}

/// Options for opening a cluster reader
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub mode: ReadMode,
    /// Pass the running answer as context to each predicate
    pub truncate: bool,
}

/// Decoded rows and mapped bitmaps of one cluster
#[derive(Debug)]
pub struct MappedCluster {
    start: u32,
    count: u32,
    base_values: Vec<i64>,
    timestamps: Vec<i64>,
    rids: Vec<i64>,
    /// Indexed by attribute position, `None` for attributes not loaded
    bitmaps: Vec<Option<RangeBitmap>>,
    deletions: RoaringBitmap,
    truncate: bool,
}

fn map_range(file: &File, base: u64, range: Range<usize>) -> StorageResult<Mmap> {
    let mmap = unsafe {
        MmapOptions::new()
            .offset(base + range.start as u64)
            .len(range.len())
            .map(file)?
    };
    Ok(mmap)
}

fn load_deletions(bytes: &[u8]) -> StorageResult<RoaringBitmap> {
    if bytes.is_empty() {
        return Ok(RoaringBitmap::new());
    }
    RoaringBitmap::deserialize_from(bytes)
        .map_err(|e| StorageError::Corruption(format!("Deletion bitmap: {}", e)))
}

fn check_header(header: &BlockHeader, meta: &BlockMeta) -> StorageResult<()> {
    if header.event_count != meta.event_count
        || header.attr_count as usize != meta.components.bitmap_sizes.len()
    {
        return Err(StorageError::Corruption(format!(
            "Block {} header disagrees with its metadata",
            meta.block_id
        )));
    }
    Ok(())
}

impl MappedCluster {
    /// Map the parts of `meta`'s block needed to answer predicates on `attrs`
    /// for the cluster described by `summary`.
    pub fn open(
        file: &File,
        meta: &BlockMeta,
        summary: &ClusterSummary,
        attrs: &[usize],
        options: ReadOptions,
    ) -> StorageResult<Self> {
        if summary.block_id != meta.block_id {
            return Err(StorageError::InvalidBlock(format!(
                "Cluster belongs to block {}, not {}",
                summary.block_id, meta.block_id
            )));
        }
        if summary.start as u64 + summary.count as u64 > meta.event_count as u64 {
            return Err(StorageError::Corruption(format!(
                "Cluster rows {:?} exceed block {} of {} rows",
                summary.rows(),
                meta.block_id,
                meta.event_count
            )));
        }

        let attr_count = meta.components.bitmap_sizes.len();
        let mut bitmaps: Vec<Option<RangeBitmap>> = (0..attr_count).map(|_| None).collect();

        let (timestamps, rids, deletions) = match options.mode {
            ReadMode::Selective => {
                let header_map = map_range(file, meta.offset, 0..HEADER_SIZE)?;
                let header = BlockHeader::from_bytes(&header_map)?;
                check_header(&header, meta)?;

                let deletion_range = meta.components.deletion_range();
                let deletions = if deletion_range.is_empty() {
                    RoaringBitmap::new()
                } else {
                    load_deletions(&map_range(file, meta.offset, deletion_range)?)?
                };

                for &attr in attrs {
                    if bitmaps.get(attr).is_some_and(|b| b.is_none()) {
                        let range = meta.components.bitmap_range(attr)?;
                        let mmap = map_range(file, meta.offset, range)?;
                        bitmaps[attr] = Some(RangeBitmap::map(&mmap)?);
                    }
                }

                let slice = header.layout.layout().locate(
                    &meta.components,
                    summary.cluster_id,
                    summary.start,
                    summary.count,
                )?;
                let (ts_range, rid_range) = meta.components.segment_ranges(slice.segment)?;
                let codec = header.codec.codec();
                let (mut timestamps, mut rids) = if ts_range.start == rid_range.end {
                    (Vec::new(), Vec::new())
                } else {
                    let segment = map_range(file, meta.offset, ts_range.start..rid_range.end)?;
                    let split = ts_range.len();
                    (
                        codec.decode(&segment[..split], slice.decode)?,
                        codec.decode(&segment[split..], slice.decode)?,
                    )
                };
                let rows = slice.skip..slice.skip + summary.count as usize;
                timestamps.truncate(rows.end);
                rids.truncate(rows.end);
                (
                    timestamps.split_off(rows.start),
                    rids.split_off(rows.start),
                    deletions,
                )
            }
            ReadMode::WholeBlock => {
                let block_map = map_range(file, meta.offset, 0..meta.size as usize)?;
                let view = BlockView::parse(&block_map, meta)?;
                let deletions = load_deletions(view.deletion_bytes())?;
                for &attr in attrs {
                    if bitmaps.get(attr).is_some_and(|b| b.is_none()) {
                        bitmaps[attr] = Some(RangeBitmap::map(view.bitmap_bytes(attr)?)?);
                    }
                }
                let (timestamps, rids) = view.decode_all()?;
                let rows = summary.start as usize..(summary.start + summary.count) as usize;
                (
                    timestamps[rows.clone()].to_vec(),
                    rids[rows].to_vec(),
                    deletions,
                )
            }
        };

        if timestamps.len() != summary.count as usize || rids.len() != summary.count as usize {
            return Err(StorageError::Corruption(format!(
                "Cluster {} of block {} decoded {} rows, expected {}",
                summary.cluster_id,
                meta.block_id,
                timestamps.len(),
                summary.count
            )));
        }

        Ok(Self {
            start: summary.start,
            count: summary.count,
            base_values: summary.min_values.clone(),
            timestamps,
            rids,
            bitmaps,
            deletions,
            truncate: options.truncate,
        })
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Rows of the cluster satisfying every predicate, split into live
    /// events and tombstones. Predicates use absolute (scaled) bounds.
    pub fn query(&self, predicates: &[Predicate]) -> StorageResult<Candidates> {
        let mut rows = RoaringBitmap::new();
        rows.insert_range(self.start..self.start + self.count);

        for predicate in predicates {
            if rows.is_empty() {
                break;
            }
            let bitmap = self
                .bitmaps
                .get(predicate.attr)
                .and_then(Option::as_ref)
                .ok_or_else(|| {
                    StorageError::InvalidBlock(format!(
                        "Bitmap for attribute {} was not mapped",
                        predicate.attr
                    ))
                })?;
            let base = self.base_values.get(predicate.attr).copied().unwrap_or(0);
            let local = predicate.relative_to(base);

            if self.truncate {
                rows = local.evaluate(bitmap, Some(&rows));
            } else {
                rows &= local.evaluate(bitmap, None);
            }
        }

        let mut candidates = Candidates::new();
        for position in rows.iter() {
            let idx = (position - self.start) as usize;
            let pair = CandidatePair::new(self.timestamps[idx], Rid::from_key(self.rids[idx]));
            if self.deletions.contains(position) {
                candidates.tombstones.push(pair);
            } else {
                candidates.matched.push(pair);
            }
        }
        candidates.matched.sort_unstable();
        candidates.tombstones.sort_unstable();
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::range_bitmap::RangeBitmapAppender;
    use crate::storage::block::{BlockBuilder, ClusterStream, LayoutKind};
    use crate::storage::codec::CodecKind;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::io::Write;
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        file: File,
        meta: BlockMeta,
        summaries: Vec<ClusterSummary>,
        /// (value, timestamp, rid, tombstone) per row, in block order
        rows: Vec<(i64, i64, Rid, bool)>,
    }

    /// Writes a block with two clusters behind some leading garbage so the
    /// block starts at a non-zero, unaligned file offset.
    fn fixture(layout: LayoutKind, codec: CodecKind, seed: u64) -> Fixture {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut appender = RangeBitmapAppender::new();
        let mut deletions = RoaringBitmap::new();
        let mut clusters = Vec::new();
        let mut summaries = Vec::new();
        let mut rows = Vec::new();

        let sizes = [rng.gen_range(20..60u32), rng.gen_range(20..60u32)];
        let mut start = 0;
        for (cluster_id, &count) in sizes.iter().enumerate() {
            let mut ts = rng.gen_range(0..1000i64);
            let values: Vec<i64> = (0..count).map(|_| rng.gen_range(-500..500)).collect();
            let min = *values.iter().min().unwrap();
            let max = *values.iter().max().unwrap();
            let mut stream = ClusterStream::default();
            let mut start_time = i64::MAX;
            let mut end_time = i64::MIN;
            for (i, &v) in values.iter().enumerate() {
                ts += rng.gen_range(0..10);
                let rid = Rid::new(rng.gen_range(0..1000), rng.gen_range(0..8000));
                let tomb = rng.gen_bool(0.1);
                let position = start + i as u32;
                appender.add((v - min) as u64);
                if tomb {
                    deletions.insert(position);
                }
                stream.push(ts, rid.to_key());
                rows.push((v, ts, rid, tomb));
                start_time = start_time.min(ts);
                end_time = end_time.max(ts);
            }
            clusters.push(stream);
            summaries.push(ClusterSummary {
                block_id: 0,
                cluster_id: cluster_id as u32,
                start,
                count,
                start_time,
                end_time,
                min_values: vec![min],
                max_values: vec![max],
            });
            start += count;
        }

        let block = BlockBuilder::new(layout, codec)
            .build(&[appender], &deletions, &clusters)
            .unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("t.acer");
        let mut out = File::create(&path).unwrap();
        let garbage = vec![0xAB; 1024 + 7];
        out.write_all(&garbage).unwrap();
        out.write_all(&block.bytes).unwrap();
        out.flush().unwrap();

        let meta = BlockMeta {
            block_id: 0,
            offset: garbage.len() as u64,
            size: block.bytes.len() as u32,
            event_count: block.event_count,
            checksum: block.checksum,
            components: block.components.clone(),
        };

        Fixture {
            _dir: dir,
            file: File::open(&path).unwrap(),
            meta,
            summaries,
            rows,
        }
    }

    fn expected(
        f: &Fixture,
        summary: &ClusterSummary,
        lo: i64,
        hi: i64,
    ) -> (Vec<CandidatePair>, Vec<CandidatePair>) {
        let mut live = Vec::new();
        let mut dead = Vec::new();
        for &(v, ts, rid, tomb) in &f.rows[summary.start as usize..(summary.start + summary.count) as usize] {
            if v >= lo && v <= hi {
                if tomb {
                    dead.push(CandidatePair::new(ts, rid));
                } else {
                    live.push(CandidatePair::new(ts, rid));
                }
            }
        }
        live.sort();
        dead.sort();
        (live, dead)
    }

    #[test]
    fn test_cluster_roundtrip_all_layouts_and_codecs() {
        let mut seed = 0;
        for layout in [LayoutKind::PerCluster, LayoutKind::WholeBlock] {
            for codec in [
                CodecKind::Delta,
                CodecKind::VarInt,
                CodecKind::Simple8b,
                CodecKind::DeltaOfDelta,
            ] {
                for mode in [ReadMode::Selective, ReadMode::WholeBlock] {
                    seed += 1;
                    let f = fixture(layout, codec, seed);
                    for summary in &f.summaries {
                        let reader = MappedCluster::open(
                            &f.file,
                            &f.meta,
                            summary,
                            &[0],
                            ReadOptions { mode, truncate: true },
                        )
                        .unwrap();
                        assert_eq!(reader.len(), summary.count as usize);

                        // no predicates: the whole cluster
                        let all = reader.query(&[]).unwrap();
                        let (live, dead) = expected(&f, summary, i64::MIN, i64::MAX);
                        assert_eq!(all.matched, live);
                        assert_eq!(all.tombstones, dead);

                        // always-true predicate
                        let p = Predicate::new(0, Some(i64::MIN + 1), Some(i64::MAX - 1)).unwrap();
                        assert_eq!(reader.query(&[p]).unwrap(), all);
                    }
                }
            }
        }
    }

    #[test]
    fn test_predicates_match_brute_force() {
        let f = fixture(LayoutKind::PerCluster, CodecKind::Simple8b, 42);
        let mut rng = StdRng::seed_from_u64(43);
        for truncate in [true, false] {
            for summary in &f.summaries {
                let reader = MappedCluster::open(
                    &f.file,
                    &f.meta,
                    summary,
                    &[0],
                    ReadOptions {
                        mode: ReadMode::Selective,
                        truncate,
                    },
                )
                .unwrap();
                for _ in 0..20 {
                    let a = rng.gen_range(-600..600);
                    let b = rng.gen_range(-600..600);
                    let (lo, hi) = (a.min(b), a.max(b));

                    let both = Predicate::new(0, Some(lo), Some(hi)).unwrap();
                    let (live, dead) = expected(&f, summary, lo, hi);
                    let got = reader.query(&[both]).unwrap();
                    assert_eq!(got.matched, live);
                    assert_eq!(got.tombstones, dead);

                    // split into two one-sided predicates
                    let min_only = Predicate::new(0, Some(lo), None).unwrap();
                    let max_only = Predicate::new(0, None, Some(hi)).unwrap();
                    assert_eq!(reader.query(&[min_only, max_only]).unwrap(), got);
                }
            }
        }
    }

    #[test]
    fn test_unmapped_attribute_rejected() {
        let f = fixture(LayoutKind::PerCluster, CodecKind::Delta, 5);
        let reader = MappedCluster::open(
            &f.file,
            &f.meta,
            &f.summaries[0],
            &[],
            ReadOptions {
                mode: ReadMode::Selective,
                truncate: true,
            },
        )
        .unwrap();
        let p = Predicate::new(0, Some(0), None).unwrap();
        assert!(matches!(reader.query(&[p]), Err(StorageError::InvalidBlock(_))));
    }

    #[test]
    fn test_whole_block_detects_corruption() {
        let mut f = fixture(LayoutKind::WholeBlock, CodecKind::VarInt, 9);
        f.meta.checksum ^= 1;
        let result = MappedCluster::open(
            &f.file,
            &f.meta,
            &f.summaries[0],
            &[0],
            ReadOptions {
                mode: ReadMode::WholeBlock,
                truncate: true,
            },
        );
        assert!(matches!(result, Err(StorageError::Corruption(_))));
    }
}
