//! Range bitmap: bit-sliced index over roaring bitmaps
//!
//! Row `r` holding value `v` sets bit `r` in slice `i` for every set bit `i`
//! of `v`. Range predicates are answered with O'Neil's bit-sliced comparison,
//! one pass over the slices from the most significant bit down, so the cost
//! depends on the value width, not on the number of distinct values.
//!
//! Serialized form:
//!
//! ```text
//! | rows: u32 | max_value: u64 | slice_count: u8 |
//! | slice_len: u32 | roaring bytes | ... (slice_count times)
//! ```
//!
//! Values are non-negative (callers store `value - cluster_min`). Query
//! bounds are signed so a translated bound below zero or above the stored
//! maximum still gives the exact answer.

use crate::storage::{StorageError, StorageResult};
use roaring::RoaringBitmap;

const HEADER_SIZE: usize = 13;

/// Incrementally builds a range bitmap, one row per `add`
#[derive(Debug, Default, Clone)]
pub struct RangeBitmapAppender {
    slices: Vec<RoaringBitmap>,
    rows: u32,
    max_value: u64,
}

impl RangeBitmapAppender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the value for the next row
    pub fn add(&mut self, value: u64) {
        let row = self.rows;
        let width = (u64::BITS - value.leading_zeros()) as usize;
        while self.slices.len() < width {
            self.slices.push(RoaringBitmap::new());
        }
        for (bit, slice) in self.slices.iter_mut().enumerate().take(width) {
            if value >> bit & 1 == 1 {
                slice.insert(row);
            }
        }
        self.rows += 1;
        self.max_value = self.max_value.max(value);
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn serialized_size(&self) -> usize {
        HEADER_SIZE
            + self
                .slices
                .iter()
                .map(|s| 4 + s.serialized_size())
                .sum::<usize>()
    }

    pub fn serialize_into(&self, out: &mut Vec<u8>) -> StorageResult<()> {
        out.reserve(self.serialized_size());
        out.extend_from_slice(&self.rows.to_le_bytes());
        out.extend_from_slice(&self.max_value.to_le_bytes());
        out.push(self.slices.len() as u8);
        for slice in &self.slices {
            out.extend_from_slice(&(slice.serialized_size() as u32).to_le_bytes());
            slice.serialize_into(&mut *out)?;
        }
        Ok(())
    }

    /// Freeze into a queryable bitmap without a serialize round trip
    pub fn finish(self) -> RangeBitmap {
        RangeBitmap {
            slices: self.slices,
            rows: self.rows,
            max_value: self.max_value,
        }
    }
}

/// Queryable range bitmap
#[derive(Debug, Clone)]
pub struct RangeBitmap {
    slices: Vec<RoaringBitmap>,
    rows: u32,
    max_value: u64,
}

impl RangeBitmap {
    /// Load a bitmap from its serialized bytes
    pub fn map(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(StorageError::Corruption(format!(
                "Range bitmap header truncated: {} bytes",
                bytes.len()
            )));
        }
        let rows = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let mut max_buf = [0u8; 8];
        max_buf.copy_from_slice(&bytes[4..12]);
        let max_value = u64::from_le_bytes(max_buf);
        let slice_count = bytes[12] as usize;

        let mut slices = Vec::with_capacity(slice_count);
        let mut pos = HEADER_SIZE;
        for _ in 0..slice_count {
            let len_bytes = bytes.get(pos..pos + 4).ok_or_else(|| {
                StorageError::Corruption("Range bitmap slice length truncated".to_string())
            })?;
            let len =
                u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
                    as usize;
            pos += 4;
            let slice_bytes = bytes.get(pos..pos + len).ok_or_else(|| {
                StorageError::Corruption("Range bitmap slice truncated".to_string())
            })?;
            let slice = RoaringBitmap::deserialize_from(slice_bytes)
                .map_err(|e| StorageError::Corruption(format!("Range bitmap slice: {}", e)))?;
            slices.push(slice);
            pos += len;
        }

        Ok(Self {
            slices,
            rows,
            max_value,
        })
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn max_value(&self) -> u64 {
        self.max_value
    }

    /// Rows with `value >= min`
    ///
    /// Bounds are `i128` so any `i64` bound shifted by any `i64` base fits.
    pub fn gte(&self, min: i128, context: Option<&RoaringBitmap>) -> RoaringBitmap {
        if min <= 0 {
            return self.existence(context);
        }
        if min > self.max_value as i128 {
            return RoaringBitmap::new();
        }
        let min = min as u64;

        let mut gt = RoaringBitmap::new();
        let mut eq = self.existence(context);
        for (bit, slice) in self.slices.iter().enumerate().rev() {
            if min >> bit & 1 == 1 {
                eq &= slice;
            } else {
                gt |= &eq & slice;
                eq -= slice;
            }
        }
        gt |= eq;
        gt
    }

    /// Rows with `value <= max`
    pub fn lte(&self, max: i128, context: Option<&RoaringBitmap>) -> RoaringBitmap {
        if max < 0 {
            return RoaringBitmap::new();
        }
        if max >= self.max_value as i128 {
            return self.existence(context);
        }
        let max = max as u64;

        let mut lt = RoaringBitmap::new();
        let mut eq = self.existence(context);
        for (bit, slice) in self.slices.iter().enumerate().rev() {
            if max >> bit & 1 == 1 {
                lt |= &eq - slice;
                eq &= slice;
            } else {
                eq -= slice;
            }
        }
        lt |= eq;
        lt
    }

    /// Rows with `min <= value <= max`
    pub fn between(&self, min: i128, max: i128, context: Option<&RoaringBitmap>) -> RoaringBitmap {
        if min > max {
            return RoaringBitmap::new();
        }
        let lower = self.gte(min, context);
        self.lte(max, Some(&lower))
    }

    fn existence(&self, context: Option<&RoaringBitmap>) -> RoaringBitmap {
        let mut all = RoaringBitmap::new();
        all.insert_range(0..self.rows);
        if let Some(context) = context {
            all &= context;
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn build(values: &[u64]) -> RangeBitmap {
        let mut appender = RangeBitmapAppender::new();
        for &v in values {
            appender.add(v);
        }
        let mut bytes = Vec::new();
        appender.serialize_into(&mut bytes).unwrap();
        assert_eq!(bytes.len(), appender.serialized_size());
        RangeBitmap::map(&bytes).unwrap()
    }

    fn positions(bitmap: &RoaringBitmap) -> Vec<u32> {
        bitmap.iter().collect()
    }

    #[test]
    fn test_boundaries_on_dense_range() {
        let values: Vec<u64> = (0..100).collect();
        let rb = build(&values);

        assert_eq!(positions(&rb.gte(99, None)), vec![99]);
        assert_eq!(positions(&rb.lte(0, None)), vec![0]);
        assert_eq!(
            positions(&rb.between(-1, 100, None)),
            (0..100).collect::<Vec<u32>>()
        );
        assert!(rb.gte(100, None).is_empty());
        assert!(rb.lte(-1, None).is_empty());
        assert_eq!(positions(&rb.between(40, 42, None)), vec![40, 41, 42]);
    }

    #[test]
    fn test_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(7);
        let values: Vec<u64> = (0..2000).map(|_| rng.gen_range(0..5000)).collect();
        let rb = build(&values);

        for _ in 0..50 {
            let a = rng.gen_range(-10..5010i64);
            let b = rng.gen_range(-10..5010i64);
            let (lo, hi) = (a.min(b), a.max(b));

            let expected_gte: Vec<u32> = (0..values.len() as u32)
                .filter(|&r| values[r as usize] as i64 >= lo)
                .collect();
            let expected_lte: Vec<u32> = (0..values.len() as u32)
                .filter(|&r| values[r as usize] as i64 <= hi)
                .collect();
            let expected_between: Vec<u32> = (0..values.len() as u32)
                .filter(|&r| (lo..=hi).contains(&(values[r as usize] as i64)))
                .collect();

            let (lo, hi) = (i128::from(lo), i128::from(hi));
            assert_eq!(positions(&rb.gte(lo, None)), expected_gte);
            assert_eq!(positions(&rb.lte(hi, None)), expected_lte);
            assert_eq!(positions(&rb.between(lo, hi, None)), expected_between);
        }
    }

    #[test]
    fn test_context_restricts_answer() {
        let values: Vec<u64> = (0..64).map(|v| v % 8).collect();
        let rb = build(&values);

        let mut context = RoaringBitmap::new();
        context.insert_range(16..24);

        assert_eq!(positions(&rb.gte(6, Some(&context))), vec![22, 23]);
        assert_eq!(positions(&rb.lte(1, Some(&context))), vec![16, 17]);
        assert_eq!(positions(&rb.between(3, 4, Some(&context))), vec![19, 20]);
    }

    #[test]
    fn test_all_zero_values() {
        let rb = build(&[0, 0, 0]);
        assert_eq!(rb.max_value(), 0);
        assert_eq!(positions(&rb.lte(0, None)), vec![0, 1, 2]);
        assert!(rb.gte(1, None).is_empty());
    }

    #[test]
    fn test_truncated_bytes_rejected() {
        let mut appender = RangeBitmapAppender::new();
        for v in 0..300 {
            appender.add(v);
        }
        let mut bytes = Vec::new();
        appender.serialize_into(&mut bytes).unwrap();

        assert!(RangeBitmap::map(&bytes[..bytes.len() - 3]).is_err());
        assert!(RangeBitmap::map(&bytes[..5]).is_err());
    }

    #[test]
    fn test_finish_matches_mapped() {
        let mut appender = RangeBitmapAppender::new();
        for v in [5u64, 1, 9, 3] {
            appender.add(v);
        }
        let rb = appender.finish();
        assert_eq!(positions(&rb.gte(4, None)), vec![0, 2]);
    }
}
