//! Integer-sequence codecs for timestamp and rid streams
//!
//! Every codec writes the first value as a raw little-endian `i64`, followed
//! by the remaining values as deltas. Streams are not self-terminating: the
//! caller supplies the value count on decode, which is what lets a block hold
//! several independently sized segments back to back.
//!
//! ```text
//! Delta         | first: i64 | (v_i - first): i32 ...               |
//! VarInt        | first: i64 | leb128(zigzag(v_i - v_{i-1})) ...    |
//! Simple8b      | first: i64 | word: u64 (4-bit selector + 60 bits) |
//! DeltaOfDelta  | first: i64 | prefix-coded bits, zero-padded       |
//! ```
//!
//! DeltaOfDelta codes `zigzag(d_i - d_{i-1})`, MSB first, with `d_0 = 0`:
//!
//! ```text
//! 0      zero
//! 10     + 7 bits
//! 110    + 9 bits
//! 1110   + 12 bits
//! 1111   + 64 bits
//! ```
//!
//! Simple8b selectors:
//!
//! ```text
//! selector   0   1   2   3   4   5   6   7   8   9  10  11  12  13  14  15
//! bits       0   0   1   2   3   4   5   6   7   8  10  12  15  20  30  60
//! values   240 120  60  30  20  15  12  10   8   7   6   5   4   3   2   1
//! ```

use crate::storage::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which sequence codec a block uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CodecKind {
    /// Fixed 32-bit offsets from the stream start
    Delta = 0,
    /// Zigzag LEB128 of consecutive deltas
    VarInt = 1,
    /// Zigzag deltas packed into 64-bit words
    #[default]
    Simple8b = 2,
    /// Prefix-coded delta-of-deltas, for near-regular timestamps
    DeltaOfDelta = 3,
}

impl CodecKind {
    /// The codec implementation for this kind
    pub fn codec(self) -> &'static dyn SequenceCodec {
        match self {
            CodecKind::Delta => &DeltaCodec,
            CodecKind::VarInt => &VarIntCodec,
            CodecKind::Simple8b => &Simple8bCodec,
            CodecKind::DeltaOfDelta => &DeltaOfDeltaCodec,
        }
    }
}

impl TryFrom<u8> for CodecKind {
    type Error = StorageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CodecKind::Delta),
            1 => Ok(CodecKind::VarInt),
            2 => Ok(CodecKind::Simple8b),
            3 => Ok(CodecKind::DeltaOfDelta),
            _ => Err(StorageError::InvalidBlock(format!(
                "Unknown codec: {}",
                value
            ))),
        }
    }
}

impl FromStr for CodecKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "delta" => Ok(CodecKind::Delta),
            "var_int" | "varint" => Ok(CodecKind::VarInt),
            "simple8b" | "simple_8b" => Ok(CodecKind::Simple8b),
            "delta_of_delta" | "deltaofdelta" | "dod" => Ok(CodecKind::DeltaOfDelta),
            other => Err(StorageError::Config(format!("Unknown codec: {}", other))),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CodecKind::Delta => "delta",
            CodecKind::VarInt => "var_int",
            CodecKind::Simple8b => "simple8b",
            CodecKind::DeltaOfDelta => "delta_of_delta",
        };
        f.write_str(name)
    }
}

/// Encodes and decodes a sequence of `i64` values
pub trait SequenceCodec: Send + Sync {
    fn kind(&self) -> CodecKind;

    /// Append the encoded form of `values` to `out`
    fn encode(&self, values: &[i64], out: &mut Vec<u8>) -> StorageResult<()>;

    /// Decode exactly `count` values from the start of `bytes`
    fn decode(&self, bytes: &[u8], count: usize) -> StorageResult<Vec<i64>>;
}

/// Fixed-width delta codec
///
/// Cheapest to decode. Fails when a value is more than `i32` away from the
/// first value of its stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaCodec;

impl SequenceCodec for DeltaCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Delta
    }

    fn encode(&self, values: &[i64], out: &mut Vec<u8>) -> StorageResult<()> {
        let Some(&first) = values.first() else {
            return Ok(());
        };
        out.reserve(8 + 4 * (values.len() - 1));
        out.extend_from_slice(&first.to_le_bytes());

        for &value in &values[1..] {
            let delta = value
                .checked_sub(first)
                .and_then(|d| i32::try_from(d).ok())
                .ok_or_else(|| StorageError::CodecOverflow {
                    delta: value.wrapping_sub(first),
                    bits: 32,
                })?;
            out.extend_from_slice(&delta.to_le_bytes());
        }
        Ok(())
    }

    fn decode(&self, bytes: &[u8], count: usize) -> StorageResult<Vec<i64>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let needed = 8 + 4 * (count - 1);
        if bytes.len() < needed {
            return Err(StorageError::Codec(format!(
                "Delta stream truncated: need {} bytes, have {}",
                needed,
                bytes.len()
            )));
        }

        let first = read_i64(bytes, 0)?;
        let mut values = Vec::with_capacity(count);
        values.push(first);
        for chunk in bytes[8..needed].chunks_exact(4) {
            let delta = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            values.push(first + delta as i64);
        }
        Ok(values)
    }
}

/// Zigzag + LEB128 delta codec
#[derive(Debug, Clone, Copy, Default)]
pub struct VarIntCodec;

impl SequenceCodec for VarIntCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::VarInt
    }

    fn encode(&self, values: &[i64], out: &mut Vec<u8>) -> StorageResult<()> {
        let Some(&first) = values.first() else {
            return Ok(());
        };
        out.extend_from_slice(&first.to_le_bytes());

        let mut prev = first;
        for &value in &values[1..] {
            let mut zz = zigzag(value.wrapping_sub(prev));
            while zz >= 0x80 {
                out.push((zz as u8 & 0x7F) | 0x80);
                zz >>= 7;
            }
            out.push(zz as u8);
            prev = value;
        }
        Ok(())
    }

    fn decode(&self, bytes: &[u8], count: usize) -> StorageResult<Vec<i64>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let first = read_i64(bytes, 0)?;
        let mut values = Vec::with_capacity(count);
        values.push(first);

        let mut pos = 8;
        let mut prev = first;
        while values.len() < count {
            let mut zz = 0u64;
            let mut shift = 0u32;
            loop {
                let byte = *bytes.get(pos).ok_or_else(|| {
                    StorageError::Codec(format!(
                        "VarInt stream truncated after {} of {} values",
                        values.len(),
                        count
                    ))
                })?;
                pos += 1;
                zz |= ((byte & 0x7F) as u64) << shift;
                if byte & 0x80 == 0 {
                    break;
                }
                shift += 7;
                if shift > 63 {
                    return Err(StorageError::Codec("VarInt overflow".to_string()));
                }
            }
            prev = prev.wrapping_add(unzigzag(zz));
            values.push(prev);
        }
        Ok(values)
    }
}

/// (values per word, bits per value) indexed by selector
const SIMPLE8B_SELECTORS: [(usize, u32); 16] = [
    (240, 0),
    (120, 0),
    (60, 1),
    (30, 2),
    (20, 3),
    (15, 4),
    (12, 5),
    (10, 6),
    (8, 7),
    (7, 8),
    (6, 10),
    (5, 12),
    (4, 15),
    (3, 20),
    (2, 30),
    (1, 60),
];

const SIMPLE8B_MAX_BITS: u32 = 60;

/// Simple8b word-packed delta codec
///
/// The last word of a stream may be only partially used; decode stops at
/// the requested count.
#[derive(Debug, Clone, Copy, Default)]
pub struct Simple8bCodec;

impl Simple8bCodec {
    fn fits(value: u64, bits: u32) -> bool {
        if bits == 0 {
            value == 0
        } else {
            value >> bits == 0
        }
    }
}

impl SequenceCodec for Simple8bCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Simple8b
    }

    fn encode(&self, values: &[i64], out: &mut Vec<u8>) -> StorageResult<()> {
        let Some(&first) = values.first() else {
            return Ok(());
        };
        out.extend_from_slice(&first.to_le_bytes());

        let mut deltas = Vec::with_capacity(values.len() - 1);
        for pair in values.windows(2) {
            let delta = pair[1].wrapping_sub(pair[0]);
            let zz = zigzag(delta);
            if !Self::fits(zz, SIMPLE8B_MAX_BITS) {
                return Err(StorageError::CodecOverflow {
                    delta,
                    bits: SIMPLE8B_MAX_BITS,
                });
            }
            deltas.push(zz);
        }

        let mut pos = 0;
        while pos < deltas.len() {
            let remaining = deltas.len() - pos;
            // Selector 15 always fits, so the search cannot come up empty.
            let (selector, take, bits) = SIMPLE8B_SELECTORS
                .iter()
                .enumerate()
                .find_map(|(selector, &(n, bits))| {
                    let take = n.min(remaining);
                    deltas[pos..pos + take]
                        .iter()
                        .all(|&d| Self::fits(d, bits))
                        .then_some((selector, take, bits))
                })
                .ok_or_else(|| StorageError::Codec("No Simple8b selector fits".to_string()))?;

            let mut word = (selector as u64) << SIMPLE8B_MAX_BITS;
            for (j, &d) in deltas[pos..pos + take].iter().enumerate() {
                word |= d << (j as u32 * bits);
            }
            out.extend_from_slice(&word.to_le_bytes());
            pos += take;
        }
        Ok(())
    }

    fn decode(&self, bytes: &[u8], count: usize) -> StorageResult<Vec<i64>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let first = read_i64(bytes, 0)?;
        let mut values = Vec::with_capacity(count);
        values.push(first);

        let mut prev = first;
        for chunk in bytes[8..].chunks_exact(8) {
            if values.len() == count {
                break;
            }
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            let word = u64::from_le_bytes(buf);

            let (n, bits) = SIMPLE8B_SELECTORS[(word >> SIMPLE8B_MAX_BITS) as usize];
            let mask = if bits == 0 { 0 } else { (1u64 << bits) - 1 };
            for j in 0..n {
                if values.len() == count {
                    break;
                }
                let zz = (word >> (j as u32 * bits)) & mask;
                prev = prev.wrapping_add(unzigzag(zz));
                values.push(prev);
            }
        }

        if values.len() < count {
            return Err(StorageError::Codec(format!(
                "Simple8b stream truncated after {} of {} values",
                values.len(),
                count
            )));
        }
        Ok(values)
    }
}

/// (prefix, prefix bits, payload bits), tried in order
const DOD_CLASSES: [(u64, u32, u32); 4] = [(0b10, 2, 7), (0b110, 3, 9), (0b1110, 4, 12), (0b1111, 4, 64)];

/// Delta-of-delta bit codec
///
/// Regular intervals cost one bit per value. Any `i64` sequence round-trips:
/// deltas wrap, so there is no overflow case.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaOfDeltaCodec;

impl SequenceCodec for DeltaOfDeltaCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::DeltaOfDelta
    }

    fn encode(&self, values: &[i64], out: &mut Vec<u8>) -> StorageResult<()> {
        let Some(&first) = values.first() else {
            return Ok(());
        };
        out.extend_from_slice(&first.to_le_bytes());

        let mut bits = BitWriter::new(out);
        let mut prev_delta = 0i64;
        for pair in values.windows(2) {
            let delta = pair[1].wrapping_sub(pair[0]);
            let zz = zigzag(delta.wrapping_sub(prev_delta));
            prev_delta = delta;

            if zz == 0 {
                bits.write(0, 1);
                continue;
            }
            // the 64-bit class accepts everything
            let (prefix, prefix_bits, payload_bits) = DOD_CLASSES
                .iter()
                .copied()
                .find(|&(_, _, payload)| payload == 64 || zz >> payload == 0)
                .unwrap_or(DOD_CLASSES[3]);
            bits.write(prefix, prefix_bits);
            bits.write(zz, payload_bits);
        }
        bits.finish();
        Ok(())
    }

    fn decode(&self, bytes: &[u8], count: usize) -> StorageResult<Vec<i64>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let first = read_i64(bytes, 0)?;
        let mut values = Vec::with_capacity(count);
        values.push(first);

        let mut bits = BitReader::new(&bytes[8..]);
        let mut prev = first;
        let mut prev_delta = 0i64;
        while values.len() < count {
            let mut ones = 0;
            while ones < 4 && bits.read(1)? == 1 {
                ones += 1;
            }
            let zz = match ones {
                0 => 0,
                n => bits.read(DOD_CLASSES[n - 1].2)?,
            };
            prev_delta = prev_delta.wrapping_add(unzigzag(zz));
            prev = prev.wrapping_add(prev_delta);
            values.push(prev);
        }
        Ok(values)
    }
}

/// MSB-first bit appender; `finish` pads the last byte with zeros
struct BitWriter<'a> {
    out: &'a mut Vec<u8>,
    current: u8,
    used: u32,
}

impl<'a> BitWriter<'a> {
    fn new(out: &'a mut Vec<u8>) -> Self {
        Self {
            out,
            current: 0,
            used: 0,
        }
    }

    /// Append the low `count` bits of `value`
    fn write(&mut self, value: u64, count: u32) {
        for i in (0..count).rev() {
            self.current = (self.current << 1) | ((value >> i) & 1) as u8;
            self.used += 1;
            if self.used == 8 {
                self.out.push(self.current);
                self.current = 0;
                self.used = 0;
            }
        }
    }

    fn finish(self) {
        if self.used > 0 {
            self.out.push(self.current << (8 - self.used));
        }
    }
}

struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read(&mut self, count: u32) -> StorageResult<u64> {
        let mut value = 0u64;
        for _ in 0..count {
            let byte = *self.bytes.get(self.pos / 8).ok_or_else(|| {
                StorageError::Codec(format!(
                    "DeltaOfDelta stream truncated at bit {}",
                    self.pos
                ))
            })?;
            let bit = (byte >> (7 - self.pos % 8)) & 1;
            value = (value << 1) | bit as u64;
            self.pos += 1;
        }
        Ok(value)
    }
}

fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn read_i64(bytes: &[u8], pos: usize) -> StorageResult<i64> {
    let slice = bytes.get(pos..pos + 8).ok_or_else(|| {
        StorageError::Codec(format!(
            "Stream too short for start value: {} bytes",
            bytes.len()
        ))
    })?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(slice);
    Ok(i64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const ALL: [CodecKind; 4] = [
        CodecKind::Delta,
        CodecKind::VarInt,
        CodecKind::Simple8b,
        CodecKind::DeltaOfDelta,
    ];

    fn roundtrip(kind: CodecKind, values: &[i64]) -> Vec<i64> {
        let codec = kind.codec();
        let mut out = Vec::new();
        codec.encode(values, &mut out).unwrap();
        codec.decode(&out, values.len()).unwrap()
    }

    #[test]
    fn test_monotonic_timestamps() {
        let values: Vec<i64> = (0..1000).map(|i| 1_696_150_489_000 + i * 7).collect();
        for kind in ALL {
            assert_eq!(roundtrip(kind, &values), values, "{}", kind);
        }
    }

    #[test]
    fn test_unordered_and_repeated_values() {
        let mut rng = StdRng::seed_from_u64(17);
        let mut values: Vec<i64> = (0..500).map(|_| rng.gen_range(-50_000..50_000)).collect();
        values.extend(std::iter::repeat(12).take(300));

        for kind in ALL {
            assert_eq!(roundtrip(kind, &values), values, "{}", kind);
        }
    }

    #[test]
    fn test_empty_and_single() {
        for kind in ALL {
            assert!(roundtrip(kind, &[]).is_empty());
            assert_eq!(roundtrip(kind, &[-9]), vec![-9]);
        }
    }

    #[test]
    fn test_segments_back_to_back() {
        let first: Vec<i64> = (0..37).map(|i| i * 3).collect();
        let second: Vec<i64> = (0..12).map(|i| 900 - i).collect();

        for kind in ALL {
            let codec = kind.codec();
            let mut out = Vec::new();
            codec.encode(&first, &mut out).unwrap();
            let split = out.len();
            codec.encode(&second, &mut out).unwrap();

            assert_eq!(codec.decode(&out[..split], first.len()).unwrap(), first);
            assert_eq!(codec.decode(&out[split..], second.len()).unwrap(), second);
        }
    }

    #[test]
    fn test_simple8b_packs_runs() {
        let values = vec![7i64; 241];
        let mut out = Vec::new();
        Simple8bCodec.encode(&values, &mut out).unwrap();
        // start value + one selector-0 word for 240 zero deltas
        assert_eq!(out.len(), 16);
    }

    #[test]
    fn test_delta_of_delta_regular_intervals() {
        let values: Vec<i64> = (0..1000).map(|i| 1_696_150_489_000 + i * 60).collect();
        let mut out = Vec::new();
        DeltaOfDeltaCodec.encode(&values, &mut out).unwrap();
        // start, one 9-bit entry for the first delta, then 998 single bits
        assert_eq!(out.len(), 8 + (9 + 998 + 7) / 8);
        assert_eq!(DeltaOfDeltaCodec.decode(&out, values.len()).unwrap(), values);
    }

    #[test]
    fn test_delta_of_delta_extremes() {
        let values = vec![i64::MIN, i64::MAX, 0, -1, i64::MAX, i64::MIN, 5, 5, 6];
        let mut rng = StdRng::seed_from_u64(3);
        let mut jitter: Vec<i64> = Vec::new();
        let mut ts = 0i64;
        for _ in 0..2000 {
            ts += 1000 + rng.gen_range(-600..600);
            jitter.push(ts);
        }
        for values in [values, jitter] {
            let mut out = Vec::new();
            DeltaOfDeltaCodec.encode(&values, &mut out).unwrap();
            assert_eq!(DeltaOfDeltaCodec.decode(&out, values.len()).unwrap(), values);
        }
    }

    #[test]
    fn test_delta_overflow() {
        let values = vec![0, i32::MAX as i64 + 1];
        let mut out = Vec::new();
        let err = DeltaCodec.encode(&values, &mut out).unwrap_err();
        assert!(matches!(err, StorageError::CodecOverflow { bits: 32, .. }));
    }

    #[test]
    fn test_simple8b_overflow() {
        let values = vec![0, 1i64 << 60];
        let mut out = Vec::new();
        let err = Simple8bCodec.encode(&values, &mut out).unwrap_err();
        assert!(matches!(err, StorageError::CodecOverflow { bits: 60, .. }));
    }

    #[test]
    fn test_truncated_stream() {
        let values: Vec<i64> = (0..100).map(|i| i * 1000).collect();
        for kind in ALL {
            let codec = kind.codec();
            let mut out = Vec::new();
            codec.encode(&values, &mut out).unwrap();
            assert!(codec.decode(&out[..out.len() - 4], values.len()).is_err(), "{}", kind);
        }
    }

    #[test]
    fn test_codec_kind_parsing() {
        assert_eq!("simple8b".parse::<CodecKind>().unwrap(), CodecKind::Simple8b);
        assert_eq!("VarInt".parse::<CodecKind>().unwrap(), CodecKind::VarInt);
        assert!("lz4".parse::<CodecKind>().is_err());
        assert_eq!("delta_of_delta".parse::<CodecKind>().unwrap(), CodecKind::DeltaOfDelta);
        assert_eq!("dod".parse::<CodecKind>().unwrap(), CodecKind::DeltaOfDelta);
        assert_eq!(CodecKind::DeltaOfDelta.to_string(), "delta_of_delta");
        assert_eq!(CodecKind::try_from(3).unwrap(), CodecKind::DeltaOfDelta);
        assert_eq!(CodecKind::try_from(0).unwrap(), CodecKind::Delta);
        assert!(CodecKind::try_from(9).is_err());
    }
}
