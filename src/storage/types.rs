//! Core data types shared by the storage and index layers
//!
//! - `Rid`: address of a fixed-size byte record in the record store
//! - `CandidatePair`: (timestamp, rid), the unit flowing through filtering
//! - `BufferedTriple`: an indexed event waiting in the buffer pool
//! - `Candidates`: live matches plus tombstone matches from one source

use serde::{Deserialize, Serialize};
use std::fmt;

/// Record id: `(page, offset)` address of a byte record
///
/// Ordered by page, then offset. Packed into a single `u64` key as
/// `(page << 16) | offset` for the on-disk rid stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page: u32,
    pub offset: u16,
}

impl Rid {
    pub fn new(page: u32, offset: u16) -> Self {
        Self { page, offset }
    }

    /// Packed key used in rid streams
    pub fn to_key(self) -> i64 {
        ((self.page as i64) << 16) | self.offset as i64
    }

    /// Inverse of [`Rid::to_key`]
    pub fn from_key(key: i64) -> Self {
        Self {
            page: (key >> 16) as u32,
            offset: (key & 0xFFFF) as u16,
        }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page: {} offset: {}", self.page, self.offset)
    }
}

/// A candidate event: its timestamp and where its record lives
///
/// Field order matters: the derived ordering is `(timestamp, rid)`, which is
/// the order every candidate list in the crate is kept in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidatePair {
    pub timestamp: i64,
    pub rid: Rid,
}

impl CandidatePair {
    pub fn new(timestamp: i64, rid: Rid) -> Self {
        Self { timestamp, rid }
    }
}

/// An event held by the buffer pool until the next flush
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedTriple {
    pub timestamp: i64,
    pub rid: Rid,
    /// Indexed attribute values, fixed-point scaled, in index order
    pub values: Vec<i64>,
    /// Marks a replacement/deletion of the earlier event with the same timestamp
    pub tombstone: bool,
}

impl BufferedTriple {
    pub fn new(timestamp: i64, rid: Rid, values: Vec<i64>) -> Self {
        Self {
            timestamp,
            rid,
            values,
            tombstone: false,
        }
    }

    /// Builder method: mark as tombstone
    pub fn tombstone(mut self, tombstone: bool) -> Self {
        self.tombstone = tombstone;
        self
    }

    pub fn pair(&self) -> CandidatePair {
        CandidatePair::new(self.timestamp, self.rid)
    }
}

/// Matches produced by one source (a disk cluster or the buffer pool)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidates {
    /// Live events satisfying every predicate, ordered by `(timestamp, rid)`
    pub matched: Vec<CandidatePair>,
    /// Tombstones satisfying every predicate, ordered by `(timestamp, rid)`
    pub tombstones: Vec<CandidatePair>,
}

impl Candidates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.matched.is_empty() && self.tombstones.is_empty()
    }
}
