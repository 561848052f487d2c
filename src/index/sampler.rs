//! Reservoir sample of indexed attribute values
//!
//! Keeps a uniform sample of up to `capacity` rows (Algorithm R) across all
//! event types and estimates the fraction of rows falling in a value range.
//! Estimates only steer the order in which pattern variables are resolved.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug)]
pub struct ReservoirSampler {
    capacity: usize,
    /// One column per indexed attribute
    columns: Vec<Vec<i64>>,
    rng: StdRng,
}

impl ReservoirSampler {
    pub fn new(attr_count: usize, capacity: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            capacity,
            columns: (0..attr_count)
                .map(|_| Vec::with_capacity(capacity.min(1 << 16)))
                .collect(),
            rng,
        }
    }

    /// Offer the row with zero-based arrival index `seen`
    pub fn sample(&mut self, values: &[i64], seen: u64) {
        if (seen as usize) < self.capacity {
            for (column, &v) in self.columns.iter_mut().zip(values) {
                column.push(v);
            }
            return;
        }
        let slot = self.rng.gen_range(0..=seen);
        if slot < self.capacity as u64 {
            for (column, &v) in self.columns.iter_mut().zip(values) {
                column[slot as usize] = v;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fraction of sampled values of `attr` in `[min, max]`, 1.0 with no sample
    pub fn selectivity(&self, attr: usize, min: i64, max: i64) -> f64 {
        match self.columns.get(attr) {
            Some(column) if !column.is_empty() => {
                let hits = column.iter().filter(|&&v| v >= min && v <= max).count();
                hits as f64 / column.len() as f64
            }
            _ => 1.0,
        }
    }
}
