// Copyright 2025 Strata Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Space-filling curve math for the spatio-temporal row keys.
//!
//! Everything in this crate is pure: curves map real-valued coordinates into
//! lexicographically sortable integers, and decompose query windows into
//! covering ranges of those integers. No I/O, no schema knowledge.

mod zorder;

pub mod period;
pub mod xz2;
pub mod xz3;
pub mod z2;
pub mod z3;

pub use period::{BinnedTime, TimePeriod};
pub use xz2::Xz2Sfc;
pub use xz3::Xz3Sfc;
pub use z2::Z2Sfc;
pub use z3::Z3Sfc;

/// An inclusive interval `[lower, upper]` of curve positions.
///
/// Curve positions are unsigned and encoded big-endian in row keys, so
/// numeric order here equals lexicographic row order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CoveredRange {
    pub lower: u64,
    pub upper: u64,
}

impl CoveredRange {
    pub fn new(lower: u64, upper: u64) -> Self {
        debug_assert!(lower <= upper);
        Self { lower, upper }
    }

    pub fn contains(&self, z: u64) -> bool {
        self.lower <= z && z <= self.upper
    }
}

/// Sort ranges and merge any that touch or overlap.
pub(crate) fn merge_ranges(mut ranges: Vec<CoveredRange>) -> Vec<CoveredRange> {
    ranges.sort_unstable();
    let mut merged: Vec<CoveredRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.lower <= last.upper.saturating_add(1) => {
                last.upper = last.upper.max(range.upper);
            }
            _ => merged.push(range),
        }
    }
    merged
}

pub type CurveResult<T> = std::result::Result<T, CurveError>;

#[derive(Debug, thiserror::Error)]
pub enum CurveError {
    #[error("coordinate {value} outside of domain [{min}, {max}]")]
    Overflow { value: f64, min: f64, max: f64 },

    #[error("timestamp {millis}ms outside of the binnable time domain")]
    TimeOverflow { millis: i64 },
}

/// A real-valued dimension quantized to `2^bits` cells.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NormalizedDimension {
    min: f64,
    max: f64,
    bins: u64,
}

impl NormalizedDimension {
    pub(crate) fn new(min: f64, max: f64, bits: u32) -> Self {
        Self {
            min,
            max,
            bins: 1u64 << bits,
        }
    }

    /// Map a coordinate to its cell index, failing outside the domain.
    pub(crate) fn normalize(&self, x: f64) -> CurveResult<u32> {
        if x < self.min || x > self.max || x.is_nan() {
            return Err(CurveError::Overflow {
                value: x,
                min: self.min,
                max: self.max,
            });
        }
        if x == self.max {
            return Ok((self.bins - 1) as u32);
        }
        let scaled = (x - self.min) / (self.max - self.min) * self.bins as f64;
        Ok((scaled as u64).min(self.bins - 1) as u32)
    }

    /// Midpoint of the cell, the inverse of [`normalize`] up to quantization.
    pub(crate) fn denormalize(&self, i: u32) -> f64 {
        self.min + (i as f64 + 0.5) * (self.max - self.min) / self.bins as f64
    }

    /// Clamp a coordinate into the domain, used for query windows which may
    /// legitimately extend past it.
    pub(crate) fn clamp(&self, x: f64) -> f64 {
        x.clamp(self.min, self.max)
    }

    pub(crate) fn min(&self) -> f64 {
        self.min
    }

    pub(crate) fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_ranges() {
        let ranges = vec![
            CoveredRange::new(10, 20),
            CoveredRange::new(0, 4),
            CoveredRange::new(21, 30),
            CoveredRange::new(5, 5),
            CoveredRange::new(50, 60),
        ];
        let merged = merge_ranges(ranges);
        assert_eq!(
            merged,
            vec![
                CoveredRange::new(0, 5),
                CoveredRange::new(10, 30),
                CoveredRange::new(50, 60),
            ]
        );
    }

    #[test]
    fn test_normalize_bounds() {
        let dim = NormalizedDimension::new(-180.0, 180.0, 31);
        assert_eq!(dim.normalize(-180.0).unwrap(), 0);
        assert_eq!(dim.normalize(180.0).unwrap(), (1u64 << 31) as u32 - 1);
        assert!(dim.normalize(180.1).is_err());
        assert!(dim.normalize(f64::NAN).is_err());

        let x = dim.normalize(40.123).unwrap();
        let roundtrip = dim.denormalize(x);
        assert!((roundtrip - 40.123).abs() < 360.0 / (1u64 << 31) as f64);
    }
}
