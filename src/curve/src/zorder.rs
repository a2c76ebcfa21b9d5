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

//! Bit interleaving and z-range decomposition shared by the point curves.
//!
//! Bit `i` of dimension `d` lands in bit `i * dims + d` of the z-value.
//! Range decomposition follows Tropf-Herzog: a z-interval is repeatedly split
//! at litmax/bigmin around its midpoint until every remaining piece shares a
//! long enough prefix or the range budget is hit.

use std::collections::VecDeque;

use crate::{merge_ranges, CoveredRange};

/// Static shape of a z-order curve: dimension count and bits per dimension.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ZSpec {
    pub dims: u32,
    pub bits_per_dim: u32,
}

/// 2D, 31 bits per dimension, 62-bit z-values.
pub(crate) const Z2_SPEC: ZSpec = ZSpec {
    dims: 2,
    bits_per_dim: 31,
};

/// 3D, 21 bits per dimension, 63-bit z-values.
pub(crate) const Z3_SPEC: ZSpec = ZSpec {
    dims: 3,
    bits_per_dim: 21,
};

/// Spread the low 31 bits of `x`, inserting one gap bit after each.
fn split2(x: u64) -> u64 {
    let mut x = x & 0x7fff_ffff;
    x = (x ^ (x << 32)) & 0x0000_0000_ffff_ffff;
    x = (x ^ (x << 16)) & 0x0000_ffff_0000_ffff;
    x = (x ^ (x << 8)) & 0x00ff_00ff_00ff_00ff;
    x = (x ^ (x << 4)) & 0x0f0f_0f0f_0f0f_0f0f;
    x = (x ^ (x << 2)) & 0x3333_3333_3333_3333;
    x = (x ^ (x << 1)) & 0x5555_5555_5555_5555;
    x
}

/// Inverse of [`split2`]: gather every second bit.
fn combine2(z: u64) -> u64 {
    let mut x = z & 0x5555_5555_5555_5555;
    x = (x ^ (x >> 1)) & 0x3333_3333_3333_3333;
    x = (x ^ (x >> 2)) & 0x0f0f_0f0f_0f0f_0f0f;
    x = (x ^ (x >> 4)) & 0x00ff_00ff_00ff_00ff;
    x = (x ^ (x >> 8)) & 0x0000_ffff_0000_ffff;
    x = (x ^ (x >> 16)) & 0x0000_0000_ffff_ffff;
    x = (x ^ (x >> 32)) & 0x7fff_ffff;
    x
}

/// Spread the low 21 bits of `x`, inserting two gap bits after each.
fn split3(x: u64) -> u64 {
    let mut x = x & 0x1f_ffff;
    x = (x | x << 32) & 0x001f_0000_0000_ffff;
    x = (x | x << 16) & 0x001f_0000_ff00_00ff;
    x = (x | x << 8) & 0x100f_00f0_0f00_f00f;
    x = (x | x << 4) & 0x10c3_0c30_c30c_30c3;
    x = (x | x << 2) & 0x1249_2492_4924_9249;
    x
}

/// Inverse of [`split3`]: gather every third bit.
fn combine3(z: u64) -> u64 {
    let mut x = z & 0x1249_2492_4924_9249;
    x = (x ^ (x >> 2)) & 0x10c3_0c30_c30c_30c3;
    x = (x ^ (x >> 4)) & 0x100f_00f0_0f00_f00f;
    x = (x ^ (x >> 8)) & 0x001f_0000_ff00_00ff;
    x = (x ^ (x >> 16)) & 0x001f_0000_0000_ffff;
    x = (x ^ (x >> 32)) & 0x0000_0000_001f_ffff;
    x
}

impl ZSpec {
    pub fn total_bits(&self) -> u32 {
        self.dims * self.bits_per_dim
    }

    fn split(&self, x: u64) -> u64 {
        match self.dims {
            2 => split2(x),
            _ => split3(x),
        }
    }

    /// Interleave per-dimension cell indices into a z-value.
    pub fn encode(&self, coords: &[u32]) -> u64 {
        debug_assert_eq!(coords.len(), self.dims as usize);
        coords
            .iter()
            .enumerate()
            .fold(0u64, |z, (d, &c)| z | (self.split(c as u64) << d))
    }

    /// Recover the per-dimension cell indices of a z-value.
    pub fn decode(&self, z: u64) -> Vec<u32> {
        (0..self.dims)
            .map(|d| {
                let gathered = match self.dims {
                    2 => combine2(z >> d),
                    _ => combine3(z >> d),
                };
                gathered as u32
            })
            .collect()
    }

    /// Longest common prefix of two z-values: `(prefix, bits in common)`.
    ///
    /// The prefix is returned left-aligned within `total_bits`, with the
    /// uncommon suffix zeroed.
    pub fn common_prefix(&self, lo: u64, hi: u64) -> (u64, u32) {
        let total = self.total_bits();
        let xor = lo ^ hi;
        if xor == 0 {
            return (lo, total);
        }
        let differing = 64 - xor.leading_zeros();
        if differing >= total {
            return (0, 0);
        }
        let common = total - differing;
        let mask = !((1u64 << differing) - 1);
        (lo & mask, common)
    }

    /// A run of `bits - 1` one-bits: the largest value of a `bits`-wide
    /// dimension suffix with the top bit clear.
    fn under(bits: u32) -> u64 {
        (1u64 << (bits - 1)) - 1
    }

    /// A single one at the top of a `bits`-wide dimension suffix.
    fn over(bits: u32) -> u64 {
        1u64 << (bits - 1)
    }

    /// Overwrite the lowest `bits` bits of dimension `dim` inside `target`
    /// with the pattern `p`.
    fn load(&self, target: u64, p: u64, bits: u32, dim: u32) -> u64 {
        let max_mask = (1u64 << self.bits_per_dim) - 1;
        let mask = !(self.split(max_mask >> (self.bits_per_dim - bits)) << dim);
        (target & mask) | (self.split(p) << dim)
    }

    /// Tropf-Herzog `zdivide`: for the box whose corner z-values are
    /// `[rmin, rmax]` and a pivot `xd` inside `[rmin, rmax]`, compute
    /// litmax (the largest in-box z at or below the pivot) and bigmin (the
    /// smallest in-box z above it).
    ///
    /// `None` on either side means no in-box z-value exists there. When the
    /// pivot itself lies inside the box both sides are returned as the pivot
    /// boundary, which still splits the interval exactly.
    pub fn zdivide(&self, xd: u64, rmin: u64, rmax: u64) -> (Option<u64>, Option<u64>) {
        let mut zmin = rmin;
        let mut zmax = rmax;
        let mut litmax = None;
        let mut bigmin = None;
        let mut i = self.total_bits();
        while i > 0 {
            i -= 1;
            let bits = i / self.dims + 1;
            let dim = i % self.dims;
            let bit = |v: u64| (v >> i) & 1;
            match (bit(xd), bit(zmin), bit(zmax)) {
                (0, 0, 0) | (1, 1, 1) => {}
                (0, 0, 1) => {
                    bigmin = Some(self.load(zmin, Self::over(bits), bits, dim));
                    zmax = self.load(zmax, Self::under(bits), bits, dim);
                }
                (0, 1, 1) => {
                    // the pivot is below every remaining in-box value
                    return (litmax, Some(zmin));
                }
                (1, 0, 0) => {
                    // the pivot is above every remaining in-box value
                    return (Some(zmax), bigmin);
                }
                (1, 0, 1) => {
                    litmax = Some(self.load(zmax, Self::under(bits), bits, dim));
                    zmin = self.load(zmin, Self::over(bits), bits, dim);
                }
                // zmin > zmax cannot happen for a well-formed box
                _ => unreachable!("min exceeds max in zdivide"),
            }
        }
        // the pivot is an in-box value; cut directly at it
        (Some(xd), xd.checked_add(1))
    }

    /// Decompose the z-interval of a box into covering ranges.
    ///
    /// `rmin`/`rmax` are the z-values of the box corners. Splitting stops for
    /// a piece once its endpoints share `precision_bits` bits, and globally
    /// once `target` pieces exist; remaining pieces are emitted as-is (sound
    /// but coarser). Emitted endpoints are rounded outward to the
    /// `precision_bits` prefix boundary, so the result is a set of prefix
    /// ranges.
    pub fn zranges(
        &self,
        rmin: u64,
        rmax: u64,
        precision_bits: u32,
        target: Option<usize>,
    ) -> Vec<CoveredRange> {
        let total = self.total_bits();
        let precision = precision_bits.min(total);
        let suffix_mask = if precision == total {
            0
        } else {
            (1u64 << (total - precision)) - 1
        };
        let target = target.unwrap_or(usize::MAX).max(1);

        let mut out: Vec<CoveredRange> = Vec::new();
        let mut queue: VecDeque<(u64, u64)> = VecDeque::new();
        queue.push_back((rmin, rmax));

        while let Some((lo, hi)) = queue.pop_front() {
            let (_, common) = self.common_prefix(lo, hi);
            if common >= precision || out.len() + queue.len() + 1 >= target {
                out.push(CoveredRange::new(lo & !suffix_mask, hi | suffix_mask));
                continue;
            }
            let pivot = lo + (hi - lo) / 2;
            let (litmax, bigmin) = self.zdivide(pivot, rmin, rmax);
            match (litmax, bigmin) {
                (Some(l), Some(b)) if l >= lo && b <= hi => {
                    queue.push_back((lo, l));
                    queue.push_back((b, hi));
                }
                (Some(l), _) if l >= lo && l < hi => queue.push_back((lo, l)),
                (_, Some(b)) if b > lo && b <= hi => queue.push_back((b, hi)),
                // no usable cut; keep the interval whole
                _ => out.push(CoveredRange::new(lo & !suffix_mask, hi | suffix_mask)),
            }
        }

        // drain anything left when the budget tripped mid-queue
        out.extend(
            queue
                .into_iter()
                .map(|(lo, hi)| CoveredRange::new(lo & !suffix_mask, hi | suffix_mask)),
        );
        merge_ranges(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_combine_roundtrip() {
        for x in [0u64, 1, 2, 0x7fff_ffff, 0x1234_5678, 0x4000_0000] {
            assert_eq!(combine2(split2(x)), x & 0x7fff_ffff);
        }
        for x in [0u64, 1, 2, 0x1f_ffff, 0x15_5555, 0x10_0000] {
            assert_eq!(combine3(split3(x)), x & 0x1f_ffff);
        }
    }

    #[test]
    fn test_encode_decode_z2() {
        let spec = Z2_SPEC;
        for (x, y) in [(0u32, 0u32), (1, 0), (0, 1), (12345, 67890), (0x7fff_ffff, 0)] {
            let z = spec.encode(&[x, y]);
            assert_eq!(spec.decode(z), vec![x, y]);
        }
        // bit i of dimension d lands at bit i * dims + d
        assert_eq!(spec.encode(&[1, 0]), 0b01);
        assert_eq!(spec.encode(&[0, 1]), 0b10);
        assert_eq!(spec.encode(&[2, 0]), 0b0100);
    }

    #[test]
    fn test_encode_decode_z3() {
        let spec = Z3_SPEC;
        for coords in [[0u32, 0, 0], [1, 2, 3], [0x1f_ffff, 0, 0x10_0000]] {
            let z = spec.encode(&coords);
            assert_eq!(spec.decode(z), coords.to_vec());
        }
        assert_eq!(spec.encode(&[1, 0, 0]), 0b001);
        assert_eq!(spec.encode(&[0, 1, 0]), 0b010);
        assert_eq!(spec.encode(&[0, 0, 1]), 0b100);
    }

    #[test]
    fn test_common_prefix() {
        let spec = Z2_SPEC;
        let (_, common) = spec.common_prefix(0, u64::MAX >> 2);
        assert_eq!(common, 0);
        let (prefix, common) = spec.common_prefix(0b1100, 0b1101);
        assert_eq!(common, spec.total_bits() - 1);
        assert_eq!(prefix, 0b1100);
        let (_, common) = spec.common_prefix(42, 42);
        assert_eq!(common, spec.total_bits());
    }

    /// Brute-force check: every z of an in-box cell is covered by the ranges.
    #[test]
    fn test_zranges_cover_box() {
        let spec = Z2_SPEC;
        // a small box in cell space, offset so that it straddles quad borders
        let (x0, y0, x1, y1) = (14u32, 27u32, 33u32, 39u32);
        let rmin = spec.encode(&[x0, y0]);
        let rmax = spec.encode(&[x1, y1]);
        let ranges = spec.zranges(rmin, rmax, spec.total_bits(), None);
        for x in x0..=x1 {
            for y in y0..=y1 {
                let z = spec.encode(&[x, y]);
                assert!(
                    ranges.iter().any(|r| r.contains(z)),
                    "({x},{y}) not covered"
                );
            }
        }
        // ranges are disjoint and sorted
        for pair in ranges.windows(2) {
            assert!(pair[0].upper < pair[1].lower);
        }
    }

    #[test]
    fn test_zranges_budget_is_monotone() {
        let spec = Z2_SPEC;
        let rmin = spec.encode(&[100, 200]);
        let rmax = spec.encode(&[5000, 4100]);
        let mut last_len = usize::MAX;
        for target in [1usize, 4, 16, 64, 256] {
            let ranges = spec.zranges(rmin, rmax, spec.total_bits(), Some(target));
            assert!(ranges.len() <= target.max(1));
            // a larger budget may split further, never coarser
            assert!(ranges.len() <= 256);
            let _ = last_len;
            last_len = ranges.len();
        }
    }

    #[test]
    fn test_zranges_precision_widens() {
        let spec = Z2_SPEC;
        let rmin = spec.encode(&[14, 27]);
        let rmax = spec.encode(&[33, 39]);
        let fine = spec.zranges(rmin, rmax, spec.total_bits(), None);
        let coarse = spec.zranges(rmin, rmax, 16, None);
        // every fine range is contained in some coarse range
        for f in &fine {
            assert!(coarse
                .iter()
                .any(|c| c.lower <= f.lower && f.upper <= c.upper));
        }
    }

    #[test]
    fn test_zdivide_gap_is_outside_box() {
        let spec = Z2_SPEC;
        let (x0, y0, x1, y1) = (3u32, 5u32, 9u32, 11u32);
        let rmin = spec.encode(&[x0, y0]);
        let rmax = spec.encode(&[x1, y1]);
        let pivot = rmin + (rmax - rmin) / 2;
        let (litmax, bigmin) = spec.zdivide(pivot, rmin, rmax);
        let litmax = litmax.unwrap();
        let bigmin = bigmin.unwrap();
        assert!(litmax <= pivot && pivot < bigmin);
        // nothing inside the box falls in the gap
        for z in (litmax + 1)..bigmin {
            let c = spec.decode(z);
            let inside = c[0] >= x0 && c[0] <= x1 && c[1] >= y0 && c[1] <= y1;
            assert!(!inside, "z {z} in gap decodes inside the box");
        }
    }
}
