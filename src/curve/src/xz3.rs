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

//! XZ-ordering for spatially extended objects with a time dimension.
//!
//! The octree analogue of [`crate::xz2`]: x, y and seconds-into-period-bin.
//! One curve per period length; a geometry whose time range spans several
//! bins is indexed once per bin with that bin's clamped sub-interval.

use std::collections::VecDeque;

use crate::{merge_ranges, CoveredRange, CurveError, CurveResult, TimePeriod};

/// Octree depth. `(8^(g+1) - 1) / 7` sequence codes, which fits in 3 bytes.
const RESOLUTION: u32 = 7;

#[derive(Debug, Clone, Copy)]
pub struct Xz3Sfc {
    x_lo: f64,
    x_hi: f64,
    y_lo: f64,
    y_hi: f64,
    t_hi: f64,
    g: u32,
}

#[derive(Debug, Clone, Copy)]
struct XCell {
    min: [f64; 3],
    max: [f64; 3],
    level: u32,
    code: u64,
}

impl XCell {
    fn extended_max(&self, d: usize) -> f64 {
        self.max[d] + (self.max[d] - self.min[d])
    }
}

#[derive(Debug, Clone, Copy)]
struct QueryWindow {
    min: [f64; 3],
    max: [f64; 3],
}

impl QueryWindow {
    fn contains(&self, cell: &XCell) -> bool {
        (0..3).all(|d| self.min[d] <= cell.min[d] && self.max[d] >= cell.extended_max(d))
    }

    fn overlaps(&self, cell: &XCell) -> bool {
        (0..3).all(|d| self.min[d] <= cell.extended_max(d) && self.max[d] >= cell.min[d])
    }
}

impl Xz3Sfc {
    pub fn new(period: TimePeriod) -> Self {
        Self {
            x_lo: -180.0,
            x_hi: 180.0,
            y_lo: -90.0,
            y_hi: 90.0,
            t_hi: period.seconds() as f64,
            g: RESOLUTION,
        }
    }

    pub fn max_code(&self) -> u64 {
        self.subtree_size(0) - 1
    }

    fn subtree_size(&self, level: u32) -> u64 {
        ((1u64 << (3 * (self.g - level + 1))) - 1) / 7
    }

    fn normalize(&self, x: f64, lo: f64, hi: f64) -> CurveResult<f64> {
        if x < lo || x > hi || x.is_nan() {
            return Err(CurveError::Overflow {
                value: x,
                min: lo,
                max: hi,
            });
        }
        Ok((x - lo) / (hi - lo))
    }

    /// Sequence code of an envelope and one bin's time sub-interval.
    pub fn index(
        &self,
        (xmin, ymin): (f64, f64),
        (xmax, ymax): (f64, f64),
        (tmin, tmax): (u32, u32),
    ) -> CurveResult<u64> {
        let n = [
            (
                self.normalize(xmin, self.x_lo, self.x_hi)?,
                self.normalize(xmax, self.x_lo, self.x_hi)?,
            ),
            (
                self.normalize(ymin, self.y_lo, self.y_hi)?,
                self.normalize(ymax, self.y_lo, self.y_hi)?,
            ),
            (
                self.normalize(tmin as f64, 0.0, self.t_hi)?,
                self.normalize(tmax as f64, 0.0, self.t_hi)?,
            ),
        ];
        let length = self.cell_level(&n);
        Ok(self.sequence_code([n[0].0, n[1].0, n[2].0], length))
    }

    fn cell_level(&self, extents: &[(f64, f64); 3]) -> u32 {
        let max_dim = extents
            .iter()
            .map(|(lo, hi)| hi - lo)
            .fold(0.0f64, f64::max);
        if max_dim <= 0.0 {
            return self.g;
        }
        let l1 = (max_dim.ln() / 0.5f64.ln()).floor();
        if l1 >= self.g as f64 {
            return self.g;
        }
        let l1 = l1.max(0.0) as u32;
        let w = 0.5f64.powi(l1 as i32 + 1);
        let fits = |&(lo, hi): &(f64, f64)| hi <= (lo / w).floor() * w + 2.0 * w;
        if extents.iter().all(fits) {
            l1 + 1
        } else {
            l1
        }
    }

    fn sequence_code(&self, point: [f64; 3], length: u32) -> u64 {
        let mut min = [0.0f64; 3];
        let mut max = [1.0f64; 3];
        let mut cs = 0u64;
        for i in 0..length {
            let child_span = ((1u64 << (3 * (self.g - i))) - 1) / 7;
            let mut octant = 0u64;
            for d in 0..3 {
                let center = (min[d] + max[d]) / 2.0;
                if point[d] < center {
                    max[d] = center;
                } else {
                    octant |= 1 << d;
                    min[d] = center;
                }
            }
            cs += 1 + octant * child_span;
        }
        cs
    }

    /// Covering code ranges for a query envelope and one bin's sub-interval.
    pub fn ranges(
        &self,
        (xmin, ymin): (f64, f64),
        (xmax, ymax): (f64, f64),
        (tmin, tmax): (u32, u32),
        target: Option<usize>,
    ) -> Vec<CoveredRange> {
        if xmax < self.x_lo || xmin > self.x_hi || ymax < self.y_lo || ymin > self.y_hi {
            return Vec::new();
        }
        let nx = |v: f64| (v.clamp(self.x_lo, self.x_hi) - self.x_lo) / (self.x_hi - self.x_lo);
        let ny = |v: f64| (v.clamp(self.y_lo, self.y_hi) - self.y_lo) / (self.y_hi - self.y_lo);
        let nt = |v: f64| v.clamp(0.0, self.t_hi) / self.t_hi;
        let window = QueryWindow {
            min: [nx(xmin), ny(ymin), nt(tmin as f64)],
            max: [nx(xmax), ny(ymax), nt(tmax as f64)],
        };
        let target = target.unwrap_or(usize::MAX).max(1);

        let mut out = vec![CoveredRange::new(0, 0)];
        let mut queue: VecDeque<XCell> = VecDeque::new();
        self.push_children(
            &mut queue,
            &XCell {
                min: [0.0; 3],
                max: [1.0; 3],
                level: 0,
                code: 0,
            },
        );

        while let Some(cell) = queue.pop_front() {
            if window.contains(&cell) {
                let span = self.subtree_size(cell.level);
                out.push(CoveredRange::new(cell.code, cell.code + span - 1));
            } else if window.overlaps(&cell) {
                if cell.level == self.g {
                    out.push(CoveredRange::new(cell.code, cell.code));
                } else if out.len() + queue.len() >= target {
                    let span = self.subtree_size(cell.level);
                    out.push(CoveredRange::new(cell.code, cell.code + span - 1));
                } else {
                    out.push(CoveredRange::new(cell.code, cell.code));
                    self.push_children(&mut queue, &cell);
                }
            }
        }
        merge_ranges(out)
    }

    fn push_children(&self, queue: &mut VecDeque<XCell>, parent: &XCell) {
        let child_span = ((1u64 << (3 * (self.g - parent.level))) - 1) / 7;
        for octant in 0..8u64 {
            let mut min = parent.min;
            let mut max = parent.max;
            for d in 0..3 {
                let center = (parent.min[d] + parent.max[d]) / 2.0;
                if octant & (1 << d) == 0 {
                    max[d] = center;
                } else {
                    min[d] = center;
                }
            }
            queue.push_back(XCell {
                min,
                max,
                level: parent.level + 1,
                code: parent.code + 1 + octant * child_span,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_fit_three_bytes() {
        let sfc = Xz3Sfc::new(TimePeriod::Week);
        assert!(sfc.max_code() <= 0x00ff_ffff);
    }

    #[test]
    fn test_ranges_cover_indexed_envelopes() {
        let sfc = Xz3Sfc::new(TimePeriod::Week);
        let query = (((0.0, 0.0), (20.0, 20.0)), (100_000u32, 400_000u32));
        let ranges = sfc.ranges(query.0 .0, query.0 .1, query.1, None);
        let envelopes = [
            (((1.0, 1.0), (2.0, 2.0)), (150_000u32, 160_000u32)),
            (((5.0, 5.0), (19.0, 19.0)), (99_000, 110_000)),
            (((18.0, 18.0), (25.0, 25.0)), (399_000, 500_000)),
            (((-40.0, -40.0), (60.0, 60.0)), (0, 604_800)),
        ];
        for (env, t) in envelopes {
            let code = sfc.index(env.0, env.1, t).unwrap();
            assert!(
                ranges.iter().any(|r| r.contains(code)),
                "{env:?}/{t:?} (code {code}) not covered"
            );
        }
    }

    #[test]
    fn test_disjoint_time_not_covered() {
        let sfc = Xz3Sfc::new(TimePeriod::Week);
        let ranges = sfc.ranges((0.0, 0.0), (5.0, 5.0), (0, 10_000), None);
        let code = sfc.index((1.0, 1.0), (1.1, 1.1), (500_000, 500_100)).unwrap();
        assert!(!ranges.iter().any(|r| r.contains(code)));
    }
}
