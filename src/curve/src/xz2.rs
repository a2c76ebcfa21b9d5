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

//! XZ-ordering for spatially extended objects in two dimensions.
//!
//! A geometry is indexed by its smallest enclosing enlarged quadtree cell:
//! each cell owns the geometries whose envelope fits inside the cell doubled
//! to the right and up. Cells are labelled by a sequence code that orders a
//! depth-first walk of the quadtree, so a subtree is one contiguous code
//! range. The resolution is chosen so codes fit the 3-byte row field.

use std::collections::VecDeque;

use crate::{merge_ranges, CoveredRange, CurveError, CurveResult};

/// Quadtree depth. `(4^(g+1) - 1) / 3` sequence codes, which fits in 3 bytes.
const RESOLUTION: u32 = 11;

#[derive(Debug, Clone, Copy)]
pub struct Xz2Sfc {
    x_lo: f64,
    x_hi: f64,
    y_lo: f64,
    y_hi: f64,
    g: u32,
}

/// A quadtree cell in normalized `[0, 1]` space.
#[derive(Debug, Clone, Copy)]
struct XCell {
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
    level: u32,
    code: u64,
}

impl XCell {
    /// The enlarged region owned by the cell: doubled right and up.
    fn extended(&self) -> (f64, f64, f64, f64) {
        (
            self.xmin,
            self.ymin,
            self.xmax + (self.xmax - self.xmin),
            self.ymax + (self.ymax - self.ymin),
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct QueryWindow {
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
}

impl QueryWindow {
    fn contains(&self, cell: &XCell) -> bool {
        let (xmin, ymin, xmax, ymax) = cell.extended();
        self.xmin <= xmin && self.ymin <= ymin && self.xmax >= xmax && self.ymax >= ymax
    }

    fn overlaps(&self, cell: &XCell) -> bool {
        let (xmin, ymin, xmax, ymax) = cell.extended();
        self.xmin <= xmax && self.xmax >= xmin && self.ymin <= ymax && self.ymax >= ymin
    }
}

impl Default for Xz2Sfc {
    fn default() -> Self {
        Self::new()
    }
}

impl Xz2Sfc {
    pub fn new() -> Self {
        Self {
            x_lo: -180.0,
            x_hi: 180.0,
            y_lo: -90.0,
            y_hi: 90.0,
            g: RESOLUTION,
        }
    }

    /// Largest sequence code the curve can produce.
    pub fn max_code(&self) -> u64 {
        self.subtree_size(0) - 1
    }

    /// Codes spanned by the subtree rooted at a cell of the given level,
    /// including the cell itself.
    fn subtree_size(&self, level: u32) -> u64 {
        ((1u64 << (2 * (self.g - level + 1))) - 1) / 3
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

    /// Sequence code of an envelope: the label of its smallest enclosing
    /// enlarged cell.
    pub fn index(&self, (xmin, ymin): (f64, f64), (xmax, ymax): (f64, f64)) -> CurveResult<u64> {
        let nxmin = self.normalize(xmin, self.x_lo, self.x_hi)?;
        let nxmax = self.normalize(xmax, self.x_lo, self.x_hi)?;
        let nymin = self.normalize(ymin, self.y_lo, self.y_hi)?;
        let nymax = self.normalize(ymax, self.y_lo, self.y_hi)?;
        let length = self.cell_level(&[(nxmin, nxmax), (nymin, nymax)]);
        Ok(self.sequence_code(nxmin, nymin, length))
    }

    /// Deepest level whose enlarged cell encloses the (normalized) envelope.
    fn cell_level(&self, extents: &[(f64, f64)]) -> u32 {
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
        // the object may still fit one level deeper thanks to the enlargement
        let w = 0.5f64.powi(l1 as i32 + 1);
        let fits = |&(lo, hi): &(f64, f64)| hi <= (lo / w).floor() * w + 2.0 * w;
        if extents.iter().all(fits) {
            l1 + 1
        } else {
            l1
        }
    }

    fn sequence_code(&self, x: f64, y: f64, length: u32) -> u64 {
        let (mut xmin, mut ymin, mut xmax, mut ymax) = (0.0, 0.0, 1.0, 1.0);
        let mut cs = 0u64;
        for i in 0..length {
            let child_span = ((1u64 << (2 * (self.g - i))) - 1) / 3;
            let x_center = (xmin + xmax) / 2.0;
            let y_center = (ymin + ymax) / 2.0;
            let quadrant = match (x < x_center, y < y_center) {
                (true, true) => 0,
                (false, true) => 1,
                (true, false) => 2,
                (false, false) => 3,
            };
            cs += 1 + quadrant * child_span;
            if x < x_center {
                xmax = x_center
            } else {
                xmin = x_center
            }
            if y < y_center {
                ymax = y_center
            } else {
                ymin = y_center
            }
        }
        cs
    }

    /// Covering code ranges for a query envelope.
    ///
    /// Emits (a) the full subtree of every cell whose enlarged region lies
    /// inside the window and (b) the single code of every shallower cell
    /// whose enlarged region merely overlaps it, since large geometries are
    /// stored at those ancestors.
    pub fn ranges(
        &self,
        (xmin, ymin): (f64, f64),
        (xmax, ymax): (f64, f64),
        target: Option<usize>,
    ) -> Vec<CoveredRange> {
        if xmax < self.x_lo || xmin > self.x_hi || ymax < self.y_lo || ymin > self.y_hi {
            return Vec::new();
        }
        let window = QueryWindow {
            xmin: (xmin.clamp(self.x_lo, self.x_hi) - self.x_lo) / (self.x_hi - self.x_lo),
            xmax: (xmax.clamp(self.x_lo, self.x_hi) - self.x_lo) / (self.x_hi - self.x_lo),
            ymin: (ymin.clamp(self.y_lo, self.y_hi) - self.y_lo) / (self.y_hi - self.y_lo),
            ymax: (ymax.clamp(self.y_lo, self.y_hi) - self.y_lo) / (self.y_hi - self.y_lo),
        };
        let target = target.unwrap_or(usize::MAX).max(1);

        // the root always overlaps; oversized geometries live at code 0
        let mut out = vec![CoveredRange::new(0, 0)];
        let mut queue: VecDeque<XCell> = VecDeque::new();
        self.push_children(
            &mut queue,
            &XCell {
                xmin: 0.0,
                ymin: 0.0,
                xmax: 1.0,
                ymax: 1.0,
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
                    // budget reached: take the whole subtree rather than refining
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
        let child_span = ((1u64 << (2 * (self.g - parent.level))) - 1) / 3;
        let x_center = (parent.xmin + parent.xmax) / 2.0;
        let y_center = (parent.ymin + parent.ymax) / 2.0;
        for quadrant in 0..4u64 {
            let (xmin, xmax) = if quadrant % 2 == 0 {
                (parent.xmin, x_center)
            } else {
                (x_center, parent.xmax)
            };
            let (ymin, ymax) = if quadrant < 2 {
                (parent.ymin, y_center)
            } else {
                (y_center, parent.ymax)
            };
            queue.push_back(XCell {
                xmin,
                ymin,
                xmax,
                ymax,
                level: parent.level + 1,
                code: parent.code + 1 + quadrant * child_span,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_fit_three_bytes() {
        let sfc = Xz2Sfc::new();
        assert!(sfc.max_code() <= 0x00ff_ffff);
        // the whole world fits the enlarged first quadrant, one level down
        let code = sfc.index((-180.0, -90.0), (180.0, 90.0)).unwrap();
        assert_eq!(code, 1);
        let code = sfc.index((10.0, 10.0), (10.0, 10.0)).unwrap();
        assert!(code <= sfc.max_code());
    }

    #[test]
    fn test_smaller_envelope_deeper_cell() {
        let sfc = Xz2Sfc::new();
        let big = sfc.index((-10.0, -10.0), (100.0, 60.0)).unwrap();
        let small = sfc.index((10.0, 10.0), (10.5, 10.5)).unwrap();
        assert!(small > big);
    }

    #[test]
    fn test_ranges_cover_indexed_envelopes() {
        let sfc = Xz2Sfc::new();
        // query window and a batch of envelopes, some inside, some crossing
        let query = ((0.0, 0.0), (20.0, 20.0));
        let envelopes = [
            ((1.0, 1.0), (2.0, 2.0)),
            ((5.0, 5.0), (19.0, 19.0)),
            ((18.0, 18.0), (25.0, 25.0)),
            ((-40.0, -40.0), (60.0, 60.0)),
            ((0.5, 0.5), (0.6, 0.6)),
        ];
        let ranges = sfc.ranges(query.0, query.1, None);
        for env in envelopes {
            let code = sfc.index(env.0, env.1).unwrap();
            assert!(
                ranges.iter().any(|r| r.contains(code)),
                "{env:?} (code {code}) not covered"
            );
        }
    }

    #[test]
    fn test_disjoint_envelope_not_covered() {
        let sfc = Xz2Sfc::new();
        let ranges = sfc.ranges((0.0, 0.0), (5.0, 5.0), None);
        let code = sfc.index((100.0, 50.0), (101.0, 51.0)).unwrap();
        assert!(!ranges.iter().any(|r| r.contains(code)));
    }

    #[test]
    fn test_budget_still_covers() {
        let sfc = Xz2Sfc::new();
        let full = sfc.ranges((0.0, 0.0), (20.0, 20.0), None);
        let coarse = sfc.ranges((0.0, 0.0), (20.0, 20.0), Some(8));
        assert!(coarse.len() <= full.len());
        for r in &full {
            assert!(
                coarse
                    .iter()
                    .any(|c| c.lower <= r.lower && r.upper <= c.upper),
                "{r:?} lost under budget"
            );
        }
    }
}
