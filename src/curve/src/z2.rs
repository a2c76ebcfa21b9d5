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

//! Two-dimensional z-order curve over longitude/latitude points.

use crate::zorder::{ZSpec, Z2_SPEC};
use crate::{CoveredRange, CurveResult, NormalizedDimension};

/// Z-order curve over `[-180, 180] x [-90, 90]` at 31 bits per dimension.
#[derive(Debug, Clone, Copy)]
pub struct Z2Sfc {
    lon: NormalizedDimension,
    lat: NormalizedDimension,
    spec: ZSpec,
}

impl Default for Z2Sfc {
    fn default() -> Self {
        Self::new()
    }
}

impl Z2Sfc {
    pub fn new() -> Self {
        Self {
            lon: NormalizedDimension::new(-180.0, 180.0, Z2_SPEC.bits_per_dim),
            lat: NormalizedDimension::new(-90.0, 90.0, Z2_SPEC.bits_per_dim),
            spec: Z2_SPEC,
        }
    }

    /// Total bits of precision carried by a z-value.
    pub fn total_bits(&self) -> u32 {
        self.spec.total_bits()
    }

    /// Curve position of a point. Fails outside the lon/lat domain.
    pub fn index(&self, lon: f64, lat: f64) -> CurveResult<u64> {
        let x = self.lon.normalize(lon)?;
        let y = self.lat.normalize(lat)?;
        Ok(self.spec.encode(&[x, y]))
    }

    /// Midpoint of the cell a curve position addresses.
    pub fn invert(&self, z: u64) -> (f64, f64) {
        let coords = self.spec.decode(z);
        (self.lon.denormalize(coords[0]), self.lat.denormalize(coords[1]))
    }

    /// Covering ranges for a query window, clamped to the domain.
    ///
    /// Returns an empty set when the window is disjoint from the domain.
    pub fn ranges(
        &self,
        (xmin, ymin): (f64, f64),
        (xmax, ymax): (f64, f64),
        precision_bits: u32,
        target: Option<usize>,
    ) -> CurveResult<Vec<CoveredRange>> {
        if xmax < self.lon.min() || xmin > self.lon.max() || ymax < self.lat.min() || ymin > self.lat.max() {
            return Ok(Vec::new());
        }
        let rmin = self.spec.encode(&[
            self.lon.normalize(self.lon.clamp(xmin))?,
            self.lat.normalize(self.lat.clamp(ymin))?,
        ]);
        let rmax = self.spec.encode(&[
            self.lon.normalize(self.lon.clamp(xmax))?,
            self.lat.normalize(self.lat.clamp(ymax))?,
        ]);
        Ok(self.spec.zranges(rmin, rmax, precision_bits, target))
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn test_index_invert_roundtrip() {
        let sfc = Z2Sfc::new();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let lon_res = 360.0 / (1u64 << 31) as f64;
        let lat_res = 180.0 / (1u64 << 31) as f64;
        for _ in 0..1000 {
            let lon = rng.gen_range(-180.0..=180.0);
            let lat = rng.gen_range(-90.0..=90.0);
            let (rlon, rlat) = sfc.invert(sfc.index(lon, lat).unwrap());
            assert!((rlon - lon).abs() <= lon_res, "{lon} vs {rlon}");
            assert!((rlat - lat).abs() <= lat_res, "{lat} vs {rlat}");
        }
    }

    #[test]
    fn test_index_rejects_out_of_domain() {
        let sfc = Z2Sfc::new();
        assert!(sfc.index(-180.01, 0.0).is_err());
        assert!(sfc.index(0.0, 90.01).is_err());
        assert!(sfc.index(180.0, 90.0).is_ok());
    }

    #[test]
    fn test_ranges_cover_points() {
        let sfc = Z2Sfc::new();
        let (lo, hi) = ((35.0, 55.0), (45.0, 75.0));
        let ranges = sfc.ranges(lo, hi, sfc.total_bits(), Some(200)).unwrap();
        assert!(!ranges.is_empty());
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let lon = rng.gen_range(lo.0..=hi.0);
            let lat = rng.gen_range(lo.1..=hi.1);
            let z = sfc.index(lon, lat).unwrap();
            assert!(ranges.iter().any(|r| r.contains(z)));
        }
    }

    #[test]
    fn test_ranges_disjoint_window() {
        let sfc = Z2Sfc::new();
        let ranges = sfc.ranges((200.0, 95.0), (210.0, 99.0), 62, None).unwrap();
        assert!(ranges.is_empty());
    }
}
