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

//! Three-dimensional z-order curve over longitude/latitude/time points.
//!
//! The time dimension covers the seconds of a single period bin; one curve
//! instance exists per period length, and the bin id rides ahead of the
//! z-value in the row key.

use crate::zorder::{ZSpec, Z3_SPEC};
use crate::{CoveredRange, CurveResult, NormalizedDimension, TimePeriod};

#[derive(Debug, Clone, Copy)]
pub struct Z3Sfc {
    lon: NormalizedDimension,
    lat: NormalizedDimension,
    time: NormalizedDimension,
    spec: ZSpec,
}

impl Z3Sfc {
    pub fn new(period: TimePeriod) -> Self {
        let bits = Z3_SPEC.bits_per_dim;
        Self {
            lon: NormalizedDimension::new(-180.0, 180.0, bits),
            lat: NormalizedDimension::new(-90.0, 90.0, bits),
            time: NormalizedDimension::new(0.0, period.seconds() as f64, bits),
            spec: Z3_SPEC,
        }
    }

    pub fn total_bits(&self) -> u32 {
        self.spec.total_bits()
    }

    /// Curve position of a point at `offset_secs` into its period bin.
    pub fn index(&self, lon: f64, lat: f64, offset_secs: u32) -> CurveResult<u64> {
        let x = self.lon.normalize(lon)?;
        let y = self.lat.normalize(lat)?;
        let t = self.time.normalize(offset_secs as f64)?;
        Ok(self.spec.encode(&[x, y, t]))
    }

    /// Midpoints of the cell a curve position addresses.
    pub fn invert(&self, z: u64) -> (f64, f64, f64) {
        let coords = self.spec.decode(z);
        (
            self.lon.denormalize(coords[0]),
            self.lat.denormalize(coords[1]),
            self.time.denormalize(coords[2]),
        )
    }

    /// Covering ranges for a spatial window and one bin's time sub-interval.
    pub fn ranges(
        &self,
        (xmin, ymin): (f64, f64),
        (xmax, ymax): (f64, f64),
        (tmin, tmax): (u32, u32),
        precision_bits: u32,
        target: Option<usize>,
    ) -> CurveResult<Vec<CoveredRange>> {
        if xmax < self.lon.min()
            || xmin > self.lon.max()
            || ymax < self.lat.min()
            || ymin > self.lat.max()
        {
            return Ok(Vec::new());
        }
        let rmin = self.spec.encode(&[
            self.lon.normalize(self.lon.clamp(xmin))?,
            self.lat.normalize(self.lat.clamp(ymin))?,
            self.time.normalize(self.time.clamp(tmin as f64))?,
        ]);
        let rmax = self.spec.encode(&[
            self.lon.normalize(self.lon.clamp(xmax))?,
            self.lat.normalize(self.lat.clamp(ymax))?,
            self.time.normalize(self.time.clamp(tmax as f64))?,
        ]);
        Ok(self.spec.zranges(rmin, rmax, precision_bits, target))
    }
}
