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

//! In-stream aggregators: density grids, packed track records and
//! deterministic sampling.

use byteorder::{BigEndian, ByteOrder};
use strata_common::catalog::FeatureType;
use strata_common::feature::Feature;
use strata_common::types::ScalarImpl;
use strata_index::hints::{BinOptions, DensityOptions, SamplingOptions};
use strata_index::predicate::Envelope;

/// The output of a density aggregation: a `width x height` grid of weights
/// over the requested envelope, row-major from the south-west corner.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityGrid {
    pub width: u32,
    pub height: u32,
    pub envelope: Envelope,
    pub weights: Vec<f64>,
}

pub(crate) struct DensityAccumulator {
    options: DensityOptions,
    weight_idx: Option<usize>,
    weights: Vec<f64>,
}

impl DensityAccumulator {
    pub fn new(ft: &FeatureType, options: DensityOptions) -> Self {
        let weight_idx = options
            .weight
            .as_deref()
            .and_then(|name| ft.attribute_index(name));
        let cells = options.width as usize * options.height as usize;
        Self {
            options,
            weight_idx,
            weights: vec![0.0; cells],
        }
    }

    pub fn add(&mut self, ft: &FeatureType, feature: &Feature) {
        let Some(geometry) = feature.geometry(ft) else {
            return;
        };
        let Some(env) = geometry.envelope() else {
            return;
        };
        // a non-point contributes at its envelope centre
        let x = (env.min().x + env.max().x) / 2.0;
        let y = (env.min().y + env.max().y) / 2.0;
        let ((xmin, ymin), (xmax, ymax)) = self.options.envelope;
        if x < xmin || x > xmax || y < ymin || y > ymax {
            return;
        }
        let col = ((x - xmin) / (xmax - xmin) * self.options.width as f64)
            .min(self.options.width as f64 - 1.0) as usize;
        let row = ((y - ymin) / (ymax - ymin) * self.options.height as f64)
            .min(self.options.height as f64 - 1.0) as usize;
        let weight = match self.weight_idx.and_then(|idx| feature.datums[idx].as_ref()) {
            Some(ScalarImpl::Int32(v)) => *v as f64,
            Some(ScalarImpl::Int64(v)) => *v as f64,
            Some(ScalarImpl::Float32(v)) => *v as f64,
            Some(ScalarImpl::Float64(v)) => *v,
            _ => 1.0,
        };
        self.weights[row * self.options.width as usize + col] += weight;
    }

    pub fn finish(self) -> DensityGrid {
        DensityGrid {
            width: self.options.width,
            height: self.options.height,
            envelope: self.options.envelope,
            weights: self.weights,
        }
    }
}

/// Width of a track record without a label.
pub const BIN_RECORD_LEN: usize = 16;
/// Width of a track record with a label.
pub const BIN_LABELED_RECORD_LEN: usize = 24;

#[derive(Debug, Clone, Copy)]
struct BinRecord {
    track_id: u32,
    /// Seconds since the epoch.
    ts: u32,
    lat: f32,
    lon: f32,
    label: Option<u64>,
}

/// Packs features into 16/24-byte track records, chunked for streaming.
pub(crate) struct BinAccumulator {
    track_idx: usize,
    label_idx: Option<usize>,
    sort: bool,
    chunk_rows: usize,
    chunk: Vec<BinRecord>,
}

impl BinAccumulator {
    pub fn new(ft: &FeatureType, options: &BinOptions, chunk_rows: usize) -> Self {
        let track_idx = ft
            .attribute_index(&options.track)
            .expect("validated by the planner");
        let label_idx = options
            .label
            .as_deref()
            .and_then(|name| ft.attribute_index(name));
        Self {
            track_idx,
            label_idx,
            sort: options.sort,
            chunk_rows: chunk_rows.max(1),
            chunk: Vec::new(),
        }
    }

    /// Add a feature; returns a packed chunk when one fills up.
    pub fn add(&mut self, ft: &FeatureType, feature: &Feature) -> Option<Vec<u8>> {
        let (lon, lat) = feature
            .geometry(ft)
            .and_then(|g| g.envelope())
            .map(|env| {
                (
                    (env.min().x + env.max().x) / 2.0,
                    (env.min().y + env.max().y) / 2.0,
                )
            })?;
        let ts = feature.timestamp(ft).unwrap_or(0).div_euclid(1000).max(0) as u32;
        let track_id = match &feature.datums[self.track_idx] {
            Some(value) => scalar_hash(value),
            None => crc32fast::hash(feature.id.as_bytes()),
        };
        let label = self.label_idx.map(|idx| match &feature.datums[idx] {
            Some(ScalarImpl::Int32(v)) => *v as u64,
            Some(ScalarImpl::Int64(v)) => *v as u64,
            Some(value) => scalar_hash(value) as u64,
            None => 0,
        });
        self.chunk.push(BinRecord {
            track_id,
            ts,
            lat: lat as f32,
            lon: lon as f32,
            label,
        });
        (self.chunk.len() >= self.chunk_rows).then(|| self.pack())
    }

    pub fn finish(mut self) -> Option<Vec<u8>> {
        (!self.chunk.is_empty()).then(|| self.pack())
    }

    fn pack(&mut self) -> Vec<u8> {
        if self.sort {
            self.chunk.sort_by_key(|r| r.ts);
        }
        let record_len = if self.label_idx.is_some() {
            BIN_LABELED_RECORD_LEN
        } else {
            BIN_RECORD_LEN
        };
        let mut out = vec![0u8; self.chunk.len() * record_len];
        for (i, record) in self.chunk.drain(..).enumerate() {
            let base = i * record_len;
            BigEndian::write_u32(&mut out[base..], record.track_id);
            BigEndian::write_u32(&mut out[base + 4..], record.ts);
            BigEndian::write_f32(&mut out[base + 8..], record.lat);
            BigEndian::write_f32(&mut out[base + 12..], record.lon);
            if let Some(label) = record.label {
                BigEndian::write_u64(&mut out[base + 16..], label);
            }
        }
        out
    }
}

fn scalar_hash(value: &ScalarImpl) -> u32 {
    crc32fast::hash(format!("{value:?}").as_bytes())
}

/// Deterministic sampling: keep when `hash(key) < fraction * 2^32`.
pub(crate) fn sample_keep(
    ft: &FeatureType,
    options: &SamplingOptions,
    feature: &Feature,
) -> bool {
    let hash = match options
        .sample_by
        .as_deref()
        .and_then(|name| ft.attribute_index(name))
        .and_then(|idx| feature.datums[idx].as_ref())
    {
        Some(value) => scalar_hash(value),
        None => crc32fast::hash(feature.id.as_bytes()),
    };
    (hash as u64) < (options.fraction as f64 * (1u64 << 32) as f64) as u64
}

#[cfg(test)]
mod tests {
    use strata_common::catalog::AttributeDescriptor;
    use strata_common::types::{DataType, Geometry};

    use super::*;

    fn test_type() -> FeatureType {
        FeatureType::builder("t")
            .attribute(AttributeDescriptor::new("track", DataType::Varchar))
            .attribute(AttributeDescriptor::new("dtg", DataType::Timestamp))
            .attribute(AttributeDescriptor::new("geom", DataType::Point))
            .build()
            .unwrap()
    }

    fn feature(id: &str, track: &str, ts: i64, x: f64, y: f64) -> Feature {
        Feature::new(
            id,
            vec![
                Some(ScalarImpl::Varchar(track.into())),
                Some(ScalarImpl::Timestamp(ts)),
                Some(ScalarImpl::Geometry(Geometry::point(x, y))),
            ],
        )
    }

    #[test]
    fn test_density_counts_cells() {
        let ft = test_type();
        let mut acc = DensityAccumulator::new(
            &ft,
            DensityOptions {
                width: 10,
                height: 10,
                envelope: ((0.0, 0.0), (10.0, 10.0)),
                weight: None,
            },
        );
        acc.add(&ft, &feature("a", "t1", 0, 0.5, 0.5));
        acc.add(&ft, &feature("b", "t1", 0, 0.6, 0.6));
        acc.add(&ft, &feature("c", "t1", 0, 9.5, 9.5));
        acc.add(&ft, &feature("d", "t1", 0, 50.0, 50.0));
        let grid = acc.finish();
        assert_eq!(grid.weights[0], 2.0);
        assert_eq!(grid.weights[99], 1.0);
        assert_eq!(grid.weights.iter().sum::<f64>(), 3.0);
    }

    #[test]
    fn test_bin_record_packing_and_sort() {
        let ft = test_type();
        let mut acc = BinAccumulator::new(
            &ft,
            &BinOptions {
                track: "track".into(),
                label: None,
                sort: true,
            },
            100,
        );
        assert!(acc.add(&ft, &feature("a", "t1", 5_000, 40.0, 60.0)).is_none());
        assert!(acc.add(&ft, &feature("b", "t1", 2_000, 41.0, 61.0)).is_none());
        let chunk = acc.finish().unwrap();
        assert_eq!(chunk.len(), 2 * BIN_RECORD_LEN);
        // sorted by timestamp
        let ts0 = BigEndian::read_u32(&chunk[4..]);
        let ts1 = BigEndian::read_u32(&chunk[BIN_RECORD_LEN + 4..]);
        assert_eq!((ts0, ts1), (2, 5));
        // same track hashes to the same id
        let t0 = BigEndian::read_u32(&chunk[0..]);
        let t1 = BigEndian::read_u32(&chunk[BIN_RECORD_LEN..]);
        assert_eq!(t0, t1);
    }

    #[test]
    fn test_sampling_deterministic_and_fractional() {
        let ft = test_type();
        let options = SamplingOptions {
            fraction: 0.5,
            sample_by: None,
        };
        let kept: Vec<bool> = (0..1000)
            .map(|i| sample_keep(&ft, &options, &feature(&format!("f{i}"), "t", 0, 0.0, 0.0)))
            .collect();
        let again: Vec<bool> = (0..1000)
            .map(|i| sample_keep(&ft, &options, &feature(&format!("f{i}"), "t", 0, 0.0, 0.0)))
            .collect();
        assert_eq!(kept, again);
        let count = kept.iter().filter(|k| **k).count();
        assert!((300..700).contains(&count), "kept {count} of 1000");

        assert!(!sample_keep(
            &ft,
            &SamplingOptions {
                fraction: 0.0,
                sample_by: None
            },
            &feature("x", "t", 0, 0.0, 0.0)
        ));
    }
}
