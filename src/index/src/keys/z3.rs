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

//! Z3 index: 2D+time point curve rows `sharing? . shard . bin(2) . z(8) . id`.

use std::sync::Arc;

use strata_common::catalog::{FeatureType, IndexKind};
use strata_common::feature::Feature;
use strata_common::{StrataError, StrataResult};
use strata_curve::{TimePeriod, Z3Sfc};

use super::{
    feature_columns, null_date_error, null_geometry_error, shard_byte, shard_prefixes,
    sharing_prefix, FeatureIndex, MutationOp, RowMutation, ScanRange,
};
use crate::predicate::QueryFacets;

pub struct Z3Index {
    ft: Arc<FeatureType>,
    period: TimePeriod,
    sfc: Z3Sfc,
}

impl Z3Index {
    pub fn new(ft: Arc<FeatureType>) -> Self {
        let period = ft.z_interval().period();
        Self {
            ft,
            period,
            sfc: Z3Sfc::new(period),
        }
    }

    fn prefix_len(&self) -> usize {
        let sharing = usize::from(self.ft.table_sharing());
        let shard = usize::from(self.ft.shard_count() > 1);
        sharing + shard + 2 + 8
    }

    /// Clamp an inclusive millisecond interval to the binnable domain.
    fn clamp_interval(&self, interval: (i64, i64)) -> Option<(i64, i64)> {
        let max_millis = (u16::MAX as i64 + 1) * self.period.seconds() as i64 * 1000 - 1;
        let lo = interval.0.max(0);
        let hi = interval.1.min(max_millis);
        (lo <= hi).then_some((lo, hi))
    }
}

impl FeatureIndex for Z3Index {
    fn kind(&self) -> IndexKind {
        IndexKind::Z3
    }

    fn supports(&self, facets: &QueryFacets) -> bool {
        // a spatial-only query is served with the whole binnable time domain
        facets.has_temporal() || facets.has_spatial()
    }

    fn mutations(
        &self,
        feature: &Feature,
        serialized: &[u8],
        op: MutationOp,
    ) -> StrataResult<Vec<RowMutation>> {
        let geometry = feature
            .geometry(&self.ft)
            .ok_or_else(|| null_geometry_error(&self.ft, feature))?;
        let (x, y) = geometry
            .as_point()
            .ok_or_else(|| StrataError::serde("z3 index requires point geometries"))?;
        let millis = feature
            .timestamp(&self.ft)
            .ok_or_else(|| null_date_error(&self.ft, feature))?;
        let binned = self.period.bin(millis)?;
        let z = self.sfc.index(x, y, binned.offset)?;

        let mut row = sharing_prefix(&self.ft);
        if let Some(shard) = shard_byte(&feature.id, self.ft.shard_count()) {
            row.push(shard);
        }
        row.extend(binned.bin.to_be_bytes());
        row.extend(z.to_be_bytes());
        row.extend(feature.id.as_bytes());

        feature_columns(&self.ft, feature, serialized, &[]).map(|columns| {
            columns
                .into_iter()
                .map(|(cf, cq, visibility, value)| RowMutation {
                    row: row.clone(),
                    cf,
                    cq,
                    visibility,
                    value: match op {
                        MutationOp::Put => value,
                        MutationOp::Delete => Vec::new(),
                    },
                    op,
                })
                .collect()
        })
    }

    fn id_from_row(&self, row: &[u8]) -> StrataResult<String> {
        let prefix = self.prefix_len();
        if row.len() <= prefix {
            return Err(StrataError::serde("z3 row shorter than its prefix"));
        }
        String::from_utf8(row[prefix..].to_vec())
            .map_err(|e| StrataError::serde(format!("bad id bytes in z3 row: {e}")))
    }

    fn ranges(&self, facets: &QueryFacets, target: Option<usize>) -> StrataResult<Vec<ScanRange>> {
        let interval = facets.interval.unwrap_or((0, i64::MAX));
        let Some((lo, hi)) = self.clamp_interval(interval) else {
            return Ok(Vec::new());
        };
        let (min, max) = facets.query_envelope();
        let binned = self.period.bin_range(lo, hi)?;
        let sharing = sharing_prefix(&self.ft);

        // spread the range budget over the bins the interval touches
        let bins = (binned.hi.bin - binned.lo.bin) as usize + 1;
        let per_bin = target.map(|t| (t / bins).max(1));

        let mut out = Vec::new();
        for (bin, offset_lo, offset_hi) in binned.sub_intervals() {
            let covered =
                self.sfc
                    .ranges(min, max, (offset_lo, offset_hi), self.sfc.total_bits(), per_bin)?;
            for shard in shard_prefixes(self.ft.shard_count()) {
                let mut prefix = sharing.clone();
                if let Some(shard) = shard {
                    prefix.push(shard);
                }
                prefix.extend(bin.to_be_bytes());
                for range in &covered {
                    let mut start = prefix.clone();
                    start.extend(range.lower.to_be_bytes());
                    let mut end = prefix.clone();
                    end.extend((range.upper + 1).to_be_bytes());
                    out.push(ScanRange::new(start, end));
                }
            }
        }
        Ok(out)
    }

    fn splits(&self) -> Vec<Vec<u8>> {
        shard_prefixes(self.ft.shard_count())
            .into_iter()
            .flatten()
            .skip(1)
            .map(|shard| {
                let mut split = sharing_prefix(&self.ft);
                split.push(shard);
                split
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use strata_common::catalog::AttributeDescriptor;
    use strata_common::types::{DataType, Geometry, ScalarImpl};
    use strata_common::util::value_encoding;

    use super::*;
    use crate::predicate::Predicate;

    fn test_type() -> Arc<FeatureType> {
        Arc::new(
            FeatureType::builder("t")
                .attribute(AttributeDescriptor::new("dtg", DataType::Timestamp))
                .attribute(AttributeDescriptor::new("geom", DataType::Point))
                .shard_count(2)
                .build()
                .unwrap(),
        )
    }

    fn feature(id: &str, x: f64, y: f64, millis: i64) -> Feature {
        Feature::new(
            id,
            vec![
                Some(ScalarImpl::Timestamp(millis)),
                Some(ScalarImpl::Geometry(Geometry::point(x, y))),
            ],
        )
    }

    fn millis(s: &str) -> i64 {
        DateTime::parse_from_rfc3339(s).unwrap().timestamp_millis()
    }

    #[test]
    fn test_bin_rides_ahead_of_z() {
        let ft = test_type();
        let index = Z3Index::new(ft.clone());
        let f = feature("f0", 40.0, 60.0, millis("2010-05-07T01:00:00Z"));
        let serialized = value_encoding::serialize(&ft, &f.datums).unwrap();
        let rows = index.mutations(&f, &serialized, MutationOp::Put).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0].row;
        // shard(1) + bin(2) + z(8) + id
        assert_eq!(row.len(), 1 + 2 + 8 + 2);
        let bin = u16::from_be_bytes([row[1], row[2]]);
        assert_eq!(
            bin,
            (millis("2010-05-07T01:00:00Z") / 1000 / 604_800) as u16
        );
        assert_eq!(index.id_from_row(row).unwrap(), "f0");
    }

    #[test]
    fn test_null_date_rejected() {
        let ft = test_type();
        let index = Z3Index::new(ft.clone());
        let f = Feature::new(
            "f0",
            vec![None, Some(ScalarImpl::Geometry(Geometry::point(0.0, 0.0)))],
        );
        let serialized = value_encoding::serialize(&ft, &f.datums).unwrap();
        assert!(index.mutations(&f, &serialized, MutationOp::Put).is_err());
    }

    #[test]
    fn test_ranges_cover_rows_across_bins() {
        let ft = test_type();
        let index = Z3Index::new(ft.clone());
        let facets = crate::predicate::extract(
            &ft,
            &Default::default(),
            &[
                Predicate::bbox((35.0, 55.0), (45.0, 75.0)),
                Predicate::between(
                    millis("2010-05-07T00:00:00Z"),
                    millis("2010-05-21T00:00:00Z"),
                ),
            ],
        )
        .unwrap();
        let ranges = index.ranges(&facets, Some(32)).unwrap();
        for (i, day) in [7, 10, 14, 20].iter().enumerate() {
            let f = feature(
                &format!("f{i}"),
                40.0,
                60.0,
                millis(&format!("2010-05-{day:02}T12:00:00Z")),
            );
            let serialized = value_encoding::serialize(&ft, &f.datums).unwrap();
            let row = &index.mutations(&f, &serialized, MutationOp::Put).unwrap()[0].row;
            assert!(
                ranges.iter().any(|r| r.contains(row)),
                "row for day {day} not covered"
            );
        }
    }
}
