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

//! XZ3 index: extended-object rows `sharing? . shard . bin(2) . z(3) . id`.

use std::collections::BTreeSet;
use std::sync::Arc;

use strata_common::catalog::{FeatureType, IndexKind};
use strata_common::feature::Feature;
use strata_common::{StrataError, StrataResult};
use strata_curve::{TimePeriod, Xz3Sfc};

use super::xz2::{code_bytes, XZ_CODE_LEN};
use super::{
    feature_columns, null_date_error, null_geometry_error, shard_byte, shard_prefixes,
    sharing_prefix, FeatureIndex, MutationOp, RowMutation, ScanRange,
};
use crate::predicate::QueryFacets;

pub struct Xz3Index {
    ft: Arc<FeatureType>,
    period: TimePeriod,
    sfc: Xz3Sfc,
}

impl Xz3Index {
    pub fn new(ft: Arc<FeatureType>) -> Self {
        let period = ft.z_interval().period();
        Self {
            ft,
            period,
            sfc: Xz3Sfc::new(period),
        }
    }

    fn prefix_len(&self) -> usize {
        let sharing = usize::from(self.ft.table_sharing());
        let shard = usize::from(self.ft.shard_count() > 1);
        sharing + shard + 2 + XZ_CODE_LEN
    }

    fn clamp_interval(&self, interval: (i64, i64)) -> Option<(i64, i64)> {
        let max_millis = (u16::MAX as i64 + 1) * self.period.seconds() as i64 * 1000 - 1;
        let lo = interval.0.max(0);
        let hi = interval.1.min(max_millis);
        (lo <= hi).then_some((lo, hi))
    }
}

impl FeatureIndex for Xz3Index {
    fn kind(&self) -> IndexKind {
        IndexKind::Xz3
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
        let millis = feature
            .timestamp(&self.ft)
            .ok_or_else(|| null_date_error(&self.ft, feature))?;
        let binned = self.period.bin(millis)?;

        // one cell per distinct (bin, covering cell) of the geometry parts
        let mut keys: BTreeSet<(u16, u64)> = BTreeSet::new();
        for part in geometry.decompose() {
            let env = part
                .envelope()
                .ok_or_else(|| StrataError::serde("cannot index an empty geometry"))?;
            let code = self.sfc.index(
                (env.min().x, env.min().y),
                (env.max().x, env.max().y),
                (binned.offset, binned.offset),
            )?;
            keys.insert((binned.bin, code));
        }
        let count = keys.len() as u16;

        let mut out = Vec::with_capacity(keys.len());
        for (bin, code) in keys {
            let mut row = sharing_prefix(&self.ft);
            if let Some(shard) = shard_byte(&feature.id, self.ft.shard_count()) {
                row.push(shard);
            }
            row.extend(bin.to_be_bytes());
            row.extend(code_bytes(code));
            row.extend(feature.id.as_bytes());

            let cq_prefix = count.to_be_bytes();
            for (cf, cq, visibility, value) in
                feature_columns(&self.ft, feature, serialized, &cq_prefix)?
            {
                out.push(RowMutation {
                    row: row.clone(),
                    cf,
                    cq,
                    visibility,
                    value: match op {
                        MutationOp::Put => value,
                        MutationOp::Delete => Vec::new(),
                    },
                    op,
                });
            }
        }
        Ok(out)
    }

    fn id_from_row(&self, row: &[u8]) -> StrataResult<String> {
        let prefix = self.prefix_len();
        if row.len() <= prefix {
            return Err(StrataError::serde("xz3 row shorter than its prefix"));
        }
        String::from_utf8(row[prefix..].to_vec())
            .map_err(|e| StrataError::serde(format!("bad id bytes in xz3 row: {e}")))
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
            let covered = self.sfc.ranges(min, max, (offset_lo, offset_hi), per_bin);
            for shard in shard_prefixes(self.ft.shard_count()) {
                let mut prefix = sharing.clone();
                if let Some(shard) = shard {
                    prefix.push(shard);
                }
                prefix.extend(bin.to_be_bytes());
                for range in &covered {
                    let mut start = prefix.clone();
                    start.extend(code_bytes(range.lower));
                    let mut end = prefix.clone();
                    end.extend(code_bytes(range.upper + 1));
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
    use geo_types::polygon;
    use strata_common::catalog::AttributeDescriptor;
    use strata_common::types::{DataType, Geometry, ScalarImpl};
    use strata_common::util::value_encoding;

    use super::*;
    use crate::predicate::Predicate;

    fn test_type() -> Arc<FeatureType> {
        Arc::new(
            FeatureType::builder("shapes")
                .attribute(AttributeDescriptor::new("dtg", DataType::Timestamp))
                .attribute(AttributeDescriptor::new("geom", DataType::Polygon))
                .shard_count(1)
                .build()
                .unwrap(),
        )
    }

    fn millis(s: &str) -> i64 {
        DateTime::parse_from_rfc3339(s).unwrap().timestamp_millis()
    }

    fn polygon_feature(id: &str, x0: f64, y0: f64, x1: f64, y1: f64, ts: i64) -> Feature {
        let poly = polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)];
        Feature::new(
            id,
            vec![
                Some(ScalarImpl::Timestamp(ts)),
                Some(ScalarImpl::Geometry(Geometry::new(
                    geo_types::Geometry::Polygon(poly),
                ))),
            ],
        )
    }

    #[test]
    fn test_row_layout_and_id() {
        let ft = test_type();
        let index = Xz3Index::new(ft.clone());
        let f = polygon_feature("poly-1", 10.0, 10.0, 12.0, 12.0, millis("2010-05-07T06:00:00Z"));
        let serialized = value_encoding::serialize(&ft, &f.datums).unwrap();
        let rows = index.mutations(&f, &serialized, MutationOp::Put).unwrap();
        assert_eq!(rows.len(), 1);
        // bin(2) + z(3) + id
        assert_eq!(rows[0].row.len(), 2 + XZ_CODE_LEN + 6);
        assert_eq!(index.id_from_row(&rows[0].row).unwrap(), "poly-1");
    }

    #[test]
    fn test_query_covers_intersecting_polygon() {
        let ft = test_type();
        let index = Xz3Index::new(ft.clone());
        let ts = millis("2010-05-07T06:00:00Z");
        let f = polygon_feature("poly-2", 18.0, 18.0, 30.0, 30.0, ts);
        let serialized = value_encoding::serialize(&ft, &f.datums).unwrap();
        let rows = index.mutations(&f, &serialized, MutationOp::Put).unwrap();

        let facets = crate::predicate::extract(
            &ft,
            &Default::default(),
            &[
                Predicate::bbox((0.0, 0.0), (20.0, 20.0)),
                Predicate::between(ts - 3_600_000, ts + 3_600_000),
            ],
        )
        .unwrap();
        let ranges = index.ranges(&facets, None).unwrap();
        for row in &rows {
            assert!(ranges.iter().any(|r| r.contains(&row.row)));
        }
    }
}
