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

//! XZ2 index: extended-object rows `sharing? . shard . z(3) . id`.
//!
//! One row per distinct covering cell of the geometry's parts; the column
//! qualifier carries the duplication count so readers know to dedupe.

use std::collections::BTreeSet;
use std::sync::Arc;

use strata_common::catalog::{FeatureType, IndexKind};
use strata_common::feature::Feature;
use strata_common::types::Geometry;
use strata_common::{StrataError, StrataResult};
use strata_curve::Xz2Sfc;

use super::{
    feature_columns, null_geometry_error, shard_byte, shard_prefixes, sharing_prefix,
    FeatureIndex, MutationOp, RowMutation, ScanRange,
};
use crate::predicate::QueryFacets;

/// Width of the sequence-code field in the row key.
pub(crate) const XZ_CODE_LEN: usize = 3;

pub(crate) fn code_bytes(code: u64) -> [u8; XZ_CODE_LEN] {
    let bytes = code.to_be_bytes();
    [bytes[5], bytes[6], bytes[7]]
}

pub struct Xz2Index {
    ft: Arc<FeatureType>,
    sfc: Xz2Sfc,
}

impl Xz2Index {
    pub fn new(ft: Arc<FeatureType>) -> Self {
        Self {
            ft,
            sfc: Xz2Sfc::new(),
        }
    }

    fn prefix_len(&self) -> usize {
        let sharing = usize::from(self.ft.table_sharing());
        let shard = usize::from(self.ft.shard_count() > 1);
        sharing + shard + XZ_CODE_LEN
    }

    /// Distinct covering cells of the geometry's top-level parts.
    pub(crate) fn covering_codes(&self, geometry: &Geometry) -> StrataResult<BTreeSet<u64>> {
        let mut codes = BTreeSet::new();
        for part in geometry.decompose() {
            let env = part
                .envelope()
                .ok_or_else(|| StrataError::serde("cannot index an empty geometry"))?;
            codes.insert(
                self.sfc
                    .index((env.min().x, env.min().y), (env.max().x, env.max().y))?,
            );
        }
        Ok(codes)
    }
}

impl FeatureIndex for Xz2Index {
    fn kind(&self) -> IndexKind {
        IndexKind::Xz2
    }

    fn supports(&self, facets: &QueryFacets) -> bool {
        facets.has_spatial()
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
        let codes = self.covering_codes(geometry)?;
        let count = codes.len() as u16;

        let mut out = Vec::with_capacity(codes.len());
        for code in codes {
            let mut row = sharing_prefix(&self.ft);
            if let Some(shard) = shard_byte(&feature.id, self.ft.shard_count()) {
                row.push(shard);
            }
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
            return Err(StrataError::serde("xz2 row shorter than its prefix"));
        }
        String::from_utf8(row[prefix..].to_vec())
            .map_err(|e| StrataError::serde(format!("bad id bytes in xz2 row: {e}")))
    }

    fn ranges(&self, facets: &QueryFacets, target: Option<usize>) -> StrataResult<Vec<ScanRange>> {
        let (min, max) = facets.query_envelope();
        let covered = self.sfc.ranges(min, max, target);
        let sharing = sharing_prefix(&self.ft);
        let mut out = Vec::with_capacity(covered.len() * self.ft.shard_count() as usize);
        for shard in shard_prefixes(self.ft.shard_count()) {
            let mut prefix = sharing.clone();
            if let Some(shard) = shard {
                prefix.push(shard);
            }
            for range in &covered {
                let mut start = prefix.clone();
                start.extend(code_bytes(range.lower));
                let mut end = prefix.clone();
                end.extend(code_bytes(range.upper + 1));
                out.push(ScanRange::new(start, end));
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
    use geo_types::{polygon, MultiPolygon};
    use strata_common::catalog::AttributeDescriptor;
    use strata_common::types::{DataType, ScalarImpl};
    use strata_common::util::value_encoding;

    use super::*;
    use crate::predicate::Predicate;

    fn test_type() -> Arc<FeatureType> {
        Arc::new(
            FeatureType::builder("shapes")
                .attribute(AttributeDescriptor::new("geom", DataType::Polygon))
                .shard_count(1)
                .build()
                .unwrap(),
        )
    }

    fn polygon_feature(id: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> Feature {
        let poly = polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)];
        Feature::new(
            id,
            vec![Some(ScalarImpl::Geometry(Geometry::new(
                geo_types::Geometry::Polygon(poly),
            )))],
        )
    }

    #[test]
    fn test_single_row_per_cell_with_count() {
        let ft = test_type();
        let index = Xz2Index::new(ft.clone());
        let f = polygon_feature("p0", 10.0, 10.0, 11.0, 11.0);
        let serialized = value_encoding::serialize(&ft, &f.datums).unwrap();
        let rows = index.mutations(&f, &serialized, MutationOp::Put).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cq, 1u16.to_be_bytes());
        assert_eq!(index.id_from_row(&rows[0].row).unwrap(), "p0");
        // z portion is exactly three bytes
        assert_eq!(rows[0].row.len(), XZ_CODE_LEN + 2);
    }

    #[test]
    fn test_multi_part_dedupes_cells() {
        let ft = Arc::new(
            FeatureType::builder("shapes")
                .attribute(AttributeDescriptor::new("geom", DataType::MultiPolygon))
                .shard_count(1)
                .build()
                .unwrap(),
        );
        let index = Xz2Index::new(ft.clone());
        let a = polygon![(x: 10.0, y: 10.0), (x: 11.0, y: 10.0), (x: 11.0, y: 11.0)];
        let b = polygon![(x: 100.0, y: 50.0), (x: 101.0, y: 50.0), (x: 101.0, y: 51.0)];
        let f = Feature::new(
            "m0",
            vec![Some(ScalarImpl::Geometry(Geometry::new(
                geo_types::Geometry::MultiPolygon(MultiPolygon(vec![a.clone(), b])),
            )))],
        );
        let serialized = value_encoding::serialize(&ft, &f.datums).unwrap();
        let rows = index.mutations(&f, &serialized, MutationOp::Put).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cq, 2u16.to_be_bytes());

        // identical parts collapse to one row
        let f2 = Feature::new(
            "m1",
            vec![Some(ScalarImpl::Geometry(Geometry::new(
                geo_types::Geometry::MultiPolygon(MultiPolygon(vec![a.clone(), a])),
            )))],
        );
        let serialized = value_encoding::serialize(&ft, &f2.datums).unwrap();
        let rows = index.mutations(&f2, &serialized, MutationOp::Put).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_query_ranges_cover_written_polygon() {
        let ft = test_type();
        let index = Xz2Index::new(ft.clone());
        // polygon crossing the query edge
        let f = polygon_feature("p1", 18.0, 18.0, 30.0, 30.0);
        let serialized = value_encoding::serialize(&ft, &f.datums).unwrap();
        let rows = index.mutations(&f, &serialized, MutationOp::Put).unwrap();

        let facets = crate::predicate::extract(
            &ft,
            &Default::default(),
            &[Predicate::bbox((0.0, 0.0), (20.0, 20.0))],
        )
        .unwrap();
        let ranges = index.ranges(&facets, None).unwrap();
        for row in &rows {
            assert!(ranges.iter().any(|r| r.contains(&row.row)));
        }
    }
}
