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

//! Z2 index: 2D point curve rows `sharing? . shard . z(8) . id`.

use std::sync::Arc;

use strata_common::catalog::{FeatureType, IndexKind};
use strata_common::feature::Feature;
use strata_common::{StrataError, StrataResult};
use strata_curve::Z2Sfc;

use super::{
    feature_columns, null_geometry_error, shard_byte, shard_prefixes, sharing_prefix,
    FeatureIndex, MutationOp, RowMutation, ScanRange,
};
use crate::predicate::QueryFacets;

pub struct Z2Index {
    ft: Arc<FeatureType>,
    sfc: Z2Sfc,
}

impl Z2Index {
    pub fn new(ft: Arc<FeatureType>) -> Self {
        Self {
            ft,
            sfc: Z2Sfc::new(),
        }
    }

    fn prefix_len(&self) -> usize {
        let sharing = usize::from(self.ft.table_sharing());
        let shard = usize::from(self.ft.shard_count() > 1);
        sharing + shard + 8
    }

    fn row(&self, feature: &Feature, z: u64) -> Vec<u8> {
        let mut row = sharing_prefix(&self.ft);
        if let Some(shard) = shard_byte(&feature.id, self.ft.shard_count()) {
            row.push(shard);
        }
        row.extend(z.to_be_bytes());
        row.extend(feature.id.as_bytes());
        row
    }
}

impl FeatureIndex for Z2Index {
    fn kind(&self) -> IndexKind {
        IndexKind::Z2
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
        let (x, y) = geometry
            .as_point()
            .ok_or_else(|| StrataError::serde("z2 index requires point geometries"))?;
        let z = self.sfc.index(x, y)?;
        let row = self.row(feature, z);
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
            return Err(StrataError::serde("z2 row shorter than its prefix"));
        }
        String::from_utf8(row[prefix..].to_vec())
            .map_err(|e| StrataError::serde(format!("bad id bytes in z2 row: {e}")))
    }

    fn ranges(&self, facets: &QueryFacets, target: Option<usize>) -> StrataResult<Vec<ScanRange>> {
        let (min, max) = facets.query_envelope();
        let covered = self
            .sfc
            .ranges(min, max, self.sfc.total_bits(), target)?;
        let sharing = sharing_prefix(&self.ft);
        let mut out = Vec::with_capacity(covered.len() * self.ft.shard_count() as usize);
        for shard in shard_prefixes(self.ft.shard_count()) {
            let mut prefix = sharing.clone();
            if let Some(shard) = shard {
                prefix.push(shard);
            }
            for range in &covered {
                let mut start = prefix.clone();
                start.extend(range.lower.to_be_bytes());
                let mut end = prefix.clone();
                end.extend((range.upper + 1).to_be_bytes());
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
    use strata_common::catalog::AttributeDescriptor;
    use strata_common::types::{DataType, Geometry, ScalarImpl};
    use strata_common::util::value_encoding;

    use super::*;

    fn test_type() -> Arc<FeatureType> {
        Arc::new(
            FeatureType::builder("t")
                .attribute(AttributeDescriptor::new("geom", DataType::Point))
                .shard_count(4)
                .build()
                .unwrap(),
        )
    }

    fn feature(id: &str, x: f64, y: f64) -> Feature {
        Feature::new(id, vec![Some(ScalarImpl::Geometry(Geometry::point(x, y)))])
    }

    #[test]
    fn test_roundtrip_id() {
        let ft = test_type();
        let index = Z2Index::new(ft.clone());
        let f = feature("feature-007", 40.0, 60.0);
        let serialized = value_encoding::serialize(&ft, &f.datums).unwrap();
        let rows = index.mutations(&f, &serialized, MutationOp::Put).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(index.id_from_row(&rows[0].row).unwrap(), "feature-007");
    }

    #[test]
    fn test_deterministic_rows() {
        let ft = test_type();
        let index = Z2Index::new(ft.clone());
        let f = feature("a", 1.0, 2.0);
        let serialized = value_encoding::serialize(&ft, &f.datums).unwrap();
        let a = index.mutations(&f, &serialized, MutationOp::Put).unwrap();
        let b = index.mutations(&f, &serialized, MutationOp::Put).unwrap();
        assert_eq!(a, b);

        // moving the point moves the row; same id keeps the shard byte
        let moved = feature("a", 1.5, 2.0);
        let serialized = value_encoding::serialize(&ft, &moved.datums).unwrap();
        let c = index.mutations(&moved, &serialized, MutationOp::Put).unwrap();
        assert_ne!(a[0].row, c[0].row);
        assert_eq!(a[0].row[0], c[0].row[0]);
    }

    #[test]
    fn test_ranges_cover_written_rows() {
        let ft = test_type();
        let index = Z2Index::new(ft.clone());
        let facets = crate::predicate::extract(
            &ft,
            &Default::default(),
            &[crate::predicate::Predicate::bbox((35.0, 55.0), (45.0, 75.0))],
        )
        .unwrap();
        let ranges = index.ranges(&facets, Some(64)).unwrap();
        for (i, (x, y)) in [(40.0, 60.0), (35.0, 55.0), (44.9, 74.9)].iter().enumerate() {
            let f = feature(&format!("f{i}"), *x, *y);
            let serialized = value_encoding::serialize(&ft, &f.datums).unwrap();
            let row = &index.mutations(&f, &serialized, MutationOp::Put).unwrap()[0].row;
            assert!(
                ranges.iter().any(|r| r.contains(row)),
                "row for ({x},{y}) not covered"
            );
        }
    }
}
