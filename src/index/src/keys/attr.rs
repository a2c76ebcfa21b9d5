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

//! Attribute index: rows
//! `sharing? . attrIdx(2) . lexEncode(value) . 0x00 . dateField(12)? . id`.
//!
//! One row per indexed value; list attributes expand one row per distinct
//! element. Join rows carry a geometry+date projection in the index-value
//! column family; full rows carry the whole serialized feature.

use std::collections::BTreeSet;
use std::sync::Arc;

use strata_common::catalog::{
    AttributeDescriptor, FeatureType, IndexCoverage, IndexKind,
};
use strata_common::feature::Feature;
use strata_common::types::{DataType, Datum, ScalarImpl};
use strata_common::util::{lex, value_encoding};
use strata_common::{StrataError, StrataResult};

use super::{
    feature_columns, sharing_prefix, ColumnFamily, FeatureIndex, MutationOp, RowMutation,
    ScanRange,
};
use crate::predicate::{AttrOp, QueryFacets};

pub struct AttrIndex {
    ft: Arc<FeatureType>,
    /// Shape of the join rows' index-value payload: the default geometry
    /// plus the default date.
    index_value_type: FeatureType,
}

impl AttrIndex {
    pub fn new(ft: Arc<FeatureType>) -> Self {
        let index_value_type = index_value_type(&ft);
        Self {
            ft,
            index_value_type,
        }
    }

    pub fn index_value_type(&self) -> &FeatureType {
        &self.index_value_type
    }

    fn has_date_field(&self) -> bool {
        self.ft.default_date().is_some()
    }

    fn base_prefix(&self, attr_index: u16) -> Vec<u8> {
        let mut prefix = sharing_prefix(&self.ft);
        prefix.extend(attr_index.to_be_bytes());
        prefix
    }

    fn row(
        &self,
        attr_index: u16,
        value: &ScalarImpl,
        timestamp: Option<i64>,
        id: &str,
    ) -> StrataResult<Vec<u8>> {
        let mut row = self.base_prefix(attr_index);
        lex::encode(value, &mut row)?;
        row.push(0x00);
        if self.has_date_field() {
            let millis = timestamp.unwrap_or(0);
            row.extend(lex::encode_timestamp_field(millis)?);
        }
        row.extend(id.as_bytes());
        Ok(row)
    }

    /// The value payload of a join row: geometry + date, enough for spatial
    /// and temporal residuals without fetching the full feature.
    pub fn encode_index_value(&self, feature: &Feature) -> StrataResult<Vec<u8>> {
        let mut datums: Vec<Datum> =
            vec![feature.datums[self.ft.default_geometry()].clone()];
        if let Some(date_idx) = self.ft.default_date() {
            datums.push(feature.datums[date_idx].clone());
        }
        value_encoding::serialize(&self.index_value_type, &datums)
    }

    /// Decode a join row's payload back into a sparse datum vector aligned
    /// with the full feature type.
    pub fn decode_index_value(&self, bytes: &[u8]) -> StrataResult<Vec<Datum>> {
        let projected = value_encoding::deserialize(&self.index_value_type, bytes)?;
        let mut datums = vec![None; self.ft.attributes().len()];
        let mut iter = projected.into_iter();
        datums[self.ft.default_geometry()] = iter.next().flatten();
        if let Some(date_idx) = self.ft.default_date() {
            datums[date_idx] = iter.next().flatten();
        }
        Ok(datums)
    }

    /// The values one datum contributes to the index: the scalar itself, or
    /// the distinct elements of a list.
    fn indexed_values(datum: &Datum) -> Vec<&ScalarImpl> {
        match datum {
            None => Vec::new(),
            Some(ScalarImpl::List(items)) => {
                let mut seen = BTreeSet::new();
                items
                    .iter()
                    .filter(|item| seen.insert(format!("{item:?}")))
                    .collect()
            }
            Some(value) => vec![value],
        }
    }

    fn element_type(descriptor: &AttributeDescriptor) -> &DataType {
        match &descriptor.data_type {
            DataType::List(element) => element,
            dt => dt,
        }
    }
}

/// Shape of the index-value projection: default geometry plus default date.
fn index_value_type(ft: &FeatureType) -> FeatureType {
    let mut builder = FeatureType::builder(format!("{}-iv", ft.name()))
        .attribute(ft.default_geometry_attr().clone())
        .default_geometry(ft.default_geometry_attr().name.clone());
    if let Some(date_idx) = ft.default_date() {
        let date_attr = ft.attribute(date_idx);
        builder = builder
            .attribute(AttributeDescriptor::new(
                date_attr.name.clone(),
                DataType::Timestamp,
            ))
            .default_date(date_attr.name.clone());
    }
    builder
        .enabled_indexes(vec![IndexKind::Id])
        .build()
        .expect("projection of a validated type is valid")
}

impl FeatureIndex for AttrIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Attribute
    }

    fn supports(&self, facets: &QueryFacets) -> bool {
        facets.best_attr_target().is_some()
    }

    fn mutations(
        &self,
        feature: &Feature,
        serialized: &[u8],
        op: MutationOp,
    ) -> StrataResult<Vec<RowMutation>> {
        let timestamp = feature.timestamp(&self.ft);
        let mut out = Vec::new();
        for (idx, descriptor) in self.ft.attributes().iter().enumerate() {
            if descriptor.coverage == IndexCoverage::None {
                continue;
            }
            for value in Self::indexed_values(&feature.datums[idx]) {
                let row = self.row(idx as u16, value, timestamp, &feature.id)?;
                match descriptor.coverage {
                    IndexCoverage::Full => {
                        for (cf, cq, visibility, value) in
                            feature_columns(&self.ft, feature, serialized, &[])?
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
                    IndexCoverage::Join => out.push(RowMutation {
                        row,
                        cf: ColumnFamily::IndexValue,
                        cq: Vec::new(),
                        visibility: feature.visibility_expression().map(str::to_owned),
                        value: match op {
                            MutationOp::Put => self.encode_index_value(feature)?,
                            MutationOp::Delete => Vec::new(),
                        },
                        op,
                    }),
                    IndexCoverage::None => unreachable!(),
                }
            }
        }
        Ok(out)
    }

    fn id_from_row(&self, row: &[u8]) -> StrataResult<String> {
        let sharing = usize::from(self.ft.table_sharing());
        let short = || StrataError::serde("attribute row shorter than its layout");
        if row.len() < sharing + 2 {
            return Err(short());
        }
        let attr_index =
            u16::from_be_bytes([row[sharing], row[sharing + 1]]) as usize;
        let descriptor = self
            .ft
            .attributes()
            .get(attr_index)
            .ok_or_else(|| StrataError::serde("attribute row names an unknown attribute"))?;
        let value_start = sharing + 2;
        let value_len = match Self::element_type(descriptor).lex_width() {
            Some(width) => width,
            None => row[value_start..]
                .iter()
                .position(|&b| b == 0x00)
                .ok_or_else(short)?,
        };
        let mut pos = value_start + value_len;
        if row.get(pos) != Some(&0x00) {
            return Err(StrataError::serde("attribute row missing value separator"));
        }
        pos += 1;
        if self.has_date_field() {
            pos += lex::TIMESTAMP_FIELD_LEN;
        }
        if row.len() <= pos {
            return Err(short());
        }
        String::from_utf8(row[pos..].to_vec())
            .map_err(|e| StrataError::serde(format!("bad id bytes in attribute row: {e}")))
    }

    fn ranges(&self, facets: &QueryFacets, _target: Option<usize>) -> StrataResult<Vec<ScanRange>> {
        let Some(attr_index) = facets.best_attr_target() else {
            return Ok(Vec::new());
        };
        let base = self.base_prefix(attr_index as u16);
        let attr_end = self.base_prefix(attr_index as u16 + 1);

        let mut start = base.clone();
        let mut end = attr_end;
        for clause in facets
            .attr_clauses
            .iter()
            .filter(|c| c.attr_index == attr_index)
        {
            let (clause_start, clause_end) = match &clause.op {
                AttrOp::Eq(value) => {
                    let mut block = base.clone();
                    lex::encode(value, &mut block)?;
                    block.push(0x00);
                    if self.has_date_field() {
                        if let Some((lo, hi)) = facets.interval {
                            let mut s = block.clone();
                            s.extend(lex::encode_timestamp_field(lo)?);
                            let mut e = block.clone();
                            e.extend(lex::encode_timestamp_field(hi)?);
                            e.push(0xff);
                            (s, Some(e))
                        } else {
                            let mut e = block.clone();
                            *e.last_mut().unwrap() = 0x01;
                            (block, Some(e))
                        }
                    } else {
                        let mut e = block.clone();
                        *e.last_mut().unwrap() = 0x01;
                        (block, Some(e))
                    }
                }
                AttrOp::Prefix(prefix) => {
                    let mut s = base.clone();
                    s.extend(prefix.as_bytes());
                    let e = lex::prefix_upper_bound(&s);
                    (s, e)
                }
                AttrOp::Ge(value) => {
                    let mut s = base.clone();
                    lex::encode(value, &mut s)?;
                    (s, None)
                }
                AttrOp::Gt(value) => {
                    let mut s = base.clone();
                    lex::encode(value, &mut s)?;
                    s.push(0x01);
                    (s, None)
                }
                AttrOp::Lt(value) => {
                    let mut e = base.clone();
                    lex::encode(value, &mut e)?;
                    (base.clone(), Some(e))
                }
                AttrOp::Le(value) => {
                    let mut e = base.clone();
                    lex::encode(value, &mut e)?;
                    e.push(0x01);
                    (base.clone(), Some(e))
                }
                AttrOp::NotNull => (base.clone(), None),
            };
            if clause_start > start {
                start = clause_start;
            }
            if let Some(clause_end) = clause_end {
                if clause_end < end {
                    end = clause_end;
                }
            }
        }

        if start >= end {
            return Ok(Vec::new());
        }
        Ok(vec![ScanRange::new(start, end)])
    }

    fn may_duplicate(&self) -> bool {
        self.ft
            .attributes()
            .iter()
            .any(|a| a.coverage != IndexCoverage::None && matches!(a.data_type, DataType::List(_)))
    }

    fn splits(&self) -> Vec<Vec<u8>> {
        self.ft
            .attributes()
            .iter()
            .enumerate()
            .filter(|(_, a)| a.coverage != IndexCoverage::None)
            .skip(1)
            .map(|(idx, _)| self.base_prefix(idx as u16))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use strata_common::catalog::Cardinality;
    use strata_common::types::Geometry;

    use super::*;
    use crate::predicate::{extract, Predicate};

    fn test_type() -> Arc<FeatureType> {
        Arc::new(
            FeatureType::builder("t")
                .attribute(
                    AttributeDescriptor::new("name", DataType::Varchar)
                        .indexed(IndexCoverage::Join)
                        .with_cardinality(Cardinality::High),
                )
                .attribute(
                    AttributeDescriptor::new("age", DataType::Int32).indexed(IndexCoverage::Full),
                )
                .attribute(AttributeDescriptor::new(
                    "tags",
                    DataType::List(Box::new(DataType::Varchar)),
                ))
                .attribute(AttributeDescriptor::new("dtg", DataType::Timestamp))
                .attribute(AttributeDescriptor::new("geom", DataType::Point))
                .build()
                .unwrap(),
        )
    }

    fn feature(id: &str, name: &str, age: i32) -> Feature {
        Feature::new(
            id,
            vec![
                Some(ScalarImpl::Varchar(name.into())),
                Some(ScalarImpl::Int32(age)),
                None,
                Some(ScalarImpl::Timestamp(1_273_190_400_000)),
                Some(ScalarImpl::Geometry(Geometry::point(40.0, 60.0))),
            ],
        )
    }

    #[test]
    fn test_row_per_indexed_attribute() {
        let ft = test_type();
        let index = AttrIndex::new(ft.clone());
        let f = feature("f0", "alice", 30);
        let serialized = value_encoding::serialize(&ft, &f.datums).unwrap();
        let rows = index.mutations(&f, &serialized, MutationOp::Put).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cf, ColumnFamily::IndexValue);
        assert_eq!(rows[1].cf, ColumnFamily::Data);
        for row in &rows {
            assert_eq!(index.id_from_row(&row.row).unwrap(), "f0");
        }
    }

    #[test]
    fn test_null_attr_writes_no_row() {
        let ft = test_type();
        let index = AttrIndex::new(ft.clone());
        let mut f = feature("f0", "alice", 30);
        f.datums[1] = None;
        let serialized = value_encoding::serialize(&ft, &f.datums).unwrap();
        let rows = index.mutations(&f, &serialized, MutationOp::Put).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_eq_range_hits_only_that_value() {
        let ft = test_type();
        let index = AttrIndex::new(ft.clone());
        let serialized = |f: &Feature| value_encoding::serialize(&ft, &f.datums).unwrap();
        let alice = feature("f0", "alice", 30);
        let alicia = feature("f1", "alicia", 30);
        let alice_row = index
            .mutations(&alice, &serialized(&alice), MutationOp::Put)
            .unwrap()[0]
            .row
            .clone();
        let alicia_row = index
            .mutations(&alicia, &serialized(&alicia), MutationOp::Put)
            .unwrap()[0]
            .row
            .clone();

        let facets = extract(
            &ft,
            &HashMap::new(),
            &[Predicate::eq("name", ScalarImpl::Varchar("alice".into()))],
        )
        .unwrap();
        let ranges = index.ranges(&facets, None).unwrap();
        assert!(ranges.iter().any(|r| r.contains(&alice_row)));
        assert!(!ranges.iter().any(|r| r.contains(&alicia_row)));
    }

    #[test]
    fn test_prefix_range_covers_prefixed_values() {
        let ft = test_type();
        let index = AttrIndex::new(ft.clone());
        let serialized = |f: &Feature| value_encoding::serialize(&ft, &f.datums).unwrap();
        let alice = feature("f0", "alice", 30);
        let alicia = feature("f1", "alicia", 30);
        let bob = feature("f2", "bob", 30);

        let facets = extract(
            &ft,
            &HashMap::new(),
            &[Predicate::Like {
                attr: "name".into(),
                pattern: "ali%".into(),
            }],
        )
        .unwrap();
        let ranges = index.ranges(&facets, None).unwrap();
        for (f, expected) in [(&alice, true), (&alicia, true), (&bob, false)] {
            let row = index.mutations(f, &serialized(f), MutationOp::Put).unwrap()[0]
                .row
                .clone();
            assert_eq!(ranges.iter().any(|r| r.contains(&row)), expected);
        }
    }

    #[test]
    fn test_numeric_range_bounds() {
        let ft = test_type();
        let index = AttrIndex::new(ft.clone());
        let serialized = |f: &Feature| value_encoding::serialize(&ft, &f.datums).unwrap();

        let facets = extract(
            &ft,
            &HashMap::new(),
            &[
                Predicate::Cmp {
                    attr: "age".into(),
                    op: crate::predicate::CmpOp::Ge,
                    value: ScalarImpl::Int32(18),
                },
                Predicate::Cmp {
                    attr: "age".into(),
                    op: crate::predicate::CmpOp::Lt,
                    value: ScalarImpl::Int32(65),
                },
            ],
        )
        .unwrap();
        let ranges = index.ranges(&facets, None).unwrap();
        for (age, expected) in [(17, false), (18, true), (40, true), (64, true), (65, false)] {
            let f = feature(&format!("f{age}"), "x", age);
            let rows = index.mutations(&f, &serialized(&f), MutationOp::Put).unwrap();
            // the age row is the second mutation (attr index order)
            let row = &rows[1].row;
            assert_eq!(
                ranges.iter().any(|r| r.contains(row)),
                expected,
                "age {age}"
            );
        }
    }

    #[test]
    fn test_index_value_roundtrip() {
        let ft = test_type();
        let index = AttrIndex::new(ft.clone());
        let f = feature("f0", "alice", 30);
        let bytes = index.encode_index_value(&f).unwrap();
        let datums = index.decode_index_value(&bytes).unwrap();
        assert_eq!(datums[4], f.datums[4]);
        assert_eq!(datums[3], f.datums[3]);
        assert_eq!(datums[0], None);
    }
}
