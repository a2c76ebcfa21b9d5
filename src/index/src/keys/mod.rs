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

//! Row codecs: the bit-exact layouts each index writes and reads.
//!
//! Every codec is a pure function of the feature type and feature. Row keys
//! for the same `(index, feature)` are deterministic, so a rewrite of the
//! same feature id overwrites in place.

pub mod attr;
pub mod id;
pub mod xz2;
pub mod xz3;
pub mod z2;
pub mod z3;

use std::sync::Arc;

use strata_common::catalog::{FeatureType, IndexKind, VisibilityMode};
use strata_common::feature::Feature;
use strata_common::util::value_encoding;
use strata_common::{StrataError, StrataResult};

use crate::predicate::QueryFacets;

/// Column families every index table carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnFamily {
    /// The full serialized feature.
    Data,
    /// A minimal projection for covering reads from join rows.
    IndexValue,
    /// Pre-computed track records, reserved for adapters that materialize
    /// them server-side.
    BinTrack,
}

impl ColumnFamily {
    pub fn bytes(&self) -> &'static [u8] {
        match self {
            ColumnFamily::Data => b"F",
            ColumnFamily::IndexValue => b"I",
            ColumnFamily::BinTrack => b"B",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColumnFamily::Data => "F",
            ColumnFamily::IndexValue => "I",
            ColumnFamily::BinTrack => "B",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    Put,
    Delete,
}

/// One row-level mutation produced by a codec.
#[derive(Debug, Clone, PartialEq)]
pub struct RowMutation {
    pub row: Vec<u8>,
    pub cf: ColumnFamily,
    pub cq: Vec<u8>,
    pub visibility: Option<String>,
    pub value: Vec<u8>,
    pub op: MutationOp,
}

/// A closed-open byte range `[start, end)`; `end = None` is unbounded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScanRange {
    pub start: Vec<u8>,
    pub end: Option<Vec<u8>>,
}

impl ScanRange {
    pub fn new(start: Vec<u8>, end: Vec<u8>) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn unbounded_from(start: Vec<u8>) -> Self {
        Self { start, end: None }
    }

    /// The range holding exactly one row.
    pub fn point(row: Vec<u8>) -> Self {
        let mut end = row.clone();
        end.push(0x00);
        Self {
            start: row,
            end: Some(end),
        }
    }

    pub fn contains(&self, row: &[u8]) -> bool {
        row >= self.start.as_slice()
            && match &self.end {
                Some(end) => row < end.as_slice(),
                None => true,
            }
    }

    /// Whether `other` starts before this range ends; used when merging
    /// sorted ranges.
    pub fn overlaps_or_touches(&self, other: &ScanRange) -> bool {
        match &self.end {
            None => true,
            Some(end) => other.start <= *end,
        }
    }
}

/// Sort ranges and merge overlapping or touching neighbours.
pub fn merge_scan_ranges(mut ranges: Vec<ScanRange>) -> Vec<ScanRange> {
    ranges.sort();
    let mut merged: Vec<ScanRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if last.overlaps_or_touches(&range) => {
                last.end = match (&last.end, &range.end) {
                    (None, _) | (_, None) => None,
                    (Some(a), Some(b)) => Some(a.max(b).clone()),
                };
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Shard byte for a feature id, `None` when sharding is disabled.
pub fn shard_byte(id: &str, shard_count: u8) -> Option<u8> {
    if shard_count <= 1 {
        None
    } else {
        Some((crc32fast::hash(id.as_bytes()) % shard_count as u32) as u8)
    }
}

/// All shard bytes to enumerate on the read side.
pub fn shard_prefixes(shard_count: u8) -> Vec<Option<u8>> {
    if shard_count <= 1 {
        vec![None]
    } else {
        (0..shard_count).map(Some).collect()
    }
}

/// The columns one feature produces on a given index row.
///
/// In feature visibility mode this is a single data (or index-value) column;
/// in attribute visibility mode it is one column per attribute, each guarded
/// by that attribute's own expression.
pub(crate) fn feature_columns(
    ft: &FeatureType,
    feature: &Feature,
    serialized: &[u8],
    cq_prefix: &[u8],
) -> StrataResult<Vec<(ColumnFamily, Vec<u8>, Option<String>, Vec<u8>)>> {
    match ft.visibility_mode() {
        VisibilityMode::Feature => Ok(vec![(
            ColumnFamily::Data,
            cq_prefix.to_vec(),
            feature.visibility_expression().map(str::to_owned),
            serialized.to_vec(),
        )]),
        VisibilityMode::Attribute => {
            let mut columns = Vec::with_capacity(ft.attributes().len());
            for (idx, descriptor) in ft.attributes().iter().enumerate() {
                let mut cq = cq_prefix.to_vec();
                cq.extend((idx as u16).to_be_bytes());
                let value =
                    value_encoding::serialize_single(&descriptor.data_type, &feature.datums[idx])?;
                columns.push((
                    ColumnFamily::Data,
                    cq,
                    feature.attribute_visibility(idx).map(str::to_owned),
                    value,
                ));
            }
            Ok(columns)
        }
    }
}

/// Row-key prefix shared by every index of the type: the sharing byte when
/// the type lives in shared tables.
pub(crate) fn sharing_prefix(ft: &FeatureType) -> Vec<u8> {
    if ft.table_sharing() {
        vec![ft.sharing_byte()]
    } else {
        Vec::new()
    }
}

pub(crate) fn null_geometry_error(ft: &FeatureType, feature: &Feature) -> StrataError {
    StrataError::serde(format!(
        "feature `{}` has no value for default geometry `{}`",
        feature.id,
        ft.default_geometry_attr().name
    ))
}

pub(crate) fn null_date_error(ft: &FeatureType, feature: &Feature) -> StrataError {
    StrataError::serde(format!(
        "feature `{}` has no value for the default date, required by a temporal index of `{}`",
        feature.id,
        ft.name()
    ))
}

/// One index family's writer, reader and range generator.
///
/// The planner owns a flat list of these and consults them; implementations
/// never call back into the planner.
pub trait FeatureIndex: Send + Sync {
    fn kind(&self) -> IndexKind;

    /// Whether the disjunct's facets contain every field this index needs.
    fn supports(&self, facets: &QueryFacets) -> bool;

    /// Rows for one feature. `serialized` is the value-encoded feature,
    /// produced once by the writer and shared across indices.
    fn mutations(
        &self,
        feature: &Feature,
        serialized: &[u8],
        op: MutationOp,
    ) -> StrataResult<Vec<RowMutation>>;

    /// Extract the feature id from a row key.
    fn id_from_row(&self, row: &[u8]) -> StrataResult<String>;

    /// Covering byte ranges for the facets.
    fn ranges(&self, facets: &QueryFacets, target: Option<usize>) -> StrataResult<Vec<ScanRange>>;

    /// Whether scans of this index can return the same feature twice.
    fn may_duplicate(&self) -> bool {
        self.kind().may_duplicate()
    }

    /// Initial split points for table creation.
    fn splits(&self) -> Vec<Vec<u8>> {
        Vec::new()
    }
}

/// The enabled indices of one feature type.
pub struct IndexSet {
    indices: Vec<Box<dyn FeatureIndex>>,
}

impl IndexSet {
    /// Build codecs for every enabled index of the type.
    pub fn for_type(ft: Arc<FeatureType>) -> StrataResult<IndexSet> {
        let mut indices: Vec<Box<dyn FeatureIndex>> = Vec::new();
        for kind in ft.enabled_indexes() {
            match kind {
                IndexKind::Z2 => indices.push(Box::new(z2::Z2Index::new(ft.clone()))),
                IndexKind::Z3 => indices.push(Box::new(z3::Z3Index::new(ft.clone()))),
                IndexKind::Xz2 => indices.push(Box::new(xz2::Xz2Index::new(ft.clone()))),
                IndexKind::Xz3 => indices.push(Box::new(xz3::Xz3Index::new(ft.clone()))),
                IndexKind::Id => indices.push(Box::new(id::IdIndex::new(ft.clone()))),
                IndexKind::Attribute => indices.push(Box::new(attr::AttrIndex::new(ft.clone()))),
            }
        }
        Ok(IndexSet { indices })
    }

    pub fn get(&self, kind: IndexKind) -> Option<&dyn FeatureIndex> {
        self.indices
            .iter()
            .find(|i| i.kind() == kind)
            .map(|i| i.as_ref() as &dyn FeatureIndex)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn FeatureIndex> {
        self.indices.iter().map(|i| i.as_ref() as &dyn FeatureIndex)
    }

    pub fn kinds(&self) -> Vec<IndexKind> {
        self.indices.iter().map(|i| i.kind()).collect()
    }
}
