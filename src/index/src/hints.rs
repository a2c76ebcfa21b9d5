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

//! Per-query hints recognised by the planner and the scan pipeline.

use strata_common::catalog::IndexKind;

use crate::predicate::Envelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Deterministic sampling: keep when `hash(key) mod 2^32 < fraction * 2^32`.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingOptions {
    pub fraction: f32,
    /// Sample key attribute; the feature id when unset.
    pub sample_by: Option<String>,
}

/// Packed track-record output for map-viewer streaming.
#[derive(Debug, Clone, PartialEq)]
pub struct BinOptions {
    /// Attribute whose hash becomes the track id.
    pub track: String,
    /// Optional label attribute, widening records to 24 bytes.
    pub label: Option<String>,
    /// Sort each emitted chunk by timestamp.
    pub sort: bool,
}

/// Gridded count aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityOptions {
    pub width: u32,
    pub height: u32,
    pub envelope: Envelope,
    /// Numeric attribute to weight counts by.
    pub weight: Option<String>,
}

/// Hints accepted on a query. Everything defaults to off except
/// `loose_bbox`, which accepts index coarseness in lieu of an exact spatial
/// residual.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHints {
    pub index_hint: Option<IndexKind>,
    pub loose_bbox: bool,
    pub range_target: Option<usize>,
    pub query_threads: Option<usize>,
    pub sampling: Option<SamplingOptions>,
    pub bin: Option<BinOptions>,
    pub density: Option<DensityOptions>,
    /// Projection: the attributes to retain, by name.
    pub transform: Option<Vec<String>>,
    pub sort: Option<Vec<(String, SortOrder)>>,
    /// Abort the whole query on the first task failure instead of
    /// surfacing it as a failed stream item.
    pub fail_fast: bool,
}

impl Default for QueryHints {
    fn default() -> Self {
        Self {
            index_hint: None,
            loose_bbox: true,
            range_target: None,
            query_threads: None,
            sampling: None,
            bin: None,
            density: None,
            transform: None,
            sort: None,
            fail_fast: false,
        }
    }
}

impl QueryHints {
    pub fn with_index(mut self, kind: IndexKind) -> Self {
        self.index_hint = Some(kind);
        self
    }

    pub fn with_transform<I: IntoIterator<Item = S>, S: Into<String>>(mut self, attrs: I) -> Self {
        self.transform = Some(attrs.into_iter().map(Into::into).collect());
        self
    }
}
