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

//! Id index: rows `sharing? . id`, the primary record of every feature and
//! the fallback table for full scans.

use std::sync::Arc;

use strata_common::catalog::{FeatureType, IndexKind};
use strata_common::feature::Feature;
use strata_common::util::lex;
use strata_common::{StrataError, StrataResult};

use super::{
    feature_columns, sharing_prefix, FeatureIndex, MutationOp, RowMutation, ScanRange,
};
use crate::predicate::QueryFacets;

pub struct IdIndex {
    ft: Arc<FeatureType>,
}

impl IdIndex {
    pub fn new(ft: Arc<FeatureType>) -> Self {
        Self { ft }
    }

    pub fn row_for_id(&self, id: &str) -> Vec<u8> {
        let mut row = sharing_prefix(&self.ft);
        row.extend(id.as_bytes());
        row
    }

    /// The range spanning every row of the type: a full-table scan, or the
    /// type's slice of a shared table.
    pub fn full_ranges(&self) -> Vec<ScanRange> {
        let prefix = sharing_prefix(&self.ft);
        if prefix.is_empty() {
            vec![ScanRange::unbounded_from(Vec::new())]
        } else {
            match lex::prefix_upper_bound(&prefix) {
                Some(end) => vec![ScanRange::new(prefix, end)],
                None => vec![ScanRange::unbounded_from(prefix)],
            }
        }
    }
}

impl FeatureIndex for IdIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Id
    }

    fn supports(&self, facets: &QueryFacets) -> bool {
        facets.has_ids()
    }

    fn mutations(
        &self,
        feature: &Feature,
        serialized: &[u8],
        op: MutationOp,
    ) -> StrataResult<Vec<RowMutation>> {
        let row = self.row_for_id(&feature.id);
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
        let prefix = usize::from(self.ft.table_sharing());
        if row.len() <= prefix {
            return Err(StrataError::serde("id row shorter than its prefix"));
        }
        String::from_utf8(row[prefix..].to_vec())
            .map_err(|e| StrataError::serde(format!("bad id bytes in id row: {e}")))
    }

    fn ranges(&self, facets: &QueryFacets, _target: Option<usize>) -> StrataResult<Vec<ScanRange>> {
        match &facets.ids {
            Some(ids) => Ok(ids
                .iter()
                .map(|id| ScanRange::point(self.row_for_id(id)))
                .collect()),
            None => Ok(self.full_ranges()),
        }
    }

    fn may_duplicate(&self) -> bool {
        false
    }
}
