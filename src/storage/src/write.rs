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

//! The write path: fan each feature out to every enabled index and flush
//! per-table batches.
//!
//! A feature's rows across indices are not transactional; a failed flush
//! surfaces to the caller and earlier indices may already hold the rows.
//! Re-writing the same feature id produces byte-identical keys, so a retry
//! converges.

use std::collections::HashMap;
use std::sync::Arc;

use strata_common::catalog::{FeatureType, IndexKind};
use strata_common::feature::Feature;
use strata_common::util::value_encoding;
use strata_common::StrataResult;
use strata_index::{IndexSet, MutationOp};
use tracing::debug;

use crate::backend::{KvBackend, KvMutation};

/// What a write call accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub features: u64,
    pub rows: u64,
}

pub(crate) struct IndexWriter {
    backend: Arc<dyn KvBackend>,
    ft: Arc<FeatureType>,
    indices: Arc<IndexSet>,
    tables: HashMap<IndexKind, String>,
    batch_rows: usize,
    buffers: HashMap<String, Vec<KvMutation>>,
    buffered_rows: usize,
    counts: WriteCounts,
}

impl IndexWriter {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        ft: Arc<FeatureType>,
        indices: Arc<IndexSet>,
        tables: HashMap<IndexKind, String>,
        batch_rows: usize,
    ) -> Self {
        Self {
            backend,
            ft,
            indices,
            tables,
            batch_rows: batch_rows.max(1),
            buffers: HashMap::new(),
            buffered_rows: 0,
            counts: WriteCounts::default(),
        }
    }

    /// Buffer one feature's rows across all indices.
    pub async fn append(&mut self, feature: &Feature, op: MutationOp) -> StrataResult<()> {
        let serialized = value_encoding::serialize(&self.ft, &feature.datums)?;
        for index in self.indices.iter() {
            let table = self
                .tables
                .get(&index.kind())
                .expect("index set and table map are built together")
                .clone();
            for mutation in index.mutations(feature, &serialized, op)? {
                self.buffers
                    .entry(table.clone())
                    .or_default()
                    .push(KvMutation::from_row_mutation(mutation));
                self.buffered_rows += 1;
                self.counts.rows += 1;
            }
        }
        self.counts.features += 1;
        if self.buffered_rows >= self.batch_rows {
            self.flush().await?;
        }
        Ok(())
    }

    /// Flush every buffered batch; each table's batch is one backend call.
    pub async fn flush(&mut self) -> StrataResult<()> {
        for (table, mutations) in std::mem::take(&mut self.buffers) {
            if mutations.is_empty() {
                continue;
            }
            debug!(table, rows = mutations.len(), "flushing write batch");
            self.backend.write_batch(&table, mutations).await?;
        }
        self.buffered_rows = 0;
        Ok(())
    }

    pub async fn finish(mut self) -> StrataResult<WriteCounts> {
        self.flush().await?;
        Ok(self.counts)
    }
}
