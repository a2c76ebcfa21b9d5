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

//! The public feature store API: schema lifecycle, writes, deletes,
//! queries and explain.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use strata_common::catalog::{AttributeDescriptor, Cardinality, FeatureType, IndexKind};
use strata_common::config::EngineConfig;
use strata_common::feature::Feature;
use strata_common::{StrataError, StrataResult};
use strata_index::planner::{Explanation, QueryPlanner};
use strata_index::{ColumnFamily, IndexSet, MutationOp, Predicate, QueryHints};
use tracing::info;

use crate::backend::{KvBackend, KvMutation};
use crate::metadata::MetadataStore;
use crate::scan::{self, QueryStream, ScanContext};
use crate::write::{IndexWriter, WriteCounts};

/// A spatio-temporal feature store over an ordered key-value backend.
pub struct FeatureStore {
    backend: Arc<dyn KvBackend>,
    config: EngineConfig,
    metadata: MetadataStore,
    planner: QueryPlanner,
}

impl FeatureStore {
    pub fn new(backend: Arc<dyn KvBackend>, config: EngineConfig) -> Self {
        let metadata = MetadataStore::new(backend.clone(), &config.catalog);
        let planner = QueryPlanner::new(config.clone());
        Self {
            backend,
            config,
            metadata,
            planner,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn table_name(&self, ft: &FeatureType, kind: IndexKind) -> String {
        if ft.table_sharing() {
            format!("{}_{kind}", self.config.catalog)
        } else {
            format!("{}_{}_{kind}", self.config.catalog, ft.name())
        }
    }

    fn tables(&self, ft: &FeatureType) -> HashMap<IndexKind, String> {
        ft.enabled_indexes()
            .iter()
            .map(|&kind| (kind, self.table_name(ft, kind)))
            .collect()
    }

    /// Create a feature type and its per-index tables. Idempotent: an
    /// identical re-creation is a no-op, a differing one is a conflict.
    pub async fn create_schema(&self, ft: FeatureType) -> StrataResult<Arc<FeatureType>> {
        self.metadata.ensure_table().await?;
        let (ft, created) = self.metadata.create(ft).await?;
        let indices = IndexSet::for_type(ft.clone())?;
        for index in indices.iter() {
            let table = self.table_name(&ft, index.kind());
            if !self.backend.table_exists(&table).await? {
                self.backend
                    .create_table(
                        &table,
                        index.splits(),
                        vec![
                            ColumnFamily::Data.name().to_owned(),
                            ColumnFamily::IndexValue.name().to_owned(),
                            ColumnFamily::BinTrack.name().to_owned(),
                        ],
                        HashMap::new(),
                    )
                    .await?;
            }
        }
        if created {
            info!(name = ft.name(), indexes = ?ft.enabled_indexes(), "created schema");
        }
        Ok(ft)
    }

    /// Append attributes to an existing type. Attribute removal is not
    /// supported.
    pub async fn update_schema(
        &self,
        name: &str,
        new_attributes: Vec<AttributeDescriptor>,
    ) -> StrataResult<Arc<FeatureType>> {
        let entry = self.metadata.get(name).await?;
        let updated = entry.ft.with_appended_attributes(new_attributes)?;
        self.metadata.update(updated).await
    }

    /// Drop a type: its tables when it owns them, or its row slice of the
    /// shared tables.
    pub async fn delete_schema(&self, name: &str) -> StrataResult<()> {
        let entry = self.metadata.get(name).await?;
        let indices = IndexSet::for_type(entry.ft.clone())?;
        if entry.ft.table_sharing() {
            for index in indices.iter() {
                let table = self.table_name(&entry.ft, index.kind());
                self.delete_type_slice(&table, entry.ft.sharing_byte()).await?;
            }
        } else {
            for index in indices.iter() {
                let table = self.table_name(&entry.ft, index.kind());
                if self.backend.table_exists(&table).await? {
                    self.backend.drop_table(&table).await?;
                }
            }
        }
        self.metadata.remove(name).await?;
        info!(name, "deleted schema");
        Ok(())
    }

    async fn delete_type_slice(&self, table: &str, sharing_byte: u8) -> StrataResult<()> {
        use strata_common::util::lex;
        use strata_index::ScanRange;

        let prefix = vec![sharing_byte];
        let range = match lex::prefix_upper_bound(&prefix) {
            Some(end) => ScanRange::new(prefix, end),
            None => ScanRange::unbounded_from(prefix),
        };
        let mut stream = self.backend.scan(crate::backend::ScanRequest {
            table: table.to_owned(),
            ranges: vec![range],
            cf_filter: Vec::new(),
            iterators: Vec::new(),
        });
        let mut tombstones = Vec::new();
        while let Some(entry) = stream.next().await {
            let entry = entry?;
            tombstones.push(KvMutation {
                row: entry.row,
                cf: entry.cf,
                cq: entry.cq,
                visibility: None,
                value: Vec::new(),
                delete: true,
            });
            if tombstones.len() >= self.config.write_batch_rows {
                self.backend
                    .write_batch(table, std::mem::take(&mut tombstones))
                    .await?;
            }
        }
        if !tombstones.is_empty() {
            self.backend.write_batch(table, tombstones).await?;
        }
        Ok(())
    }

    /// Append features. Writes are idempotent per feature id.
    pub async fn write<I>(&self, name: &str, features: I) -> StrataResult<WriteCounts>
    where
        I: IntoIterator<Item = Feature>,
    {
        let entry = self.metadata.get(name).await?;
        let indices = Arc::new(IndexSet::for_type(entry.ft.clone())?);
        let mut writer = IndexWriter::new(
            self.backend.clone(),
            entry.ft.clone(),
            indices,
            self.tables(&entry.ft),
            self.config.write_batch_rows,
        );
        for feature in features {
            writer.append(&feature, MutationOp::Put).await?;
        }
        writer.finish().await
    }

    /// Delete every feature matching the predicate; returns the count.
    pub async fn delete(&self, name: &str, predicate: &Predicate) -> StrataResult<u64> {
        let entry = self.metadata.get(name).await?;
        let indices = Arc::new(IndexSet::for_type(entry.ft.clone())?);

        // exact matching only: a loose spatial match would delete bystanders
        let hints = QueryHints {
            loose_bbox: false,
            ..Default::default()
        };
        let mut stream = self.run_query(name, predicate, hints).await?;
        let mut writer = IndexWriter::new(
            self.backend.clone(),
            entry.ft.clone(),
            indices,
            self.tables(&entry.ft),
            self.config.write_batch_rows,
        );
        let mut count = 0u64;
        while let Some(item) = stream.next().await {
            if let Some(feature) = item?.into_feature() {
                writer.append(&feature, MutationOp::Delete).await?;
                count += 1;
            }
        }
        writer.finish().await?;
        info!(name, count, "deleted features");
        Ok(count)
    }

    /// Run a query and stream the results.
    pub async fn query(
        &self,
        name: &str,
        predicate: &Predicate,
        hints: QueryHints,
    ) -> StrataResult<QueryStream> {
        self.run_query(name, predicate, hints).await
    }

    async fn run_query(
        &self,
        name: &str,
        predicate: &Predicate,
        hints: QueryHints,
    ) -> StrataResult<QueryStream> {
        let entry = self.metadata.get(name).await?;
        let indices = Arc::new(IndexSet::for_type(entry.ft.clone())?);
        let plan = self.planner.plan(
            &entry.ft,
            &indices,
            &self.tables(&entry.ft),
            predicate,
            &hints,
            &entry.stats,
        )?;
        Ok(scan::execute(ScanContext {
            backend: self.backend.clone(),
            config: self.config.clone(),
            ft: entry.ft.clone(),
            indices,
            plan,
            fail_fast: hints.fail_fast,
        }))
    }

    /// Deterministic rendering of how a query would execute. Never fails
    /// for a well-formed predicate.
    pub async fn explain(
        &self,
        name: &str,
        predicate: &Predicate,
        hints: QueryHints,
    ) -> StrataResult<Explanation> {
        let entry = self.metadata.get(name).await?;
        let indices = IndexSet::for_type(entry.ft.clone())?;
        self.planner.explain(
            &entry.ft,
            &indices,
            &self.tables(&entry.ft),
            predicate,
            &hints,
            &entry.stats,
        )
    }

    /// Persist a cardinality hint consulted by strategy selection.
    pub async fn set_cardinality(
        &self,
        name: &str,
        attr: &str,
        cardinality: Cardinality,
    ) -> StrataResult<()> {
        let entry = self.metadata.get(name).await?;
        if entry.ft.attribute_index(attr).is_none() {
            return Err(StrataError::UnsupportedPredicate {
                reason: format!("unknown attribute `{attr}` in type `{name}`"),
            });
        }
        self.metadata.set_cardinality(name, attr, cardinality).await
    }
}
