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

//! Schema metadata persistence and the read-mostly schema cache.
//!
//! The metadata table carries rows `sft/<name>` (schema blob),
//! `idx/<name>/<index>` (enablement and version) and `stats/<name>/<attr>`
//! (cardinality hints). Reads go through a copy-on-write cache; mutations
//! serialise through a single writer lock.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use strata_common::catalog::{Cardinality, FeatureType};
use strata_common::util::lex;
use strata_common::{StrataError, StrataResult};
use strata_index::{ColumnFamily, ScanRange};
use tracing::debug;

use crate::backend::{KvBackend, KvMutation, ScanRequest};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexMeta {
    enabled: bool,
    version: u32,
}

/// A cached schema with its cardinality hints resolved by attribute index.
#[derive(Clone)]
pub struct SchemaEntry {
    pub ft: Arc<FeatureType>,
    pub stats: Arc<HashMap<usize, Cardinality>>,
}

pub struct MetadataStore {
    backend: Arc<dyn KvBackend>,
    table: String,
    cache: ArcSwap<HashMap<String, SchemaEntry>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl MetadataStore {
    pub fn new(backend: Arc<dyn KvBackend>, catalog: &str) -> Self {
        Self {
            backend,
            table: catalog.to_owned(),
            cache: ArcSwap::from_pointee(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn ensure_table(&self) -> StrataResult<()> {
        self.backend
            .create_table(
                &self.table,
                Vec::new(),
                vec![ColumnFamily::Data.name().to_owned()],
                HashMap::new(),
            )
            .await
    }

    fn schema_key(name: &str) -> Vec<u8> {
        format!("sft/{name}").into_bytes()
    }

    fn index_key(name: &str, index: &str) -> Vec<u8> {
        format!("idx/{name}/{index}").into_bytes()
    }

    fn stats_key(name: &str, attr: &str) -> Vec<u8> {
        format!("stats/{name}/{attr}").into_bytes()
    }

    async fn read_row(&self, key: Vec<u8>) -> StrataResult<Option<Vec<u8>>> {
        let mut stream = self.backend.scan(ScanRequest {
            table: self.table.clone(),
            ranges: vec![ScanRange::point(key)],
            cf_filter: vec![ColumnFamily::Data.bytes().to_vec()],
            iterators: Vec::new(),
        });
        match stream.next().await {
            Some(entry) => Ok(Some(entry?.value)),
            None => Ok(None),
        }
    }

    async fn read_prefix(&self, prefix: Vec<u8>) -> StrataResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let range = match lex::prefix_upper_bound(&prefix) {
            Some(end) => ScanRange::new(prefix, end),
            None => ScanRange::unbounded_from(prefix),
        };
        let mut stream = self.backend.scan(ScanRequest {
            table: self.table.clone(),
            ranges: vec![range],
            cf_filter: vec![ColumnFamily::Data.bytes().to_vec()],
            iterators: Vec::new(),
        });
        let mut out = Vec::new();
        while let Some(entry) = stream.next().await {
            let entry = entry?;
            out.push((entry.row, entry.value));
        }
        Ok(out)
    }

    fn put(key: Vec<u8>, value: Vec<u8>) -> KvMutation {
        KvMutation {
            row: key,
            cf: ColumnFamily::Data.bytes().to_vec(),
            cq: Vec::new(),
            visibility: None,
            value,
            delete: false,
        }
    }

    fn tombstone(key: Vec<u8>) -> KvMutation {
        KvMutation {
            row: key,
            cf: ColumnFamily::Data.bytes().to_vec(),
            cq: Vec::new(),
            visibility: None,
            value: Vec::new(),
            delete: true,
        }
    }

    /// Load a schema, hitting the backend only on cache miss.
    pub async fn get(&self, name: &str) -> StrataResult<SchemaEntry> {
        if let Some(entry) = self.cache.load().get(name) {
            return Ok(entry.clone());
        }
        let blob = self
            .read_row(Self::schema_key(name))
            .await?
            .ok_or_else(|| StrataError::SchemaNotFound(name.to_owned()))?;
        let ft: FeatureType = serde_json::from_slice(&blob)
            .map_err(|e| StrataError::serde(format!("corrupt schema blob for `{name}`: {e}")))?;
        let stats = self.load_stats(&ft).await?;
        let entry = SchemaEntry {
            ft: Arc::new(ft),
            stats: Arc::new(stats),
        };
        self.cache_insert(name, entry.clone());
        Ok(entry)
    }

    async fn load_stats(&self, ft: &FeatureType) -> StrataResult<HashMap<usize, Cardinality>> {
        let prefix = format!("stats/{}/", ft.name()).into_bytes();
        let rows = self.read_prefix(prefix.clone()).await?;
        let mut stats = HashMap::new();
        for (row, value) in rows {
            let attr_name = String::from_utf8_lossy(&row[prefix.len()..]).into_owned();
            if let (Some(idx), Ok(cardinality)) = (
                ft.attribute_index(&attr_name),
                serde_json::from_slice::<Cardinality>(&value),
            ) {
                stats.insert(idx, cardinality);
            }
        }
        Ok(stats)
    }

    fn cache_insert(&self, name: &str, entry: SchemaEntry) {
        self.cache.rcu(|cache| {
            let mut next = HashMap::clone(cache);
            next.insert(name.to_owned(), entry.clone());
            next
        });
    }

    fn cache_remove(&self, name: &str) {
        self.cache.rcu(|cache| {
            let mut next = HashMap::clone(cache);
            next.remove(name);
            next
        });
    }

    /// Register a schema. Returns the stored type and whether it was
    /// newly created; re-creating an identical schema is a no-op and a
    /// differing one is a conflict.
    pub async fn create(&self, mut ft: FeatureType) -> StrataResult<(Arc<FeatureType>, bool)> {
        let _guard = self.write_lock.lock().await;
        if let Some(blob) = self.read_row(Self::schema_key(ft.name())).await? {
            let existing: FeatureType = serde_json::from_slice(&blob).map_err(|e| {
                StrataError::serde(format!("corrupt schema blob for `{}`: {e}", ft.name()))
            })?;
            // the caller cannot know the assigned sharing byte; compare
            // everything else
            let mut candidate = ft.clone();
            candidate.assign_sharing_byte(existing.sharing_byte());
            return if candidate == existing {
                Ok((Arc::new(existing), false))
            } else {
                Err(StrataError::SchemaConflict {
                    name: ft.name().to_owned(),
                })
            };
        }

        if ft.table_sharing() {
            ft.assign_sharing_byte(self.next_sharing_byte().await?);
        }

        let mut mutations = vec![Self::put(
            Self::schema_key(ft.name()),
            serde_json::to_vec(&ft).map_err(|e| StrataError::serde(e.to_string()))?,
        )];
        for kind in ft.enabled_indexes() {
            mutations.push(Self::put(
                Self::index_key(ft.name(), &kind.to_string()),
                serde_json::to_vec(&IndexMeta {
                    enabled: true,
                    version: 1,
                })
                .map_err(|e| StrataError::serde(e.to_string()))?,
            ));
        }
        self.backend.write_batch(&self.table, mutations).await?;
        debug!(name = ft.name(), "registered schema");

        let entry = SchemaEntry {
            ft: Arc::new(ft),
            stats: Arc::new(HashMap::new()),
        };
        self.cache_insert(entry.ft.name(), entry.clone());
        Ok((entry.ft, true))
    }

    async fn next_sharing_byte(&self) -> StrataResult<u8> {
        let key = b"sharing/next".to_vec();
        let current = match self.read_row(key.clone()).await? {
            Some(value) => *value.first().unwrap_or(&0),
            None => 0,
        };
        if current == u8::MAX {
            return Err(StrataError::serde(
                "shared-table catalog exhausted its 255 sharing bytes",
            ));
        }
        self.backend
            .write_batch(&self.table, vec![Self::put(key, vec![current + 1])])
            .await?;
        Ok(current)
    }

    /// Replace a schema blob after an attribute-add.
    pub async fn update(&self, ft: FeatureType) -> StrataResult<Arc<FeatureType>> {
        let _guard = self.write_lock.lock().await;
        self.backend
            .write_batch(
                &self.table,
                vec![Self::put(
                    Self::schema_key(ft.name()),
                    serde_json::to_vec(&ft).map_err(|e| StrataError::serde(e.to_string()))?,
                )],
            )
            .await?;
        let stats = self.load_stats(&ft).await?;
        let entry = SchemaEntry {
            ft: Arc::new(ft),
            stats: Arc::new(stats),
        };
        self.cache_insert(entry.ft.name(), entry.clone());
        Ok(entry.ft)
    }

    /// Drop every metadata row of a type.
    pub async fn remove(&self, name: &str) -> StrataResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut mutations = vec![Self::tombstone(Self::schema_key(name))];
        for (row, _) in self
            .read_prefix(format!("idx/{name}/").into_bytes())
            .await?
        {
            mutations.push(Self::tombstone(row));
        }
        for (row, _) in self
            .read_prefix(format!("stats/{name}/").into_bytes())
            .await?
        {
            mutations.push(Self::tombstone(row));
        }
        self.backend.write_batch(&self.table, mutations).await?;
        self.cache_remove(name);
        Ok(())
    }

    /// Persist a cardinality hint for an attribute.
    pub async fn set_cardinality(
        &self,
        name: &str,
        attr: &str,
        cardinality: Cardinality,
    ) -> StrataResult<()> {
        let _guard = self.write_lock.lock().await;
        self.backend
            .write_batch(
                &self.table,
                vec![Self::put(
                    Self::stats_key(name, attr),
                    serde_json::to_vec(&cardinality)
                        .map_err(|e| StrataError::serde(e.to_string()))?,
                )],
            )
            .await?;
        self.cache_remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use strata_common::catalog::AttributeDescriptor;
    use strata_common::types::DataType;

    use super::*;
    use crate::backend::memory::MemoryBackend;

    fn test_ft(name: &str) -> FeatureType {
        FeatureType::builder(name)
            .attribute(AttributeDescriptor::new("geom", DataType::Point))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let store = MetadataStore::new(Arc::new(MemoryBackend::new()), "cat");
        store.ensure_table().await.unwrap();
        let (_, created) = store.create(test_ft("t")).await.unwrap();
        assert!(created);
        let (_, created) = store.create(test_ft("t")).await.unwrap();
        assert!(!created);
    }

    #[tokio::test]
    async fn test_conflicting_schema_rejected() {
        let store = MetadataStore::new(Arc::new(MemoryBackend::new()), "cat");
        store.ensure_table().await.unwrap();
        store.create(test_ft("t")).await.unwrap();
        let different = FeatureType::builder("t")
            .attribute(AttributeDescriptor::new("geom", DataType::Point))
            .attribute(AttributeDescriptor::new("extra", DataType::Int32))
            .build()
            .unwrap();
        assert!(matches!(
            store.create(different).await,
            Err(StrataError::SchemaConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_sharing_bytes_are_unique() {
        let store = MetadataStore::new(Arc::new(MemoryBackend::new()), "cat");
        store.ensure_table().await.unwrap();
        let make = |name: &str| {
            FeatureType::builder(name)
                .attribute(AttributeDescriptor::new("geom", DataType::Point))
                .table_sharing(true)
                .build()
                .unwrap()
        };
        let (a, _) = store.create(make("a")).await.unwrap();
        let (b, _) = store.create(make("b")).await.unwrap();
        assert_ne!(a.sharing_byte(), b.sharing_byte());
    }

    #[tokio::test]
    async fn test_missing_schema() {
        let store = MetadataStore::new(Arc::new(MemoryBackend::new()), "cat");
        store.ensure_table().await.unwrap();
        assert!(matches!(
            store.get("absent").await,
            Err(StrataError::SchemaNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cardinality_hint_roundtrip() {
        let store = MetadataStore::new(Arc::new(MemoryBackend::new()), "cat");
        store.ensure_table().await.unwrap();
        let ft = FeatureType::builder("t")
            .attribute(
                AttributeDescriptor::new("name", DataType::Varchar)
                    .indexed(strata_common::catalog::IndexCoverage::Full),
            )
            .attribute(AttributeDescriptor::new("geom", DataType::Point))
            .build()
            .unwrap();
        store.create(ft).await.unwrap();
        store
            .set_cardinality("t", "name", Cardinality::High)
            .await
            .unwrap();
        let entry = store.get("t").await.unwrap();
        assert_eq!(entry.stats.get(&0), Some(&Cardinality::High));
    }
}
