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

//! An in-memory ordered-KV backend over `BTreeMap`, for tests and
//! single-process deployments.
//!
//! Iteration batches records while holding the lock to trade copying
//! overhead against lock acquisitions, so scans never hold the table lock
//! across an await point.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::RwLock;
use strata_common::{StrataError, StrataResult};

use super::{KvBackend, KvEntry, KvMutation, ScanRequest};

/// `(row, cf, cq)`, ordered row-first like the real backends.
type CellKey = (Vec<u8>, Vec<u8>, Vec<u8>);
type Table = Arc<RwLock<BTreeMap<CellKey, (Option<String>, Vec<u8>)>>>;

const SCAN_BATCH: usize = 256;

#[derive(Clone, Default)]
pub struct MemoryBackend {
    tables: Arc<RwLock<HashMap<String, Table>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, name: &str) -> StrataResult<Table> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StrataError::backend(anyhow::anyhow!("no such table `{name}`"), false))
    }

    /// Collect the entries of one range in short lock-scoped batches.
    fn collect_range(
        table: &Table,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Vec<KvEntry> {
        let mut out = Vec::new();
        let mut cursor: Option<CellKey> = None;
        loop {
            let lower = match &cursor {
                None => Included((start.to_vec(), Vec::new(), Vec::new())),
                Some(last) => Excluded(last.clone()),
            };
            let batch: Vec<(CellKey, (Option<String>, Vec<u8>))> = {
                let guard = table.read();
                guard
                    .range((lower, Unbounded))
                    .take_while(|((row, _, _), _)| match end {
                        Some(end) => row.as_slice() < end,
                        None => true,
                    })
                    .take(SCAN_BATCH)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            };
            if batch.is_empty() {
                break;
            }
            cursor = Some(batch.last().unwrap().0.clone());
            out.extend(batch.into_iter().map(|((row, cf, cq), (vis, value))| KvEntry {
                row,
                cf,
                cq,
                visibility: vis,
                value,
            }));
        }
        out
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn create_table(
        &self,
        name: &str,
        _splits: Vec<Vec<u8>>,
        _column_families: Vec<String>,
        _props: HashMap<String, String>,
    ) -> StrataResult<()> {
        self.tables
            .write()
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(RwLock::new(BTreeMap::new())));
        Ok(())
    }

    async fn table_exists(&self, name: &str) -> StrataResult<bool> {
        Ok(self.tables.read().contains_key(name))
    }

    async fn drop_table(&self, name: &str) -> StrataResult<()> {
        self.tables.write().remove(name);
        Ok(())
    }

    async fn write_batch(&self, table: &str, mutations: Vec<KvMutation>) -> StrataResult<()> {
        let table = self.table(table)?;
        let mut guard = table.write();
        for m in mutations {
            let key = (m.row, m.cf, m.cq);
            if m.delete {
                guard.remove(&key);
            } else {
                guard.insert(key, (m.visibility, m.value));
            }
        }
        Ok(())
    }

    fn scan(&self, request: ScanRequest) -> BoxStream<'static, StrataResult<KvEntry>> {
        let table = match self.table(&request.table) {
            Ok(table) => table,
            Err(e) => return futures::stream::iter(vec![Err(e)]).boxed(),
        };
        let cf_filter = request.cf_filter;
        let mut entries = Vec::new();
        for range in &request.ranges {
            let collected = Self::collect_range(&table, &range.start, range.end.as_deref());
            entries.extend(collected.into_iter().filter(|e| {
                cf_filter.is_empty() || cf_filter.iter().any(|cf| cf == &e.cf)
            }));
        }
        futures::stream::iter(entries.into_iter().map(Ok)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use strata_index::ScanRange;

    use super::*;

    fn mutation(row: &[u8], value: &[u8]) -> KvMutation {
        KvMutation {
            row: row.to_vec(),
            cf: b"F".to_vec(),
            cq: Vec::new(),
            visibility: None,
            value: value.to_vec(),
            delete: false,
        }
    }

    #[tokio::test]
    async fn test_write_scan_roundtrip() {
        let backend = MemoryBackend::new();
        backend
            .create_table("t", vec![], vec!["F".into()], HashMap::new())
            .await
            .unwrap();
        backend
            .write_batch(
                "t",
                vec![mutation(b"b", b"2"), mutation(b"a", b"1"), mutation(b"c", b"3")],
            )
            .await
            .unwrap();

        let entries: Vec<_> = backend
            .scan(ScanRequest {
                table: "t".into(),
                ranges: vec![ScanRange::new(b"a".to_vec(), b"c".to_vec())],
                cf_filter: vec![],
                iterators: vec![],
            })
            .collect::<Vec<_>>()
            .await;
        let rows: Vec<_> = entries
            .into_iter()
            .map(|e| e.unwrap().row)
            .collect();
        assert_eq!(rows, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[tokio::test]
    async fn test_delete_tombstones() {
        let backend = MemoryBackend::new();
        backend
            .create_table("t", vec![], vec!["F".into()], HashMap::new())
            .await
            .unwrap();
        backend
            .write_batch("t", vec![mutation(b"a", b"1")])
            .await
            .unwrap();
        let mut delete = mutation(b"a", b"");
        delete.delete = true;
        backend.write_batch("t", vec![delete]).await.unwrap();

        let entries: Vec<_> = backend
            .scan(ScanRequest {
                table: "t".into(),
                ranges: vec![ScanRange::unbounded_from(Vec::new())],
                cf_filter: vec![],
                iterators: vec![],
            })
            .collect::<Vec<_>>()
            .await;
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_missing_table_errors() {
        let backend = MemoryBackend::new();
        let results: Vec<_> = backend
            .scan(ScanRequest {
                table: "nope".into(),
                ranges: vec![],
                cf_filter: vec![],
                iterators: vec![],
            })
            .collect::<Vec<_>>()
            .await;
        assert!(results[0].is_err());
    }
}
