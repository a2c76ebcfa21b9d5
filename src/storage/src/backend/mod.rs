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

//! The ordered key-value backend contract the engine runs against.
//!
//! Four operations: create a table, write a batch, delete a batch (a write
//! batch of tombstones), and scan byte ranges in row-sorted order. An
//! adapter may claim operators from the request's stack for server-side
//! execution; whatever it leaves unclaimed, the scan pipeline interprets
//! client-side.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use strata_common::StrataResult;
use strata_index::planner::ScanOperator;
use strata_index::{MutationOp, RowMutation, ScanRange};

/// One cell mutation addressed to a table.
#[derive(Debug, Clone, PartialEq)]
pub struct KvMutation {
    pub row: Vec<u8>,
    pub cf: Vec<u8>,
    pub cq: Vec<u8>,
    pub visibility: Option<String>,
    pub value: Vec<u8>,
    pub delete: bool,
}

impl KvMutation {
    pub fn from_row_mutation(m: RowMutation) -> Self {
        Self {
            row: m.row,
            cf: m.cf.bytes().to_vec(),
            cq: m.cq,
            visibility: m.visibility,
            value: m.value,
            delete: m.op == MutationOp::Delete,
        }
    }
}

/// One cell returned by a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct KvEntry {
    pub row: Vec<u8>,
    pub cf: Vec<u8>,
    pub cq: Vec<u8>,
    pub visibility: Option<String>,
    pub value: Vec<u8>,
}

/// A scan over a set of byte ranges.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub table: String,
    /// Sorted and disjoint; delivery follows range order.
    pub ranges: Vec<ScanRange>,
    /// Column families to fetch; empty fetches everything.
    pub cf_filter: Vec<Vec<u8>>,
    /// Operator stack, `(priority, operator)`, for adapters that can push
    /// work server-side.
    pub iterators: Vec<(u32, ScanOperator)>,
}

/// The ordered-KV engine contract.
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    async fn create_table(
        &self,
        name: &str,
        splits: Vec<Vec<u8>>,
        column_families: Vec<String>,
        props: HashMap<String, String>,
    ) -> StrataResult<()>;

    async fn table_exists(&self, name: &str) -> StrataResult<bool>;

    async fn drop_table(&self, name: &str) -> StrataResult<()>;

    async fn write_batch(&self, table: &str, mutations: Vec<KvMutation>) -> StrataResult<()>;

    /// Stream entries for the requested ranges in row-sorted order per
    /// range. The operator stack is advisory: an adapter with no server-side
    /// execution ignores it, and the scan pipeline interprets every operator
    /// client-side.
    fn scan(&self, request: ScanRequest) -> BoxStream<'static, StrataResult<KvEntry>>;
}
