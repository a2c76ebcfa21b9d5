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

use serde::{Deserialize, Serialize};

/// Engine tunables. Every field has a serde default so partial configs
/// deserialize cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Table name prefix shared by all tables the engine creates.
    pub catalog: String,

    /// Parallel backend scanners per query.
    pub query_threads: usize,

    /// Rows fetched per backend poll; also the cancellation check interval.
    pub scan_batch_rows: usize,

    /// Rows buffered per write flush.
    pub write_batch_rows: usize,

    /// Hard cap on memory for client-side sorting.
    pub sort_buffer_bytes: usize,

    /// Ids remembered for cross-range deduplication before degrading.
    pub dedup_budget: usize,

    /// Refuse to plan queries that would scan a whole table.
    pub block_full_table_scans: bool,

    /// Cap on disjuncts produced by predicate normalisation.
    pub max_dnf_terms: usize,

    /// Largest id set for which the id index beats a spatial index.
    pub id_join_threshold: usize,

    /// Soft target for the number of ranges a curve decomposes into.
    pub range_target: usize,

    /// Shards per index table; one byte of the row key when > 1.
    pub shard_count: u8,

    /// Escalate best-effort degradations (dedupe overflow) into errors.
    pub strict: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            catalog: default::catalog(),
            query_threads: default::query_threads(),
            scan_batch_rows: default::scan_batch_rows(),
            write_batch_rows: default::write_batch_rows(),
            sort_buffer_bytes: default::sort_buffer_bytes(),
            dedup_budget: default::dedup_budget(),
            block_full_table_scans: false,
            max_dnf_terms: default::max_dnf_terms(),
            id_join_threshold: default::id_join_threshold(),
            range_target: default::range_target(),
            shard_count: default::shard_count(),
            strict: false,
        }
    }
}

mod default {
    pub fn catalog() -> String {
        "strata".to_owned()
    }

    pub fn query_threads() -> usize {
        8
    }

    pub fn scan_batch_rows() -> usize {
        1000
    }

    pub fn write_batch_rows() -> usize {
        1000
    }

    pub fn sort_buffer_bytes() -> usize {
        64 << 20
    }

    pub fn dedup_budget() -> usize {
        1 << 20
    }

    pub fn max_dnf_terms() -> usize {
        64
    }

    pub fn id_join_threshold() -> usize {
        32
    }

    pub fn range_target() -> usize {
        2000
    }

    pub fn shard_count() -> u8 {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"query_threads": 2}"#).unwrap();
        assert_eq!(config.query_threads, 2);
        assert_eq!(config.scan_batch_rows, 1000);
        assert_eq!(config.catalog, "strata");
        assert!(!config.strict);
    }
}
