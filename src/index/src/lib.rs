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

//! Indexing and query planning: predicate model, per-index row codecs,
//! strategy selection and scan-plan assembly.

pub mod hints;
pub mod keys;
pub mod planner;
pub mod predicate;
pub mod strategy;

pub use hints::QueryHints;
pub use keys::{ColumnFamily, FeatureIndex, IndexSet, MutationOp, RowMutation, ScanRange};
pub use planner::{Explanation, QueryPlan, QueryPlanner, ScanOperator, ScanPlan};
pub use predicate::Predicate;
pub use strategy::FilterStrategy;
