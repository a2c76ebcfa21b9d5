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

//! Storage layer: the ordered-KV backend contract, the in-memory backend,
//! schema metadata, the write path, the scan pipeline and the public
//! [`FeatureStore`] API.

pub mod backend;
pub mod datastore;
pub mod metadata;
pub mod scan;
pub mod write;

pub use backend::memory::MemoryBackend;
pub use backend::{KvBackend, KvEntry, KvMutation, ScanRequest};
pub use datastore::FeatureStore;
pub use scan::{DensityGrid, QueryResult, QueryStream};
pub use write::WriteCounts;
