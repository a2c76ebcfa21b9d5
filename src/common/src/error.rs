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

use strata_curve::CurveError;

pub type StrataResult<T> = std::result::Result<T, StrataError>;

#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    #[error("schema `{name}` already exists with a different shape")]
    SchemaConflict { name: String },

    #[error("unsupported predicate: {reason}")]
    UnsupportedPredicate { reason: String },

    #[error("query requires a full table scan, which is blocked by configuration")]
    FullScanBlocked,

    #[error(transparent)]
    Curve(#[from] CurveError),

    #[error("sort buffer exceeded the {limit_bytes} byte budget")]
    SortBudgetExceeded { limit_bytes: usize },

    #[error("deduplication set exceeded the {limit} id budget")]
    DedupeBudgetExceeded { limit: usize },

    #[error("backend failure (retryable: {retryable})")]
    Backend {
        retryable: bool,
        #[source]
        source: anyhow::Error,
    },

    #[error("serialization failure: {message}")]
    Serde { message: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl StrataError {
    pub fn serde(message: impl Into<String>) -> Self {
        StrataError::Serde {
            message: message.into(),
        }
    }

    pub fn backend(source: impl Into<anyhow::Error>, retryable: bool) -> Self {
        StrataError::Backend {
            retryable,
            source: source.into(),
        }
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StrataError::Backend { retryable: true, .. })
    }
}

impl From<memcomparable::Error> for StrataError {
    fn from(e: memcomparable::Error) -> Self {
        StrataError::serde(e.to_string())
    }
}
