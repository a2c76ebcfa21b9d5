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

use std::collections::HashMap;

use crate::catalog::FeatureType;
use crate::types::{Datum, Geometry, ScalarImpl};

/// Row visibility carried by a feature.
///
/// The engine passes visibility bytes through to the backend untouched;
/// evaluating them against authorizations is the backend's job.
#[derive(Debug, Clone, PartialEq)]
pub enum Visibility {
    /// One expression guarding the whole feature.
    Expression(String),
    /// One expression per attribute, aligned with the feature type. Only
    /// valid for types in attribute visibility mode.
    PerAttribute(Vec<Option<String>>),
}

/// A single record of a feature type: id plus positionally aligned datums.
///
/// Never mutated by the index layer once handed to a writer.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: String,
    pub datums: Vec<Datum>,
    pub user_data: HashMap<String, String>,
    /// Visibility constraint; `None` means unrestricted.
    pub visibility: Option<Visibility>,
}

impl Feature {
    pub fn new(id: impl Into<String>, datums: Vec<Datum>) -> Self {
        Self {
            id: id.into(),
            datums,
            user_data: HashMap::new(),
            visibility: None,
        }
    }

    pub fn with_visibility(mut self, visibility: impl Into<String>) -> Self {
        self.visibility = Some(Visibility::Expression(visibility.into()));
        self
    }

    /// The feature-wide visibility expression, when one applies.
    pub fn visibility_expression(&self) -> Option<&str> {
        match &self.visibility {
            Some(Visibility::Expression(expr)) => Some(expr),
            _ => None,
        }
    }

    /// The visibility of one attribute in per-attribute mode.
    pub fn attribute_visibility(&self, index: usize) -> Option<&str> {
        match &self.visibility {
            Some(Visibility::PerAttribute(by_attr)) => {
                by_attr.get(index).and_then(|v| v.as_deref())
            }
            _ => None,
        }
    }

    pub fn datum(&self, index: usize) -> &Datum {
        &self.datums[index]
    }

    /// The default geometry value, when present.
    pub fn geometry<'a>(&'a self, ft: &FeatureType) -> Option<&'a Geometry> {
        self.datums[ft.default_geometry()]
            .as_ref()
            .and_then(ScalarImpl::as_geometry)
    }

    /// The default date value in epoch milliseconds, when present.
    pub fn timestamp(&self, ft: &FeatureType) -> Option<i64> {
        ft.default_date()
            .and_then(|idx| self.datums[idx].as_ref())
            .and_then(ScalarImpl::as_timestamp)
    }

    /// Rough in-memory footprint, used by sort budgeting.
    pub fn estimated_size(&self) -> usize {
        self.id.len()
            + self
                .datums
                .iter()
                .map(|d| d.as_ref().map_or(1, ScalarImpl::estimated_size))
                .sum::<usize>()
    }
}
