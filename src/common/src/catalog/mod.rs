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

//! Feature type definitions: the schema every index and codec works from.

use serde::{Deserialize, Serialize};
use strata_curve::TimePeriod;
use strum_macros::{Display, EnumString};

use crate::error::{StrataError, StrataResult};
use crate::types::DataType;

/// How an attribute participates in the attribute index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexCoverage {
    /// Not indexed.
    #[default]
    None,
    /// The index row carries only the key material; a fetch by id completes
    /// the feature.
    Join,
    /// The index row carries the whole serialized feature.
    Full,
}

/// Selectivity hint for the strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    Low,
    #[default]
    Normal,
    High,
}

/// Length of the time bins used by the temporal indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZInterval {
    Day,
    #[default]
    Week,
    Month,
    Year,
}

impl ZInterval {
    pub fn period(&self) -> TimePeriod {
        match self {
            ZInterval::Day => TimePeriod::Day,
            ZInterval::Week => TimePeriod::Week,
            ZInterval::Month => TimePeriod::Month,
            ZInterval::Year => TimePeriod::Year,
        }
    }
}

/// Whether visibility expressions apply per feature or per attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityMode {
    #[default]
    Feature,
    Attribute,
}

/// The index families a feature type can enable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Z2,
    Z3,
    Xz2,
    Xz3,
    Id,
    Attribute,
}

impl IndexKind {
    /// Indices that can emit more than one row per feature.
    pub fn may_duplicate(&self) -> bool {
        matches!(self, IndexKind::Xz2 | IndexKind::Xz3 | IndexKind::Attribute)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub coverage: IndexCoverage,
    #[serde(default)]
    pub cardinality: Cardinality,
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            coverage: IndexCoverage::None,
            cardinality: Cardinality::Normal,
        }
    }

    pub fn indexed(mut self, coverage: IndexCoverage) -> Self {
        self.coverage = coverage;
        self
    }

    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }
}

/// An immutable, validated feature type.
///
/// Constructed through [`FeatureTypeBuilder`]; the sharing byte is assigned
/// by the schema store when `table_sharing` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureType {
    name: String,
    attributes: Vec<AttributeDescriptor>,
    default_geometry: usize,
    default_date: Option<usize>,
    table_sharing: bool,
    sharing_byte: u8,
    enabled_indexes: Vec<IndexKind>,
    z_interval: ZInterval,
    visibility_mode: VisibilityMode,
    shard_count: u8,
}

impl FeatureType {
    pub fn builder(name: impl Into<String>) -> FeatureTypeBuilder {
        FeatureTypeBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[AttributeDescriptor] {
        &self.attributes
    }

    pub fn attribute(&self, index: usize) -> &AttributeDescriptor {
        &self.attributes[index]
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn default_geometry(&self) -> usize {
        self.default_geometry
    }

    pub fn default_geometry_attr(&self) -> &AttributeDescriptor {
        &self.attributes[self.default_geometry]
    }

    pub fn default_date(&self) -> Option<usize> {
        self.default_date
    }

    /// Whether the default geometry is point-typed, which selects the Z
    /// family over the XZ family.
    pub fn is_point_geometry(&self) -> bool {
        self.default_geometry_attr().data_type.is_point()
    }

    pub fn table_sharing(&self) -> bool {
        self.table_sharing
    }

    pub fn sharing_byte(&self) -> u8 {
        self.sharing_byte
    }

    /// Invoked by the schema store when registering a shared type.
    pub fn assign_sharing_byte(&mut self, byte: u8) {
        self.sharing_byte = byte;
    }

    pub fn enabled_indexes(&self) -> &[IndexKind] {
        &self.enabled_indexes
    }

    pub fn is_enabled(&self, kind: IndexKind) -> bool {
        self.enabled_indexes.contains(&kind)
    }

    pub fn z_interval(&self) -> ZInterval {
        self.z_interval
    }

    pub fn visibility_mode(&self) -> VisibilityMode {
        self.visibility_mode
    }

    pub fn shard_count(&self) -> u8 {
        self.shard_count
    }

    /// Append new attributes; the only schema evolution the engine allows.
    pub fn with_appended_attributes(
        &self,
        new_attributes: Vec<AttributeDescriptor>,
    ) -> StrataResult<FeatureType> {
        let mut attributes = self.attributes.clone();
        for attr in new_attributes {
            if self.attribute_index(&attr.name).is_some() {
                return Err(StrataError::SchemaConflict {
                    name: self.name.clone(),
                });
            }
            attributes.push(attr);
        }
        let mut updated = self.clone();
        updated.attributes = attributes;
        Ok(updated)
    }
}

pub struct FeatureTypeBuilder {
    name: String,
    attributes: Vec<AttributeDescriptor>,
    default_geometry: Option<String>,
    default_date: Option<String>,
    table_sharing: bool,
    enabled_indexes: Option<Vec<IndexKind>>,
    z_interval: ZInterval,
    visibility_mode: VisibilityMode,
    shard_count: u8,
}

impl FeatureTypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            default_geometry: None,
            default_date: None,
            table_sharing: false,
            enabled_indexes: None,
            z_interval: ZInterval::default(),
            visibility_mode: VisibilityMode::default(),
            shard_count: 4,
        }
    }

    pub fn attribute(mut self, attr: AttributeDescriptor) -> Self {
        self.attributes.push(attr);
        self
    }

    pub fn default_geometry(mut self, name: impl Into<String>) -> Self {
        self.default_geometry = Some(name.into());
        self
    }

    pub fn default_date(mut self, name: impl Into<String>) -> Self {
        self.default_date = Some(name.into());
        self
    }

    pub fn table_sharing(mut self, sharing: bool) -> Self {
        self.table_sharing = sharing;
        self
    }

    pub fn enabled_indexes(mut self, kinds: Vec<IndexKind>) -> Self {
        self.enabled_indexes = Some(kinds);
        self
    }

    pub fn z_interval(mut self, interval: ZInterval) -> Self {
        self.z_interval = interval;
        self
    }

    pub fn visibility_mode(mut self, mode: VisibilityMode) -> Self {
        self.visibility_mode = mode;
        self
    }

    pub fn shard_count(mut self, shards: u8) -> Self {
        self.shard_count = shards.max(1);
        self
    }

    /// Validate and freeze the type.
    pub fn build(self) -> StrataResult<FeatureType> {
        let invalid = |reason: String| StrataError::Serde { message: reason };

        let mut seen = std::collections::HashSet::new();
        for attr in &self.attributes {
            if !seen.insert(attr.name.as_str()) {
                return Err(invalid(format!("duplicate attribute `{}`", attr.name)));
            }
            if attr.coverage != IndexCoverage::None && !attr.data_type.is_lex_encodable() {
                return Err(invalid(format!(
                    "attribute `{}` cannot be indexed: type has no order-preserving encoding",
                    attr.name
                )));
            }
        }

        let geometry_name = self
            .default_geometry
            .or_else(|| {
                self.attributes
                    .iter()
                    .find(|a| a.data_type.is_geometry())
                    .map(|a| a.name.clone())
            })
            .ok_or_else(|| invalid("feature type has no geometry attribute".to_owned()))?;
        let default_geometry = self
            .attributes
            .iter()
            .position(|a| a.name == geometry_name)
            .ok_or_else(|| invalid(format!("unknown geometry attribute `{geometry_name}`")))?;
        if !self.attributes[default_geometry].data_type.is_geometry() {
            return Err(invalid(format!(
                "default geometry `{geometry_name}` is not geometry-typed"
            )));
        }

        let default_date = match self.default_date {
            Some(name) => {
                let idx = self
                    .attributes
                    .iter()
                    .position(|a| a.name == name)
                    .ok_or_else(|| invalid(format!("unknown date attribute `{name}`")))?;
                if self.attributes[idx].data_type != DataType::Timestamp {
                    return Err(invalid(format!("default date `{name}` is not a timestamp")));
                }
                Some(idx)
            }
            None => self
                .attributes
                .iter()
                .position(|a| a.data_type == DataType::Timestamp),
        };

        let point = self.attributes[default_geometry].data_type.is_point();
        let enabled_indexes = self.enabled_indexes.unwrap_or_else(|| {
            let mut kinds = vec![IndexKind::Id];
            match (point, default_date.is_some()) {
                (true, true) => kinds.extend([IndexKind::Z3, IndexKind::Z2]),
                (true, false) => kinds.push(IndexKind::Z2),
                (false, true) => kinds.extend([IndexKind::Xz3, IndexKind::Xz2]),
                (false, false) => kinds.push(IndexKind::Xz2),
            }
            if self
                .attributes
                .iter()
                .any(|a| a.coverage != IndexCoverage::None)
            {
                kinds.push(IndexKind::Attribute);
            }
            kinds
        });

        // temporal indices need a timestamp to bin on
        if (enabled_indexes.contains(&IndexKind::Z3) || enabled_indexes.contains(&IndexKind::Xz3))
            && default_date.is_none()
        {
            return Err(invalid(
                "temporal index enabled but no default date attribute".to_owned(),
            ));
        }

        // point curves cannot carry extended objects
        if !point
            && (enabled_indexes.contains(&IndexKind::Z2)
                || enabled_indexes.contains(&IndexKind::Z3))
        {
            return Err(invalid(
                "z2/z3 indices require a point-typed default geometry".to_owned(),
            ));
        }

        let indexed: Vec<_> = self
            .attributes
            .iter()
            .filter(|a| a.coverage != IndexCoverage::None)
            .collect();
        if !indexed.is_empty() && !enabled_indexes.contains(&IndexKind::Attribute) {
            return Err(invalid(
                "attributes are marked indexed but the attribute index is disabled".to_owned(),
            ));
        }
        if enabled_indexes.contains(&IndexKind::Attribute) && indexed.is_empty() {
            return Err(invalid(
                "attribute index enabled but no attribute is marked indexed".to_owned(),
            ));
        }

        // join rows cannot carry per-attribute visibility safely
        if self.visibility_mode == VisibilityMode::Attribute
            && indexed.iter().any(|a| a.coverage == IndexCoverage::Join)
        {
            return Err(invalid(
                "per-attribute visibility requires full coverage on all indexed attributes"
                    .to_owned(),
            ));
        }

        Ok(FeatureType {
            name: self.name,
            attributes: self.attributes,
            default_geometry,
            default_date,
            table_sharing: self.table_sharing,
            sharing_byte: 0,
            enabled_indexes,
            z_interval: self.z_interval,
            visibility_mode: self.visibility_mode,
            shard_count: self.shard_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_type() -> FeatureType {
        FeatureType::builder("tracks")
            .attribute(AttributeDescriptor::new("name", DataType::Varchar).indexed(IndexCoverage::Join))
            .attribute(AttributeDescriptor::new("dtg", DataType::Timestamp))
            .attribute(AttributeDescriptor::new("geom", DataType::Point))
            .build()
            .unwrap()
    }

    #[test]
    fn test_defaults_inferred() {
        let ft = point_type();
        assert_eq!(ft.default_geometry_attr().name, "geom");
        assert_eq!(ft.default_date(), Some(1));
        assert!(ft.is_enabled(IndexKind::Z3));
        assert!(ft.is_enabled(IndexKind::Z2));
        assert!(ft.is_enabled(IndexKind::Id));
        assert!(ft.is_enabled(IndexKind::Attribute));
        assert!(!ft.is_enabled(IndexKind::Xz2));
    }

    #[test]
    fn test_non_point_gets_xz() {
        let ft = FeatureType::builder("shapes")
            .attribute(AttributeDescriptor::new("geom", DataType::Polygon))
            .attribute(AttributeDescriptor::new("dtg", DataType::Timestamp))
            .build()
            .unwrap();
        assert!(ft.is_enabled(IndexKind::Xz3));
        assert!(!ft.is_enabled(IndexKind::Z2));
    }

    #[test]
    fn test_temporal_index_requires_date() {
        let err = FeatureType::builder("bad")
            .attribute(AttributeDescriptor::new("geom", DataType::Point))
            .enabled_indexes(vec![IndexKind::Z3])
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn test_attribute_visibility_rejects_join() {
        let err = FeatureType::builder("bad")
            .attribute(
                AttributeDescriptor::new("name", DataType::Varchar).indexed(IndexCoverage::Join),
            )
            .attribute(AttributeDescriptor::new("geom", DataType::Point))
            .visibility_mode(VisibilityMode::Attribute)
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn test_append_attributes_only() {
        let ft = point_type();
        let updated = ft
            .with_appended_attributes(vec![AttributeDescriptor::new("speed", DataType::Float64)])
            .unwrap();
        assert_eq!(updated.attributes().len(), 4);
        assert!(ft
            .with_appended_attributes(vec![AttributeDescriptor::new("name", DataType::Varchar)])
            .is_err());
    }

    #[test]
    fn test_schema_blob_roundtrip() {
        let ft = point_type();
        let blob = serde_json::to_string(&ft).unwrap();
        let back: FeatureType = serde_json::from_str(&blob).unwrap();
        assert_eq!(ft, back);
    }
}
