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

//! Logical attribute types and their runtime values.

mod geometry;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

pub use geometry::Geometry;

/// Logical type of a feature attribute.
///
/// `Timestamp` carries UTC epoch milliseconds. The geometry variants narrow
/// what a writer may store; `Geometry` accepts any shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Varchar,
    Timestamp,
    Uuid,
    List(Box<DataType>),
    Map(Box<DataType>, Box<DataType>),
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    Geometry,
}

impl DataType {
    pub fn is_geometry(&self) -> bool {
        matches!(
            self,
            DataType::Point
                | DataType::LineString
                | DataType::Polygon
                | DataType::MultiPoint
                | DataType::MultiLineString
                | DataType::MultiPolygon
                | DataType::Geometry
        )
    }

    /// Whether values of this type always index as single points.
    pub fn is_point(&self) -> bool {
        matches!(self, DataType::Point)
    }

    /// Byte width of the order-preserving encoding, `None` when variable.
    pub fn lex_width(&self) -> Option<usize> {
        match self {
            DataType::Boolean => Some(1),
            DataType::Int32 | DataType::Float32 => Some(4),
            DataType::Int64 | DataType::Float64 | DataType::Timestamp => Some(8),
            DataType::Uuid => Some(16),
            DataType::Varchar => None,
            _ => None,
        }
    }

    /// Whether the attribute index can carry values of this type in a row
    /// key. Lists index their elements.
    pub fn is_lex_encodable(&self) -> bool {
        match self {
            DataType::Boolean
            | DataType::Int32
            | DataType::Int64
            | DataType::Float32
            | DataType::Float64
            | DataType::Varchar
            | DataType::Timestamp
            | DataType::Uuid => true,
            DataType::List(element) => element.is_lex_encodable(),
            _ => false,
        }
    }
}

/// A concrete attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarImpl {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Varchar(String),
    /// UTC epoch milliseconds.
    Timestamp(i64),
    Uuid(uuid::Uuid),
    List(Vec<ScalarImpl>),
    Map(Vec<(ScalarImpl, ScalarImpl)>),
    Geometry(Geometry),
}

/// A nullable attribute value.
pub type Datum = Option<ScalarImpl>;

impl ScalarImpl {
    /// Total order between values of the same logical type; `None` when the
    /// variants differ or the type has no meaningful order.
    pub fn cmp_same_type(&self, other: &ScalarImpl) -> Option<Ordering> {
        use ScalarImpl::*;
        match (self, other) {
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Int32(a), Int32(b)) => Some(a.cmp(b)),
            (Int64(a), Int64(b)) => Some(a.cmp(b)),
            (Float32(a), Float32(b)) => Some(a.total_cmp(b)),
            (Float64(a), Float64(b)) => Some(a.total_cmp(b)),
            (Varchar(a), Varchar(b)) => Some(a.cmp(b)),
            (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
            (Uuid(a), Uuid(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn as_geometry(&self) -> Option<&Geometry> {
        match self {
            ScalarImpl::Geometry(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<i64> {
        match self {
            ScalarImpl::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_varchar(&self) -> Option<&str> {
        match self {
            ScalarImpl::Varchar(s) => Some(s),
            _ => None,
        }
    }

    /// Rough in-memory footprint, used by sort budgeting.
    pub fn estimated_size(&self) -> usize {
        match self {
            ScalarImpl::Bool(_) => 1,
            ScalarImpl::Int32(_) | ScalarImpl::Float32(_) => 4,
            ScalarImpl::Int64(_) | ScalarImpl::Float64(_) | ScalarImpl::Timestamp(_) => 8,
            ScalarImpl::Uuid(_) => 16,
            ScalarImpl::Varchar(s) => s.len(),
            ScalarImpl::List(items) => items.iter().map(Self::estimated_size).sum::<usize>() + 8,
            ScalarImpl::Map(pairs) => {
                pairs
                    .iter()
                    .map(|(k, v)| k.estimated_size() + v.estimated_size())
                    .sum::<usize>()
                    + 8
            }
            ScalarImpl::Geometry(g) => g.estimated_size(),
        }
    }
}
