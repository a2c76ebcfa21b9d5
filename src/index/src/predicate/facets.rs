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

//! Facet extraction: what each conjunct offers the indices.
//!
//! A disjunct's conjunct list is classified leaf by leaf into the spatial
//! window, the time interval, the id set and the attribute clauses; whatever
//! an index cannot consume later becomes its residual.

use std::collections::{BTreeSet, HashMap};

use strata_common::catalog::{Cardinality, FeatureType, IndexCoverage};
use strata_common::types::{DataType, ScalarImpl};
use strata_common::StrataResult;

use super::{like_prefix, CmpOp, Predicate};

/// `((xmin, ymin), (xmax, ymax))`.
pub type Envelope = ((f64, f64), (f64, f64));

/// How a single conjunct leaf participates in planning.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafKind {
    /// An envelope-exact spatial constraint on the default geometry.
    SpatialBBox(Envelope),
    /// A spatial constraint on the default geometry that needs residual
    /// evaluation even when an index covers its envelope.
    SpatialOther(Envelope),
    /// A time constraint on the default date, inclusive millis.
    Temporal(i64, i64),
    /// An id set constraint.
    Ids(BTreeSet<String>),
    /// An indexable attribute constraint; `exact` means the index range
    /// reproduces the predicate with no false positives.
    Attr {
        attr_index: usize,
        op: AttrOp,
        exact: bool,
    },
    /// Constant true.
    True,
    /// Constant false.
    False,
    /// Only evaluable client-side.
    Residual,
}

/// Attribute operations the attribute index can turn into ranges.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrOp {
    Eq(ScalarImpl),
    Prefix(String),
    Lt(ScalarImpl),
    Le(ScalarImpl),
    Gt(ScalarImpl),
    Ge(ScalarImpl),
    NotNull,
}

impl AttrOp {
    pub fn is_equality(&self) -> bool {
        matches!(self, AttrOp::Eq(_) | AttrOp::Prefix(_))
    }
}

/// An attribute clause with its effective cardinality.
#[derive(Debug, Clone)]
pub struct AttrClause {
    pub attr_index: usize,
    pub name: String,
    pub op: AttrOp,
    pub cardinality: Cardinality,
}

/// A spatial leaf with its query envelope.
#[derive(Debug, Clone)]
pub struct SpatialLeaf {
    pub envelope: Envelope,
    pub exact_bbox: bool,
}

/// The extracted facets of one disjunct.
#[derive(Debug, Clone, Default)]
pub struct QueryFacets {
    /// The disjunct's conjunct leaves, as normalised.
    pub conjuncts: Vec<Predicate>,
    pub spatial: Vec<SpatialLeaf>,
    /// Intersection of the spatial envelopes; `None` means no spatial
    /// constraint (whole world).
    pub envelope: Option<Envelope>,
    /// Intersection of the temporal constraints, inclusive millis; `None`
    /// means all time.
    pub interval: Option<(i64, i64)>,
    /// Intersection of the id sets; `None` means unconstrained.
    pub ids: Option<BTreeSet<String>>,
    pub attr_clauses: Vec<AttrClause>,
    /// The conjunct can match nothing (e.g. disjoint intervals).
    pub constant_false: bool,
}

impl QueryFacets {
    pub fn has_spatial(&self) -> bool {
        !self.spatial.is_empty()
    }

    pub fn has_temporal(&self) -> bool {
        self.interval.is_some()
    }

    pub fn has_ids(&self) -> bool {
        self.ids.is_some()
    }

    /// The spatial window to enumerate ranges over, defaulting to the whole
    /// world when no spatial constraint exists.
    pub fn query_envelope(&self) -> Envelope {
        self.envelope
            .unwrap_or(((-180.0, -90.0), (180.0, 90.0)))
    }

    /// The best equality-family clause at or above a cardinality floor.
    pub fn attr_equality(&self, floor: Cardinality) -> Option<&AttrClause> {
        self.attr_clauses
            .iter()
            .filter(|c| c.op.is_equality() && c.cardinality >= floor)
            .max_by_key(|c| (c.cardinality, std::cmp::Reverse(c.attr_index)))
    }

    /// Any range-family clause (a non-equality attribute constraint).
    pub fn attr_range(&self) -> Option<&AttrClause> {
        self.attr_clauses
            .iter()
            .filter(|c| !c.op.is_equality())
            .max_by_key(|c| (c.cardinality, std::cmp::Reverse(c.attr_index)))
    }

    /// The attribute the attribute index should pivot on: the most selective
    /// equality first, then any range clause.
    pub fn best_attr_target(&self) -> Option<usize> {
        self.attr_equality(Cardinality::Low)
            .or_else(|| self.attr_range())
            .map(|c| c.attr_index)
    }
}

/// Classify a single conjunct leaf against the feature type.
pub fn classify_leaf(ft: &FeatureType, leaf: &Predicate) -> StrataResult<LeafKind> {
    let default_geom = ft.default_geometry_attr().name.clone();
    let is_default_geom = |attr: &Option<String>| match attr {
        None => true,
        Some(name) => *name == default_geom,
    };
    let is_default_date = |attr: &Option<String>| match (attr, ft.default_date()) {
        (None, Some(_)) => true,
        (Some(name), Some(idx)) => ft.attribute(idx).name == *name,
        _ => false,
    };

    Ok(match leaf {
        Predicate::Include => LeafKind::True,
        Predicate::Exclude => LeafKind::False,
        Predicate::BBox { attr, min, max } if is_default_geom(attr) => {
            LeafKind::SpatialBBox((*min, *max))
        }
        Predicate::Intersects { attr, geometry } | Predicate::Within { attr, geometry }
            if is_default_geom(attr) =>
        {
            match geometry.envelope() {
                Some(env) => LeafKind::SpatialOther((
                    (env.min().x, env.min().y),
                    (env.max().x, env.max().y),
                )),
                None => LeafKind::False,
            }
        }
        Predicate::Contains { attr, geometry } if is_default_geom(attr) => {
            // a feature containing the query geometry must intersect its envelope
            match geometry.envelope() {
                Some(env) => LeafKind::SpatialOther((
                    (env.min().x, env.min().y),
                    (env.max().x, env.max().y),
                )),
                None => LeafKind::False,
            }
        }
        Predicate::DWithin {
            attr,
            geometry,
            distance,
        } if is_default_geom(attr) => match geometry.envelope() {
            Some(env) => LeafKind::SpatialOther((
                (env.min().x - distance, env.min().y - distance),
                (env.max().x + distance, env.max().y + distance),
            )),
            None => LeafKind::False,
        },
        Predicate::During { attr, start, end } if is_default_date(attr) => {
            if end <= start {
                LeafKind::False
            } else {
                LeafKind::Temporal(*start, end - 1)
            }
        }
        Predicate::Between { attr, start, end } if is_default_date(attr) => {
            if end < start {
                LeafKind::False
            } else {
                LeafKind::Temporal(*start, *end)
            }
        }
        Predicate::Cmp { attr, op, value } => classify_cmp(ft, attr, *op, value),
        Predicate::In(ids) => LeafKind::Ids(ids.iter().cloned().collect()),
        Predicate::Like { attr, pattern } => match (ft.attribute_index(attr), like_prefix(pattern))
        {
            (Some(idx), Some(prefix))
                if ft.attribute(idx).coverage != IndexCoverage::None
                    && ft.attribute(idx).data_type == DataType::Varchar =>
            {
                LeafKind::Attr {
                    attr_index: idx,
                    op: AttrOp::Prefix(prefix.to_owned()),
                    exact: true,
                }
            }
            _ => LeafKind::Residual,
        },
        Predicate::IsNotNull(attr) => match ft.attribute_index(attr) {
            Some(idx) if ft.attribute(idx).coverage != IndexCoverage::None => LeafKind::Attr {
                attr_index: idx,
                op: AttrOp::NotNull,
                exact: true,
            },
            _ => LeafKind::Residual,
        },
        _ => LeafKind::Residual,
    })
}

fn classify_cmp(ft: &FeatureType, attr: &str, op: CmpOp, value: &ScalarImpl) -> LeafKind {
    // a comparison on the default date is a temporal constraint
    if let Some(date_idx) = ft.default_date() {
        if ft.attribute(date_idx).name == attr {
            if let ScalarImpl::Timestamp(ts) = value {
                return match op {
                    CmpOp::Eq => LeafKind::Temporal(*ts, *ts),
                    CmpOp::Lt => LeafKind::Temporal(i64::MIN, ts.saturating_sub(1)),
                    CmpOp::Le => LeafKind::Temporal(i64::MIN, *ts),
                    CmpOp::Gt => LeafKind::Temporal(ts.saturating_add(1), i64::MAX),
                    CmpOp::Ge => LeafKind::Temporal(*ts, i64::MAX),
                    CmpOp::Ne => LeafKind::Residual,
                };
            }
        }
    }
    match ft.attribute_index(attr) {
        Some(idx) if ft.attribute(idx).coverage != IndexCoverage::None => {
            // a comparison against the wrong type matches nothing, and must
            // not reach the codec where it would encode bogus ranges
            if !value_matches_type(value, &ft.attribute(idx).data_type) {
                return LeafKind::False;
            }
            let attr_op = match op {
                CmpOp::Eq => AttrOp::Eq(value.clone()),
                CmpOp::Lt => AttrOp::Lt(value.clone()),
                CmpOp::Le => AttrOp::Le(value.clone()),
                CmpOp::Gt => AttrOp::Gt(value.clone()),
                CmpOp::Ge => AttrOp::Ge(value.clone()),
                CmpOp::Ne => return LeafKind::Residual,
            };
            LeafKind::Attr {
                attr_index: idx,
                op: attr_op,
                exact: true,
            }
        }
        _ => LeafKind::Residual,
    }
}

/// Whether a clause value has the attribute's (element) type.
fn value_matches_type(value: &ScalarImpl, dt: &DataType) -> bool {
    let element = match dt {
        DataType::List(element) => element.as_ref(),
        dt => dt,
    };
    matches!(
        (value, element),
        (ScalarImpl::Bool(_), DataType::Boolean)
            | (ScalarImpl::Int32(_), DataType::Int32)
            | (ScalarImpl::Int64(_), DataType::Int64)
            | (ScalarImpl::Float32(_), DataType::Float32)
            | (ScalarImpl::Float64(_), DataType::Float64)
            | (ScalarImpl::Varchar(_), DataType::Varchar)
            | (ScalarImpl::Timestamp(_), DataType::Timestamp)
            | (ScalarImpl::Uuid(_), DataType::Uuid)
    )
}

/// Extract the facets of one disjunct (a conjunct list).
pub fn extract(
    ft: &FeatureType,
    stats: &HashMap<usize, Cardinality>,
    conjuncts: &[Predicate],
) -> StrataResult<QueryFacets> {
    let mut facets = QueryFacets {
        conjuncts: conjuncts.to_vec(),
        ..Default::default()
    };

    for leaf in conjuncts {
        match classify_leaf(ft, leaf)? {
            LeafKind::True => {}
            LeafKind::False => facets.constant_false = true,
            LeafKind::SpatialBBox(env) => {
                facets.spatial.push(SpatialLeaf {
                    envelope: env,
                    exact_bbox: true,
                });
                intersect_envelope(&mut facets, env);
            }
            LeafKind::SpatialOther(env) => {
                facets.spatial.push(SpatialLeaf {
                    envelope: env,
                    exact_bbox: false,
                });
                intersect_envelope(&mut facets, env);
            }
            LeafKind::Temporal(lo, hi) => {
                let merged = match facets.interval {
                    None => (lo, hi),
                    Some((a, b)) => (a.max(lo), b.min(hi)),
                };
                if merged.0 > merged.1 {
                    facets.constant_false = true;
                }
                facets.interval = Some(merged);
            }
            LeafKind::Ids(ids) => {
                let merged: BTreeSet<String> = match &facets.ids {
                    None => ids,
                    Some(existing) => existing.intersection(&ids).cloned().collect(),
                };
                if merged.is_empty() {
                    facets.constant_false = true;
                }
                facets.ids = Some(merged);
            }
            LeafKind::Attr {
                attr_index, op, ..
            } => {
                let descriptor = ft.attribute(attr_index);
                facets.attr_clauses.push(AttrClause {
                    attr_index,
                    name: descriptor.name.clone(),
                    op,
                    cardinality: stats
                        .get(&attr_index)
                        .copied()
                        .unwrap_or(descriptor.cardinality),
                });
            }
            LeafKind::Residual => {}
        }
    }
    Ok(facets)
}

fn intersect_envelope(facets: &mut QueryFacets, env: Envelope) {
    let merged = match facets.envelope {
        None => env,
        Some(((x0, y0), (x1, y1))) => (
            (x0.max(env.0 .0), y0.max(env.0 .1)),
            (x1.min(env.1 .0), y1.min(env.1 .1)),
        ),
    };
    if merged.0 .0 > merged.1 .0 || merged.0 .1 > merged.1 .1 {
        facets.constant_false = true;
    }
    facets.envelope = Some(merged);
}
