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

//! The predicate tree: a closed union over which all traversal is
//! exhaustive matching, plus client-side evaluation against features.

mod facets;
mod normalize;

use std::fmt;

use geo::{Distance, Euclidean, Intersects, Relate};
use geo_types::{Coord, Rect};
use strata_common::catalog::FeatureType;
use strata_common::feature::Feature;
use strata_common::types::{Geometry, ScalarImpl};
use strata_common::{StrataError, StrataResult};

pub use facets::{
    classify_leaf, extract, AttrClause, AttrOp, Envelope, LeafKind, QueryFacets, SpatialLeaf,
};
pub use normalize::{normalize, to_dnf, Dnf};

/// Comparison operators on attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn negated(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// A query predicate.
///
/// Spatial and temporal nodes with `attr: None` bind to the feature type's
/// default geometry/date attribute at evaluation and planning time.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    /// Feature geometry envelope intersects the box.
    BBox {
        attr: Option<String>,
        min: (f64, f64),
        max: (f64, f64),
    },
    /// Feature geometry intersects the query geometry.
    Intersects {
        attr: Option<String>,
        geometry: Geometry,
    },
    /// Feature geometry lies within the query geometry.
    Within {
        attr: Option<String>,
        geometry: Geometry,
    },
    /// Feature geometry contains the query geometry.
    Contains {
        attr: Option<String>,
        geometry: Geometry,
    },
    /// Feature geometry within `distance` (in degrees) of the query geometry.
    DWithin {
        attr: Option<String>,
        geometry: Geometry,
        distance: f64,
    },
    /// Timestamp in `[start, end)` (epoch millis).
    During {
        attr: Option<String>,
        start: i64,
        end: i64,
    },
    /// Timestamp in `[start, end]` (epoch millis).
    Between {
        attr: Option<String>,
        start: i64,
        end: i64,
    },
    Cmp {
        attr: String,
        op: CmpOp,
        value: ScalarImpl,
    },
    /// Feature id in the set.
    In(Vec<String>),
    /// SQL LIKE with `%` and `_` wildcards.
    Like { attr: String, pattern: String },
    IsNull(String),
    IsNotNull(String),
    /// Constant true.
    Include,
    /// Constant false.
    Exclude,
}

impl Predicate {
    pub fn and(preds: Vec<Predicate>) -> Predicate {
        match preds.len() {
            0 => Predicate::Include,
            1 => preds.into_iter().next().unwrap(),
            _ => Predicate::And(preds),
        }
    }

    pub fn or(preds: Vec<Predicate>) -> Predicate {
        match preds.len() {
            0 => Predicate::Exclude,
            1 => preds.into_iter().next().unwrap(),
            _ => Predicate::Or(preds),
        }
    }

    pub fn not(pred: Predicate) -> Predicate {
        Predicate::Not(Box::new(pred))
    }

    pub fn bbox(min: (f64, f64), max: (f64, f64)) -> Predicate {
        Predicate::BBox {
            attr: None,
            min,
            max,
        }
    }

    pub fn during(start: i64, end: i64) -> Predicate {
        Predicate::During {
            attr: None,
            start,
            end,
        }
    }

    pub fn between(start: i64, end: i64) -> Predicate {
        Predicate::Between {
            attr: None,
            start,
            end,
        }
    }

    pub fn eq(attr: impl Into<String>, value: ScalarImpl) -> Predicate {
        Predicate::Cmp {
            attr: attr.into(),
            op: CmpOp::Eq,
            value,
        }
    }

    pub fn ids<I: IntoIterator<Item = S>, S: Into<String>>(ids: I) -> Predicate {
        Predicate::In(ids.into_iter().map(Into::into).collect())
    }

    /// Evaluate against a feature. This is the reference semantics every
    /// index strategy must agree with after residual filtering.
    pub fn matches(&self, ft: &FeatureType, feature: &Feature) -> StrataResult<bool> {
        Ok(match self {
            Predicate::And(preds) => {
                for p in preds {
                    if !p.matches(ft, feature)? {
                        return Ok(false);
                    }
                }
                true
            }
            Predicate::Or(preds) => {
                for p in preds {
                    if p.matches(ft, feature)? {
                        return Ok(true);
                    }
                }
                false
            }
            Predicate::Not(p) => !p.matches(ft, feature)?,
            Predicate::BBox { attr, min, max } => {
                match feature_geometry(ft, feature, attr.as_deref())? {
                    None => false,
                    Some(g) => {
                        let rect = Rect::new(
                            Coord { x: min.0, y: min.1 },
                            Coord { x: max.0, y: max.1 },
                        );
                        rect.intersects(g.inner())
                    }
                }
            }
            Predicate::Intersects { attr, geometry } => {
                match feature_geometry(ft, feature, attr.as_deref())? {
                    None => false,
                    Some(g) => geometry.inner().intersects(g.inner()),
                }
            }
            Predicate::Within { attr, geometry } => {
                match feature_geometry(ft, feature, attr.as_deref())? {
                    None => false,
                    Some(g) => g.inner().relate(geometry.inner()).is_within(),
                }
            }
            Predicate::Contains { attr, geometry } => {
                match feature_geometry(ft, feature, attr.as_deref())? {
                    None => false,
                    Some(g) => g.inner().relate(geometry.inner()).is_contains(),
                }
            }
            Predicate::DWithin {
                attr,
                geometry,
                distance,
            } => match feature_geometry(ft, feature, attr.as_deref())? {
                None => false,
                Some(g) => Euclidean.distance(g.inner(), geometry.inner()) <= *distance,
            },
            Predicate::During { attr, start, end } => {
                match feature_timestamp(ft, feature, attr.as_deref())? {
                    None => false,
                    Some(ts) => ts >= *start && ts < *end,
                }
            }
            Predicate::Between { attr, start, end } => {
                match feature_timestamp(ft, feature, attr.as_deref())? {
                    None => false,
                    Some(ts) => ts >= *start && ts <= *end,
                }
            }
            Predicate::Cmp { attr, op, value } => {
                let idx = resolve_attr(ft, attr)?;
                match &feature.datums[idx] {
                    None => false,
                    Some(ScalarImpl::List(items)) => {
                        items.iter().any(|item| cmp_matches(item, *op, value))
                    }
                    Some(actual) => cmp_matches(actual, *op, value),
                }
            }
            Predicate::In(ids) => ids.iter().any(|id| id == &feature.id),
            Predicate::Like { attr, pattern } => {
                let idx = resolve_attr(ft, attr)?;
                match &feature.datums[idx] {
                    Some(ScalarImpl::Varchar(s)) => like_matches(pattern, s)?,
                    _ => false,
                }
            }
            Predicate::IsNull(attr) => feature.datums[resolve_attr(ft, attr)?].is_none(),
            Predicate::IsNotNull(attr) => feature.datums[resolve_attr(ft, attr)?].is_some(),
            Predicate::Include => true,
            Predicate::Exclude => false,
        })
    }

    /// The attribute positions a predicate reads, with spatial/temporal
    /// defaults resolved against the type.
    pub fn referenced_attributes(
        &self,
        ft: &FeatureType,
    ) -> StrataResult<std::collections::HashSet<usize>> {
        let mut out = std::collections::HashSet::new();
        self.collect_attributes(ft, &mut out)?;
        Ok(out)
    }

    fn collect_attributes(
        &self,
        ft: &FeatureType,
        out: &mut std::collections::HashSet<usize>,
    ) -> StrataResult<()> {
        match self {
            Predicate::And(preds) | Predicate::Or(preds) => {
                for p in preds {
                    p.collect_attributes(ft, out)?;
                }
            }
            Predicate::Not(p) => p.collect_attributes(ft, out)?,
            Predicate::BBox { attr, .. }
            | Predicate::Intersects { attr, .. }
            | Predicate::Within { attr, .. }
            | Predicate::Contains { attr, .. }
            | Predicate::DWithin { attr, .. } => {
                out.insert(match attr {
                    Some(name) => resolve_attr(ft, name)?,
                    None => ft.default_geometry(),
                });
            }
            Predicate::During { attr, .. } | Predicate::Between { attr, .. } => {
                let idx = match attr {
                    Some(name) => resolve_attr(ft, name)?,
                    None => ft.default_date().ok_or_else(|| {
                        StrataError::UnsupportedPredicate {
                            reason: format!(
                                "type `{}` has no default date attribute",
                                ft.name()
                            ),
                        }
                    })?,
                };
                out.insert(idx);
            }
            Predicate::Cmp { attr, .. }
            | Predicate::Like { attr, .. } => {
                out.insert(resolve_attr(ft, attr)?);
            }
            Predicate::IsNull(attr) | Predicate::IsNotNull(attr) => {
                out.insert(resolve_attr(ft, attr)?);
            }
            Predicate::In(_) | Predicate::Include | Predicate::Exclude => {}
        }
        Ok(())
    }

    /// Push negations down to the leaves with De Morgan's laws, folding
    /// double negation and rewriting negated comparisons.
    pub fn push_down_not(self) -> Predicate {
        match self {
            Predicate::Not(inner) => match *inner {
                Predicate::Not(p) => p.push_down_not(),
                Predicate::And(preds) => Predicate::Or(
                    preds
                        .into_iter()
                        .map(|p| Predicate::not(p).push_down_not())
                        .collect(),
                ),
                Predicate::Or(preds) => Predicate::And(
                    preds
                        .into_iter()
                        .map(|p| Predicate::not(p).push_down_not())
                        .collect(),
                ),
                Predicate::Cmp { attr, op, value } => Predicate::Cmp {
                    attr,
                    op: op.negated(),
                    value,
                },
                Predicate::IsNull(attr) => Predicate::IsNotNull(attr),
                Predicate::IsNotNull(attr) => Predicate::IsNull(attr),
                Predicate::Include => Predicate::Exclude,
                Predicate::Exclude => Predicate::Include,
                leaf => Predicate::Not(Box::new(leaf)),
            },
            Predicate::And(preds) => {
                Predicate::And(preds.into_iter().map(Predicate::push_down_not).collect())
            }
            Predicate::Or(preds) => {
                Predicate::Or(preds.into_iter().map(Predicate::push_down_not).collect())
            }
            leaf => leaf,
        }
    }
}

fn resolve_attr(ft: &FeatureType, name: &str) -> StrataResult<usize> {
    ft.attribute_index(name)
        .ok_or_else(|| StrataError::UnsupportedPredicate {
            reason: format!("unknown attribute `{name}` in type `{}`", ft.name()),
        })
}

fn feature_geometry<'a>(
    ft: &FeatureType,
    feature: &'a Feature,
    attr: Option<&str>,
) -> StrataResult<Option<&'a Geometry>> {
    let idx = match attr {
        Some(name) => resolve_attr(ft, name)?,
        None => ft.default_geometry(),
    };
    Ok(feature.datums[idx].as_ref().and_then(ScalarImpl::as_geometry))
}

fn feature_timestamp(
    ft: &FeatureType,
    feature: &Feature,
    attr: Option<&str>,
) -> StrataResult<Option<i64>> {
    let idx = match attr {
        Some(name) => resolve_attr(ft, name)?,
        None => match ft.default_date() {
            Some(idx) => idx,
            None => {
                return Err(StrataError::UnsupportedPredicate {
                    reason: format!("type `{}` has no default date attribute", ft.name()),
                })
            }
        },
    };
    Ok(feature.datums[idx].as_ref().and_then(ScalarImpl::as_timestamp))
}

fn cmp_matches(actual: &ScalarImpl, op: CmpOp, expected: &ScalarImpl) -> bool {
    use std::cmp::Ordering;
    match actual.cmp_same_type(expected) {
        None => false,
        Some(ord) => match op {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        },
    }
}

/// SQL LIKE semantics: `%` matches any run, `_` any single character.
fn like_matches(pattern: &str, value: &str) -> StrataResult<bool> {
    let mut regex = String::with_capacity(pattern.len() + 2);
    regex.push('^');
    for c in pattern.chars() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex.push('$');
    let re = regex::Regex::new(&regex).map_err(|e| StrataError::UnsupportedPredicate {
        reason: format!("bad LIKE pattern: {e}"),
    })?;
    Ok(re.is_match(value))
}

/// A LIKE pattern is index-eligible only when its single wildcard is one
/// trailing `%`; everything else is evaluated as a residual.
pub(crate) fn like_prefix(pattern: &str) -> Option<&str> {
    let prefix = pattern.strip_suffix('%')?;
    if prefix.contains('%') || prefix.contains('_') || prefix.is_empty() {
        return None;
    }
    Some(prefix)
}

fn fmt_scalar(value: &ScalarImpl, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        ScalarImpl::Varchar(s) => write!(f, "'{s}'"),
        ScalarImpl::Bool(v) => write!(f, "{v}"),
        ScalarImpl::Int32(v) => write!(f, "{v}"),
        ScalarImpl::Int64(v) => write!(f, "{v}"),
        ScalarImpl::Float32(v) => write!(f, "{v}"),
        ScalarImpl::Float64(v) => write!(f, "{v}"),
        ScalarImpl::Timestamp(v) => write!(f, "{v}ms"),
        ScalarImpl::Uuid(v) => write!(f, "{v}"),
        other => write!(f, "{other:?}"),
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::And(preds) => {
                write!(f, "(")?;
                for (i, p) in preds.iter().enumerate() {
                    if i > 0 {
                        write!(f, " AND ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ")")
            }
            Predicate::Or(preds) => {
                write!(f, "(")?;
                for (i, p) in preds.iter().enumerate() {
                    if i > 0 {
                        write!(f, " OR ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ")")
            }
            Predicate::Not(p) => write!(f, "NOT {p}"),
            Predicate::BBox { attr, min, max } => write!(
                f,
                "BBOX({}, {}, {}, {}, {})",
                attr.as_deref().unwrap_or("geom"),
                min.0,
                min.1,
                max.0,
                max.1
            ),
            Predicate::Intersects { attr, geometry } => {
                write!(
                    f,
                    "INTERSECTS({}, {})",
                    attr.as_deref().unwrap_or("geom"),
                    fmt_envelope(geometry)
                )
            }
            Predicate::Within { attr, geometry } => write!(
                f,
                "WITHIN({}, {})",
                attr.as_deref().unwrap_or("geom"),
                fmt_envelope(geometry)
            ),
            Predicate::Contains { attr, geometry } => write!(
                f,
                "CONTAINS({}, {})",
                attr.as_deref().unwrap_or("geom"),
                fmt_envelope(geometry)
            ),
            Predicate::DWithin {
                attr,
                geometry,
                distance,
            } => write!(
                f,
                "DWITHIN({}, {}, {})",
                attr.as_deref().unwrap_or("geom"),
                fmt_envelope(geometry),
                distance
            ),
            Predicate::During { attr, start, end } => write!(
                f,
                "{} DURING [{start}, {end})",
                attr.as_deref().unwrap_or("dtg")
            ),
            Predicate::Between { attr, start, end } => write!(
                f,
                "{} BETWEEN [{start}, {end}]",
                attr.as_deref().unwrap_or("dtg")
            ),
            Predicate::Cmp { attr, op, value } => {
                write!(f, "{attr} {} ", op.symbol())?;
                fmt_scalar(value, f)
            }
            Predicate::In(ids) => {
                write!(f, "IN (")?;
                let mut sorted: Vec<_> = ids.iter().collect();
                sorted.sort();
                for (i, id) in sorted.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{id}'")?;
                }
                write!(f, ")")
            }
            Predicate::Like { attr, pattern } => write!(f, "{attr} LIKE '{pattern}'"),
            Predicate::IsNull(attr) => write!(f, "{attr} IS NULL"),
            Predicate::IsNotNull(attr) => write!(f, "{attr} IS NOT NULL"),
            Predicate::Include => write!(f, "INCLUDE"),
            Predicate::Exclude => write!(f, "EXCLUDE"),
        }
    }
}

fn fmt_envelope(geometry: &Geometry) -> String {
    match geometry.envelope() {
        Some(env) => format!(
            "[{} {}, {} {}]",
            env.min().x,
            env.min().y,
            env.max().x,
            env.max().y
        ),
        None => "[empty]".to_owned(),
    }
}
