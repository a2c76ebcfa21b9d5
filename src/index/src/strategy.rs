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

//! Strategy selection: which index serves a disjunct, and how the predicate
//! splits into the part the index consumes and the residual.

use strata_common::catalog::{Cardinality, FeatureType, IndexKind};
use strata_common::config::EngineConfig;
use strata_common::{StrataError, StrataResult};

use crate::hints::QueryHints;
use crate::keys::IndexSet;
use crate::predicate::{classify_leaf, LeafKind, Predicate, QueryFacets};

/// The outcome of strategy selection for one disjunct.
#[derive(Debug, Clone)]
pub struct FilterStrategy {
    pub index: IndexKind,
    /// The index could not narrow the scan; the whole table is read.
    pub full_scan: bool,
    /// The attribute the attribute index pivots on.
    pub attr_target: Option<usize>,
    /// The predicate subset driving range enumeration.
    pub primary: Option<Predicate>,
    /// The residual evaluated client-side on every decoded feature.
    pub secondary: Option<Predicate>,
}

/// Pick the index for one disjunct's facets, honouring hints and
/// cardinality per the priority rules.
pub fn select_strategy(
    ft: &FeatureType,
    indices: &IndexSet,
    config: &EngineConfig,
    hints: &QueryHints,
    facets: &QueryFacets,
) -> StrataResult<FilterStrategy> {
    let enabled = |kind: IndexKind| indices.get(kind).is_some();
    let supported = |kind: IndexKind| {
        indices
            .get(kind)
            .map(|index| index.supports(facets))
            .unwrap_or(false)
    };

    // an explicit hint is mandatory
    if let Some(kind) = hints.index_hint {
        if !enabled(kind) {
            return Err(StrataError::UnsupportedPredicate {
                reason: format!("hinted index `{kind}` is not enabled for type `{}`", ft.name()),
            });
        }
        if supported(kind) {
            return Ok(build_strategy(ft, facets, kind, false, hints)?);
        }
        if kind == IndexKind::Id {
            // id scans degrade gracefully to a full table scan
            return Ok(build_strategy(ft, facets, IndexKind::Id, true, hints)?);
        }
        return Err(StrataError::UnsupportedPredicate {
            reason: format!(
                "hinted index `{kind}` cannot serve this predicate (missing required facets)"
            ),
        });
    }

    let point = ft.is_point_geometry();
    let temporal_kind = if point { IndexKind::Z3 } else { IndexKind::Xz3 };
    let spatial_kind = if point { IndexKind::Z2 } else { IndexKind::Xz2 };

    let small_id_set = facets
        .ids
        .as_ref()
        .map(|ids| ids.len() <= config.id_join_threshold)
        .unwrap_or(false);

    let chosen: Option<(IndexKind, bool)> = if small_id_set && enabled(IndexKind::Id) {
        Some((IndexKind::Id, false))
    } else if supported(IndexKind::Attribute)
        && facets.attr_equality(Cardinality::High).is_some()
    {
        Some((IndexKind::Attribute, false))
    } else if supported(IndexKind::Attribute)
        && facets.attr_equality(Cardinality::Normal).is_some()
    {
        Some((IndexKind::Attribute, false))
    } else if facets.has_temporal() && supported(temporal_kind) {
        Some((temporal_kind, false))
    } else if facets.has_spatial() && supported(spatial_kind) {
        Some((spatial_kind, false))
    } else if facets.has_spatial() && supported(temporal_kind) {
        // a type indexed only temporally still accelerates spatial queries
        Some((temporal_kind, false))
    } else if supported(IndexKind::Attribute) {
        Some((IndexKind::Attribute, false))
    } else if facets.has_ids() && enabled(IndexKind::Id) {
        Some((IndexKind::Id, false))
    } else {
        None
    };

    match chosen {
        Some((kind, full_scan)) => build_strategy(ft, facets, kind, full_scan, hints),
        None => {
            // nothing narrows the scan; fall back to walking the id table
            build_strategy(ft, facets, IndexKind::Id, true, hints)
        }
    }
}

fn build_strategy(
    ft: &FeatureType,
    facets: &QueryFacets,
    kind: IndexKind,
    full_scan: bool,
    hints: &QueryHints,
) -> StrataResult<FilterStrategy> {
    let attr_target = if kind == IndexKind::Attribute {
        facets.best_attr_target()
    } else {
        None
    };

    let mut primary = Vec::new();
    let mut secondary = Vec::new();
    for leaf in &facets.conjuncts {
        let class = classify_leaf(ft, leaf)?;
        if matches!(class, LeafKind::True) {
            continue;
        }
        if !full_scan && drives_ranges(&class, kind, attr_target) {
            primary.push(leaf.clone());
        }
        if !fully_covered(&class, kind, attr_target, full_scan, hints.loose_bbox) {
            secondary.push(leaf.clone());
        }
    }

    Ok(FilterStrategy {
        index: kind,
        full_scan,
        attr_target,
        primary: (!primary.is_empty()).then(|| Predicate::and(primary)),
        secondary: (!secondary.is_empty()).then(|| Predicate::and(secondary)),
    })
}

/// Whether a leaf feeds the chosen index's range enumeration.
fn drives_ranges(class: &LeafKind, kind: IndexKind, attr_target: Option<usize>) -> bool {
    match kind {
        IndexKind::Id => matches!(class, LeafKind::Ids(_)),
        IndexKind::Attribute => matches!(
            class,
            LeafKind::Attr { attr_index, .. } if Some(*attr_index) == attr_target
        ),
        IndexKind::Z2 | IndexKind::Xz2 => matches!(
            class,
            LeafKind::SpatialBBox(_) | LeafKind::SpatialOther(_)
        ),
        IndexKind::Z3 | IndexKind::Xz3 => matches!(
            class,
            LeafKind::SpatialBBox(_) | LeafKind::SpatialOther(_) | LeafKind::Temporal(_, _)
        ),
    }
}

/// Whether the chosen index's ranges reproduce the leaf exactly, letting it
/// drop out of the residual.
fn fully_covered(
    class: &LeafKind,
    kind: IndexKind,
    attr_target: Option<usize>,
    full_scan: bool,
    loose_bbox: bool,
) -> bool {
    if full_scan {
        return false;
    }
    match (kind, class) {
        (IndexKind::Id, LeafKind::Ids(_)) => true,
        (
            IndexKind::Attribute,
            LeafKind::Attr {
                attr_index, exact, ..
            },
        ) => *exact && Some(*attr_index) == attr_target,
        // a bbox is envelope-exact; in loose mode the curve's coverage is
        // accepted as the answer, coarseness and all
        (
            IndexKind::Z2 | IndexKind::Z3 | IndexKind::Xz2 | IndexKind::Xz3,
            LeafKind::SpatialBBox(_),
        ) => loose_bbox,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use strata_common::catalog::{AttributeDescriptor, IndexCoverage};
    use strata_common::types::{DataType, ScalarImpl};

    use super::*;
    use crate::predicate::extract;

    fn test_type(name_cardinality: Cardinality, status_cardinality: Cardinality) -> Arc<FeatureType> {
        Arc::new(
            FeatureType::builder("t")
                .attribute(
                    AttributeDescriptor::new("name", DataType::Varchar)
                        .indexed(IndexCoverage::Full)
                        .with_cardinality(name_cardinality),
                )
                .attribute(
                    AttributeDescriptor::new("status", DataType::Varchar)
                        .indexed(IndexCoverage::Full)
                        .with_cardinality(status_cardinality),
                )
                .attribute(AttributeDescriptor::new("dtg", DataType::Timestamp))
                .attribute(AttributeDescriptor::new("geom", DataType::Point))
                .build()
                .unwrap(),
        )
    }

    fn select(
        ft: &Arc<FeatureType>,
        conjuncts: &[Predicate],
        hints: &QueryHints,
    ) -> FilterStrategy {
        let indices = IndexSet::for_type(ft.clone()).unwrap();
        let facets = extract(ft, &HashMap::new(), conjuncts).unwrap();
        select_strategy(ft, &indices, &EngineConfig::default(), hints, &facets).unwrap()
    }

    #[test]
    fn test_id_set_overrides_bbox() {
        let ft = test_type(Cardinality::Normal, Cardinality::Normal);
        let strategy = select(
            &ft,
            &[
                Predicate::bbox((-120.0, -60.0), (120.0, 60.0)),
                Predicate::ids(["id-01"]),
            ],
            &QueryHints::default(),
        );
        assert_eq!(strategy.index, IndexKind::Id);
        assert!(!strategy.full_scan);
    }

    #[test]
    fn test_high_cardinality_attr_overrides_bbox() {
        let ft = test_type(Cardinality::High, Cardinality::Normal);
        let strategy = select(
            &ft,
            &[
                Predicate::eq("name", ScalarImpl::Varchar("alice".into())),
                Predicate::bbox((-10.0, -10.0), (10.0, 10.0)),
            ],
            &QueryHints::default(),
        );
        assert_eq!(strategy.index, IndexKind::Attribute);
        // the bbox survives as the residual
        let secondary = strategy.secondary.unwrap().to_string();
        assert!(secondary.contains("BBOX"), "{secondary}");
    }

    #[test]
    fn test_low_cardinality_attr_loses_to_spatial() {
        let ft = test_type(Cardinality::Normal, Cardinality::Low);
        let strategy = select(
            &ft,
            &[
                Predicate::eq("status", ScalarImpl::Varchar("ok".into())),
                Predicate::bbox((-10.0, -10.0), (10.0, 10.0)),
            ],
            &QueryHints::default(),
        );
        assert_eq!(strategy.index, IndexKind::Z2);
        let secondary = strategy.secondary.unwrap().to_string();
        assert!(secondary.contains("status"), "{secondary}");
    }

    #[test]
    fn test_spatial_with_time_prefers_z3() {
        let ft = test_type(Cardinality::Normal, Cardinality::Normal);
        let strategy = select(
            &ft,
            &[
                Predicate::bbox((-10.0, -10.0), (10.0, 10.0)),
                Predicate::between(0, 1_000_000),
            ],
            &QueryHints::default(),
        );
        assert_eq!(strategy.index, IndexKind::Z3);
        // temporal quantization keeps the time predicate in the residual
        assert!(strategy.secondary.is_some());
    }

    #[test]
    fn test_loose_bbox_drops_spatial_residual() {
        let ft = test_type(Cardinality::Normal, Cardinality::Normal);
        let loose = select(
            &ft,
            &[Predicate::bbox((-10.0, -10.0), (10.0, 10.0))],
            &QueryHints::default(),
        );
        assert_eq!(loose.index, IndexKind::Z2);
        assert!(loose.secondary.is_none());

        let exact = select(
            &ft,
            &[Predicate::bbox((-10.0, -10.0), (10.0, 10.0))],
            &QueryHints {
                loose_bbox: false,
                ..Default::default()
            },
        );
        assert!(exact.secondary.is_some());
    }

    #[test]
    fn test_no_facets_falls_back_to_full_scan() {
        let ft = test_type(Cardinality::Normal, Cardinality::Normal);
        let strategy = select(
            &ft,
            &[Predicate::IsNull("name".into())],
            &QueryHints::default(),
        );
        assert_eq!(strategy.index, IndexKind::Id);
        assert!(strategy.full_scan);
        assert!(strategy.secondary.is_some());
    }

    #[test]
    fn test_mandatory_hint() {
        let ft = test_type(Cardinality::High, Cardinality::Normal);
        let strategy = select(
            &ft,
            &[
                Predicate::eq("name", ScalarImpl::Varchar("alice".into())),
                Predicate::bbox((-10.0, -10.0), (10.0, 10.0)),
            ],
            &QueryHints {
                index_hint: Some(IndexKind::Z2),
                ..Default::default()
            },
        );
        assert_eq!(strategy.index, IndexKind::Z2);
    }
}
