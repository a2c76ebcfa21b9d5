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

//! Query planning: split the predicate on OR, pick a strategy per disjunct,
//! enumerate ranges, and assemble the operator stack for execution.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use strata_common::catalog::{Cardinality, FeatureType, IndexCoverage, IndexKind};
use strata_common::config::EngineConfig;
use strata_common::{StrataError, StrataResult};
use tracing::debug;

use crate::hints::{BinOptions, DensityOptions, QueryHints, SamplingOptions, SortOrder};
use crate::keys::{merge_scan_ranges, ColumnFamily, IndexSet, ScanRange};
use crate::predicate::{extract, to_dnf, Predicate, QueryFacets};
use crate::strategy::{select_strategy, FilterStrategy};

/// Named operators a scan plan stacks on top of the raw backend scan.
///
/// The adapter may claim any of these for server-side execution; the scan
/// pipeline interprets whatever the adapter leaves unclaimed.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOperator {
    /// Keep only rows whose key matches the pattern.
    RowRegex { pattern: String },
    /// Decode join rows' geometry+date payload instead of a full feature.
    IndexValueDecoder,
    /// Evaluate the residual predicate on each decoded feature.
    ResidualFilter { predicate: Predicate },
    /// Project the feature down to the named attributes.
    Projection { attributes: Vec<String> },
    /// Emit packed track records instead of features.
    BinAggregator { options: BinOptions },
    /// Emit one synthetic feature carrying a density grid.
    DensityAggregator { options: DensityOptions },
    /// Deterministic hash sampling.
    Sampling { options: SamplingOptions },
    /// Drop repeated feature ids across ranges.
    Dedupe { budget: usize },
}

impl ScanOperator {
    pub fn name(&self) -> &'static str {
        match self {
            ScanOperator::RowRegex { .. } => "RowRegex",
            ScanOperator::IndexValueDecoder => "IndexValueDecoder",
            ScanOperator::ResidualFilter { .. } => "ResidualFilter",
            ScanOperator::Projection { .. } => "Projection",
            ScanOperator::BinAggregator { .. } => "BinAggregator",
            ScanOperator::DensityAggregator { .. } => "DensityAggregator",
            ScanOperator::Sampling { .. } => "Sampling",
            ScanOperator::Dedupe { .. } => "Dedupe",
        }
    }
}

/// One index scan: a table, its ranges and its operator stack.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub index: IndexKind,
    pub table: String,
    /// Sorted, merged, deduplicated.
    pub ranges: Vec<ScanRange>,
    pub column_families: Vec<ColumnFamily>,
    pub iterators: Vec<ScanOperator>,
    pub strategy: FilterStrategy,
    /// Complete join-row hits by fetching full features from this table.
    pub join_fetch_table: Option<String>,
}

/// The full plan for one query: per-disjunct scans plus stream-level stages.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub plans: Vec<ScanPlan>,
    /// Results may contain the same feature twice and need a dedupe stage.
    pub has_duplicates: bool,
    pub dedupe_budget: usize,
    pub sort: Option<Vec<(String, SortOrder)>>,
    pub sampling: Option<SamplingOptions>,
    pub bin: Option<BinOptions>,
    pub density: Option<DensityOptions>,
    pub transform: Option<Vec<String>>,
    pub max_threads: usize,
}

impl QueryPlan {
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

/// Deterministic rendering of strategy selection, range counts and operator
/// stacks. The explain path never fails for a well-formed predicate; a
/// blocked full scan renders as a blocked explanation.
#[derive(Debug, Clone)]
pub struct Explanation {
    pub filter: String,
    pub blocked: bool,
    pub strategies: Vec<StrategyExplanation>,
    pub has_duplicates: bool,
    pub max_threads: usize,
}

#[derive(Debug, Clone)]
pub struct StrategyExplanation {
    pub index: String,
    pub full_scan: bool,
    pub primary: Option<String>,
    pub secondary: Option<String>,
    pub range_count: usize,
    pub iterators: Vec<String>,
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "filter: {}", self.filter)?;
        if self.blocked {
            writeln!(f, "blocked: full table scan disallowed by configuration")?;
            return Ok(());
        }
        for (i, s) in self.strategies.iter().enumerate() {
            writeln!(
                f,
                "strategy {i}: index={}{}",
                s.index,
                if s.full_scan { " (full scan)" } else { "" }
            )?;
            writeln!(
                f,
                "  primary: {}",
                s.primary.as_deref().unwrap_or("none")
            )?;
            writeln!(
                f,
                "  secondary: {}",
                s.secondary.as_deref().unwrap_or("none")
            )?;
            writeln!(f, "  ranges: {}", s.range_count)?;
            writeln!(f, "  iterators: [{}]", s.iterators.join(", "))?;
        }
        writeln!(f, "deduplicate: {}", self.has_duplicates)?;
        write!(f, "threads: {}", self.max_threads)
    }
}

pub struct QueryPlanner {
    config: EngineConfig,
}

impl QueryPlanner {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Plan a query. `tables` maps each enabled index to its physical table.
    #[allow(clippy::too_many_arguments)]
    pub fn plan(
        &self,
        ft: &Arc<FeatureType>,
        indices: &IndexSet,
        tables: &HashMap<IndexKind, String>,
        predicate: &Predicate,
        hints: &QueryHints,
        stats: &HashMap<usize, Cardinality>,
    ) -> StrataResult<QueryPlan> {
        if hints.bin.is_some() && hints.density.is_some() {
            return Err(StrataError::UnsupportedPredicate {
                reason: "bin and density aggregations are mutually exclusive".to_owned(),
            });
        }
        if (hints.bin.is_some() || hints.density.is_some())
            && (hints.sort.is_some() || hints.transform.is_some())
        {
            return Err(StrataError::UnsupportedPredicate {
                reason: "aggregations cannot be combined with sort or transform".to_owned(),
            });
        }
        if let (Some(sort), Some(transform)) = (&hints.sort, &hints.transform) {
            for (name, _) in sort {
                if !transform.contains(name) {
                    return Err(StrataError::UnsupportedPredicate {
                        reason: format!("sort attribute `{name}` is not in the transform"),
                    });
                }
            }
        }
        self.validate_attrs(ft, hints)?;

        let dnf = to_dnf(predicate, self.config.max_dnf_terms);
        let mut plans: Vec<ScanPlan> = Vec::new();

        for conjuncts in &dnf.disjuncts {
            let facets = if dnf.fallback {
                // over-budget normalisation: scan everything, filter residually
                QueryFacets {
                    conjuncts: conjuncts.clone(),
                    ..Default::default()
                }
            } else {
                extract(ft, stats, conjuncts)?
            };
            if facets.constant_false {
                continue;
            }
            let strategy = if dnf.fallback {
                FilterStrategy {
                    index: IndexKind::Id,
                    full_scan: true,
                    attr_target: None,
                    primary: None,
                    secondary: Some(Predicate::and(conjuncts.clone())),
                }
            } else {
                select_strategy(ft, indices, &self.config, hints, &facets)?
            };

            if strategy.full_scan && self.config.block_full_table_scans {
                return Err(StrataError::FullScanBlocked);
            }

            let index = indices.get(strategy.index).ok_or_else(|| {
                StrataError::UnsupportedPredicate {
                    reason: format!("index `{}` is not enabled", strategy.index),
                }
            })?;
            let target = hints.range_target.or(Some(self.config.range_target));
            let ranges = merge_scan_ranges(index.ranges(&facets, target)?);
            debug!(
                index = %strategy.index,
                ranges = ranges.len(),
                full_scan = strategy.full_scan,
                "planned disjunct"
            );

            plans.push(self.assemble(ft, tables, strategy, ranges, hints)?);
        }

        let has_duplicates = plans.len() > 1
            || plans.iter().any(|p| {
                indices
                    .get(p.index)
                    .map(|i| i.may_duplicate())
                    .unwrap_or(false)
            });
        if has_duplicates {
            for plan in &mut plans {
                plan.iterators.push(ScanOperator::Dedupe {
                    budget: self.config.dedup_budget,
                });
            }
        }

        Ok(QueryPlan {
            plans,
            has_duplicates,
            dedupe_budget: self.config.dedup_budget,
            sort: hints.sort.clone(),
            sampling: hints.sampling.clone(),
            bin: hints.bin.clone(),
            density: hints.density.clone(),
            transform: hints.transform.clone(),
            max_threads: hints.query_threads.unwrap_or(self.config.query_threads).max(1),
        })
    }

    /// Like [`plan`], but renders the outcome instead of executing it, and
    /// never fails on a blocked full scan.
    #[allow(clippy::too_many_arguments)]
    pub fn explain(
        &self,
        ft: &Arc<FeatureType>,
        indices: &IndexSet,
        tables: &HashMap<IndexKind, String>,
        predicate: &Predicate,
        hints: &QueryHints,
        stats: &HashMap<usize, Cardinality>,
    ) -> StrataResult<Explanation> {
        match self.plan(ft, indices, tables, predicate, hints, stats) {
            Ok(plan) => Ok(Explanation {
                filter: predicate.to_string(),
                blocked: false,
                strategies: plan
                    .plans
                    .iter()
                    .map(|p| StrategyExplanation {
                        index: p.index.to_string(),
                        full_scan: p.strategy.full_scan,
                        primary: p.strategy.primary.as_ref().map(|p| p.to_string()),
                        secondary: p.strategy.secondary.as_ref().map(|p| p.to_string()),
                        range_count: p.ranges.len(),
                        iterators: p.iterators.iter().map(|op| op.name().to_owned()).collect(),
                    })
                    .collect(),
                has_duplicates: plan.has_duplicates,
                max_threads: plan.max_threads,
            }),
            Err(StrataError::FullScanBlocked) => Ok(Explanation {
                filter: predicate.to_string(),
                blocked: true,
                strategies: Vec::new(),
                has_duplicates: false,
                max_threads: 0,
            }),
            Err(e) => Err(e),
        }
    }

    fn validate_attrs(&self, ft: &FeatureType, hints: &QueryHints) -> StrataResult<()> {
        let check = |name: &str| {
            ft.attribute_index(name)
                .map(|_| ())
                .ok_or_else(|| StrataError::UnsupportedPredicate {
                    reason: format!("unknown attribute `{name}` in hints"),
                })
        };
        if let Some(transform) = &hints.transform {
            for name in transform {
                check(name)?;
            }
        }
        if let Some(sort) = &hints.sort {
            for (name, _) in sort {
                check(name)?;
            }
        }
        if let Some(bin) = &hints.bin {
            check(&bin.track)?;
            if let Some(label) = &bin.label {
                check(label)?;
            }
        }
        if let Some(density) = &hints.density {
            if let Some(weight) = &density.weight {
                check(weight)?;
            }
        }
        if let Some(sampling) = &hints.sampling {
            if !(0.0..=1.0).contains(&sampling.fraction) {
                return Err(StrataError::UnsupportedPredicate {
                    reason: "sampling fraction must be within [0, 1]".to_owned(),
                });
            }
            if let Some(sample_by) = &sampling.sample_by {
                check(sample_by)?;
            }
        }
        Ok(())
    }

    fn assemble(
        &self,
        ft: &Arc<FeatureType>,
        tables: &HashMap<IndexKind, String>,
        strategy: FilterStrategy,
        ranges: Vec<ScanRange>,
        hints: &QueryHints,
    ) -> StrataResult<ScanPlan> {
        let table = tables
            .get(&strategy.index)
            .cloned()
            .ok_or_else(|| StrataError::UnsupportedPredicate {
                reason: format!("no table registered for index `{}`", strategy.index),
            })?;

        // join rows carry only (geometry, date); anything else forces a
        // follow-up fetch from the id table
        let join_target = strategy
            .attr_target
            .filter(|_| strategy.index == IndexKind::Attribute)
            .filter(|&target| ft.attribute(target).coverage == IndexCoverage::Join);
        let mut column_families = vec![ColumnFamily::Data];
        let mut iterators = Vec::new();
        let mut join_fetch_table = None;

        if join_target.is_some() {
            column_families = vec![ColumnFamily::IndexValue];
            iterators.push(ScanOperator::IndexValueDecoder);
            if self.needs_full_features(ft, &strategy, hints)? {
                join_fetch_table = Some(tables.get(&IndexKind::Id).cloned().ok_or_else(|| {
                    StrataError::UnsupportedPredicate {
                        reason: "join completion requires the id index".to_owned(),
                    }
                })?);
            }
        }

        if let Some(secondary) = &strategy.secondary {
            iterators.push(ScanOperator::ResidualFilter {
                predicate: secondary.clone(),
            });
        }
        if let Some(transform) = &hints.transform {
            iterators.push(ScanOperator::Projection {
                attributes: transform.clone(),
            });
        }
        if let Some(density) = &hints.density {
            iterators.push(ScanOperator::DensityAggregator {
                options: density.clone(),
            });
        }
        if let Some(bin) = &hints.bin {
            iterators.push(ScanOperator::BinAggregator { options: bin.clone() });
        }
        if let Some(sampling) = &hints.sampling {
            iterators.push(ScanOperator::Sampling {
                options: sampling.clone(),
            });
        }

        Ok(ScanPlan {
            index: strategy.index,
            table,
            ranges,
            column_families,
            iterators,
            strategy,
            join_fetch_table,
        })
    }

    /// Whether a join-row scan must complete each hit with the full feature.
    fn needs_full_features(
        &self,
        ft: &Arc<FeatureType>,
        strategy: &FilterStrategy,
        hints: &QueryHints,
    ) -> StrataResult<bool> {
        let mut available = std::collections::HashSet::new();
        available.insert(ft.default_geometry());
        if let Some(date_idx) = ft.default_date() {
            available.insert(date_idx);
        }

        if let Some(secondary) = &strategy.secondary {
            if !secondary
                .referenced_attributes(ft)?
                .is_subset(&available)
            {
                return Ok(true);
            }
        }
        match &hints.transform {
            None => Ok(true),
            Some(attrs) => {
                for name in attrs {
                    match ft.attribute_index(name) {
                        Some(idx) if available.contains(&idx) => {}
                        _ => return Ok(true),
                    }
                }
                Ok(false)
            }
        }
    }
}
