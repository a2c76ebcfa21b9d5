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

//! The scan pipeline: execute a query plan against the backend.
//!
//! Ranges are sliced into tasks, up to `query_threads` of which scan in
//! parallel; each task decodes rows, dedupes, joins, filters and transforms,
//! then feeds a bounded channel. Stream-level stages (sort, aggregation)
//! run in a coordinator between that channel and the consumer. Producers
//! block when the consumer is slow, and every stage observes the cancel
//! token within one batch.

mod aggregate;

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use strata_common::catalog::{FeatureType, VisibilityMode};
use strata_common::config::EngineConfig;
use strata_common::feature::{Feature, Visibility};
use strata_common::util::value_encoding;
use strata_common::{StrataError, StrataResult};
use strata_index::hints::{SamplingOptions, SortOrder};
use strata_index::keys::attr::AttrIndex;
use strata_index::keys::id::IdIndex;
use strata_index::planner::{QueryPlan, ScanOperator, ScanPlan};
use strata_index::{FeatureIndex, IndexSet, ScanRange};
use thiserror_ext::AsReport;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{KvBackend, KvEntry, ScanRequest};

pub use aggregate::DensityGrid;

/// One item of a query's result stream.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Feature(Feature),
    /// Packed 16/24-byte track records.
    BinChunk(Vec<u8>),
    /// The single grid produced by a density aggregation.
    Density(DensityGrid),
}

impl QueryResult {
    pub fn into_feature(self) -> Option<Feature> {
        match self {
            QueryResult::Feature(f) => Some(f),
            _ => None,
        }
    }
}

/// A cancellable stream of query results.
///
/// Dropping the stream cancels the query; backend scanners shut down within
/// one batch.
pub struct QueryStream {
    inner: ReceiverStream<StrataResult<QueryResult>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for QueryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryStream").finish_non_exhaustive()
    }
}

impl QueryStream {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the stream, collecting plain features.
    pub async fn collect_features(mut self) -> StrataResult<Vec<Feature>> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await {
            if let Some(feature) = item?.into_feature() {
                out.push(feature);
            }
        }
        Ok(out)
    }
}

impl Stream for QueryStream {
    type Item = StrataResult<QueryResult>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for QueryStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Shared cross-task dedupe state.
struct DedupeState {
    seen: HashSet<String>,
    budget: usize,
    overflowed: bool,
}

impl DedupeState {
    /// Whether the feature id is fresh. Over budget, dedupe degrades to
    /// pass-through (or errors in strict mode, handled by the caller).
    fn check(&mut self, id: &str) -> Result<bool, ()> {
        if self.overflowed {
            return Ok(true);
        }
        if self.seen.len() >= self.budget && !self.seen.contains(id) {
            self.overflowed = true;
            return Err(());
        }
        Ok(self.seen.insert(id.to_owned()))
    }
}

pub(crate) struct ScanContext {
    pub backend: Arc<dyn KvBackend>,
    pub config: EngineConfig,
    pub ft: Arc<FeatureType>,
    pub indices: Arc<IndexSet>,
    pub plan: QueryPlan,
    pub fail_fast: bool,
}

/// Launch the pipeline and hand back the consumer end.
pub(crate) fn execute(ctx: ScanContext) -> QueryStream {
    let cancel = CancellationToken::new();
    let capacity = ctx.config.scan_batch_rows.max(16);
    let (tx_out, rx_out) = mpsc::channel::<StrataResult<QueryResult>>(capacity);
    let (tx_raw, rx_raw) = mpsc::channel::<StrataResult<Feature>>(capacity);

    let dedupe = ctx.plan.has_duplicates.then(|| {
        Arc::new(Mutex::new(DedupeState {
            seen: HashSet::new(),
            budget: ctx.plan.dedupe_budget,
            overflowed: false,
        }))
    });

    // slice each plan's ranges so the pool stays busy
    let plans: Vec<Arc<ScanPlan>> = ctx.plan.plans.iter().cloned().map(Arc::new).collect();
    let mut tasks: Vec<(Arc<ScanPlan>, Vec<ScanRange>)> = Vec::new();
    let per_plan = (ctx.plan.max_threads * 3).div_ceil(plans.len().max(1)).max(1);
    for plan in &plans {
        for chunk in chunk_ranges(&plan.ranges, per_plan) {
            tasks.push((plan.clone(), chunk));
        }
    }
    debug!(
        tasks = tasks.len(),
        threads = ctx.plan.max_threads,
        "starting scan pipeline"
    );

    let max_threads = ctx.plan.max_threads.max(1);
    let worker_cancel = cancel.clone();
    let worker_ctx = TaskContext {
        backend: ctx.backend.clone(),
        config: ctx.config.clone(),
        ft: ctx.ft.clone(),
        indices: ctx.indices.clone(),
        sampling: ctx.plan.sampling.clone(),
        transform: resolve_transform(&ctx.ft, &ctx.plan),
        dedupe,
        strict: ctx.config.strict,
        fail_fast: ctx.fail_fast,
    };
    tokio::spawn(async move {
        let cancel = worker_cancel;
        futures::stream::iter(tasks)
            .for_each_concurrent(max_threads, |(plan, ranges)| {
                let ctx = worker_ctx.clone();
                let tx = tx_raw.clone();
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return;
                    }
                    if let Err(e) = run_task(&ctx, &plan, ranges, &tx, &cancel).await {
                        if ctx.fail_fast {
                            cancel.cancel();
                        }
                        let _ = tx.send(Err(e)).await;
                    }
                }
            })
            .await;
        // dropping the last sender ends the raw stream
    });

    let coordinator_ctx = CoordinatorContext {
        ft: ctx.ft.clone(),
        config: ctx.config.clone(),
        plan: ctx.plan,
        fail_fast: ctx.fail_fast,
    };
    let coordinator_cancel = cancel.clone();
    tokio::spawn(async move {
        coordinate(coordinator_ctx, rx_raw, tx_out, coordinator_cancel).await;
    });

    QueryStream {
        inner: ReceiverStream::new(rx_out),
        cancel,
    }
}

fn chunk_ranges(ranges: &[ScanRange], chunks: usize) -> Vec<Vec<ScanRange>> {
    if ranges.is_empty() {
        return Vec::new();
    }
    let chunk_size = ranges.len().div_ceil(chunks.max(1));
    ranges
        .chunks(chunk_size.max(1))
        .map(<[ScanRange]>::to_vec)
        .collect()
}

/// Projection resolved to attribute positions.
fn resolve_transform(ft: &FeatureType, plan: &QueryPlan) -> Option<Arc<Vec<usize>>> {
    plan.transform.as_ref().map(|attrs| {
        Arc::new(
            attrs
                .iter()
                .filter_map(|name| ft.attribute_index(name))
                .collect(),
        )
    })
}

#[derive(Clone)]
struct TaskContext {
    backend: Arc<dyn KvBackend>,
    config: EngineConfig,
    ft: Arc<FeatureType>,
    indices: Arc<IndexSet>,
    sampling: Option<SamplingOptions>,
    transform: Option<Arc<Vec<usize>>>,
    dedupe: Option<Arc<Mutex<DedupeState>>>,
    strict: bool,
    fail_fast: bool,
}

/// Scan one slice of one plan's ranges and push decoded features downstream.
async fn run_task(
    ctx: &TaskContext,
    plan: &ScanPlan,
    ranges: Vec<ScanRange>,
    tx: &mpsc::Sender<StrataResult<Feature>>,
    cancel: &CancellationToken,
) -> StrataResult<()> {
    let index = ctx
        .indices
        .get(plan.index)
        .ok_or_else(|| StrataError::UnsupportedPredicate {
            reason: format!("plan names a disabled index `{}`", plan.index),
        })?;
    let residual = plan.iterators.iter().find_map(|op| match op {
        ScanOperator::ResidualFilter { predicate } => Some(predicate.clone()),
        _ => None,
    });
    let join_decoder = plan
        .iterators
        .iter()
        .any(|op| matches!(op, ScanOperator::IndexValueDecoder))
        .then(|| AttrIndex::new(ctx.ft.clone()));
    let id_codec = plan
        .join_fetch_table
        .as_ref()
        .map(|_| IdIndex::new(ctx.ft.clone()));

    let mut stream = ctx.backend.scan(ScanRequest {
        table: plan.table.clone(),
        ranges,
        cf_filter: plan
            .column_families
            .iter()
            .map(|cf| cf.bytes().to_vec())
            .collect(),
        iterators: plan
            .iterators
            .iter()
            .enumerate()
            .map(|(i, op)| (20 + 10 * i as u32, op.clone()))
            .collect(),
    });

    let batch_rows = ctx.config.scan_batch_rows.max(1);
    let mut current_row: Vec<u8> = Vec::new();
    let mut columns: Vec<KvEntry> = Vec::new();
    let mut join_buffer: Vec<Feature> = Vec::new();
    let mut processed = 0usize;

    while let Some(entry) = stream.next().await {
        let entry = entry?;
        processed += 1;
        if processed % batch_rows == 0 && cancel.is_cancelled() {
            return Ok(());
        }
        if entry.row != current_row && !columns.is_empty() {
            let row_columns = std::mem::take(&mut columns);
            handle_row(
                ctx,
                plan,
                index,
                &join_decoder,
                &residual,
                &id_codec,
                row_columns,
                &mut join_buffer,
                tx,
                cancel,
            )
            .await?;
        }
        current_row.clone_from(&entry.row);
        columns.push(entry);
    }
    if !columns.is_empty() {
        handle_row(
            ctx,
            plan,
            index,
            &join_decoder,
            &residual,
            &id_codec,
            columns,
            &mut join_buffer,
            tx,
            cancel,
        )
        .await?;
    }
    flush_join_batch(ctx, plan, &residual, &id_codec, &mut join_buffer, tx, cancel).await?;
    Ok(())
}

/// Decode one row's columns into a feature and run the per-row stages.
#[allow(clippy::too_many_arguments)]
async fn handle_row(
    ctx: &TaskContext,
    plan: &ScanPlan,
    index: &dyn strata_index::FeatureIndex,
    join_decoder: &Option<AttrIndex>,
    residual: &Option<strata_index::Predicate>,
    id_codec: &Option<IdIndex>,
    columns: Vec<KvEntry>,
    join_buffer: &mut Vec<Feature>,
    tx: &mpsc::Sender<StrataResult<Feature>>,
    cancel: &CancellationToken,
) -> StrataResult<()> {
    let id = index.id_from_row(&columns[0].row)?;

    if let Some(dedupe) = &ctx.dedupe {
        match dedupe.lock().check(&id) {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(()) => {
                if ctx.strict {
                    return Err(StrataError::DedupeBudgetExceeded {
                        limit: ctx.config.dedup_budget,
                    });
                }
                warn!(
                    budget = ctx.config.dedup_budget,
                    "dedupe budget exceeded; results may contain duplicates"
                );
            }
        }
    }

    let feature = decode_feature(ctx, join_decoder, id, columns)?;

    if id_codec.is_some() {
        // residual and projection run after the join completes the feature
        join_buffer.push(feature);
        if join_buffer.len() >= ctx.config.scan_batch_rows {
            flush_join_batch(ctx, plan, residual, id_codec, join_buffer, tx, cancel).await?;
        }
        return Ok(());
    }

    emit(ctx, residual, feature, tx, cancel).await
}

fn decode_feature(
    ctx: &TaskContext,
    join_decoder: &Option<AttrIndex>,
    id: String,
    columns: Vec<KvEntry>,
) -> StrataResult<Feature> {
    let ft = &ctx.ft;
    let feature = match ft.visibility_mode() {
        VisibilityMode::Feature => {
            let column = &columns[0];
            let datums = match join_decoder {
                Some(codec) => codec.decode_index_value(&column.value)?,
                None => value_encoding::deserialize(ft, &column.value)?,
            };
            let mut feature = Feature::new(id, datums);
            if let Some(vis) = &column.visibility {
                feature.visibility = Some(Visibility::Expression(vis.clone()));
            }
            feature
        }
        VisibilityMode::Attribute => {
            let mut datums = vec![None; ft.attributes().len()];
            let mut visibilities = vec![None; ft.attributes().len()];
            for column in &columns {
                if column.cq.len() < 2 {
                    return Err(StrataError::serde("attribute column missing its index"));
                }
                let idx = u16::from_be_bytes(
                    column.cq[column.cq.len() - 2..].try_into().unwrap(),
                ) as usize;
                if idx >= datums.len() {
                    return Err(StrataError::serde("attribute column out of range"));
                }
                datums[idx] = value_encoding::deserialize_single(
                    &ft.attribute(idx).data_type,
                    &column.value,
                )?;
                visibilities[idx] = column.visibility.clone();
            }
            let mut feature = Feature::new(id, datums);
            if visibilities.iter().any(Option::is_some) {
                feature.visibility = Some(Visibility::PerAttribute(visibilities));
            }
            feature
        }
    };
    Ok(feature)
}

/// Complete buffered join hits by fetching full features from the id table.
async fn flush_join_batch(
    ctx: &TaskContext,
    plan: &ScanPlan,
    residual: &Option<strata_index::Predicate>,
    id_codec: &Option<IdIndex>,
    join_buffer: &mut Vec<Feature>,
    tx: &mpsc::Sender<StrataResult<Feature>>,
    cancel: &CancellationToken,
) -> StrataResult<()> {
    let (Some(id_codec), Some(table)) = (id_codec, &plan.join_fetch_table) else {
        return Ok(());
    };
    if join_buffer.is_empty() {
        return Ok(());
    }
    let sparse = std::mem::take(join_buffer);
    let ranges: Vec<ScanRange> = sparse
        .iter()
        .map(|f| ScanRange::point(id_codec.row_for_id(&f.id)))
        .collect();
    let mut stream = ctx.backend.scan(ScanRequest {
        table: table.clone(),
        ranges,
        cf_filter: vec![strata_index::ColumnFamily::Data.bytes().to_vec()],
        iterators: Vec::new(),
    });
    while let Some(entry) = stream.next().await {
        let entry = entry?;
        if cancel.is_cancelled() {
            return Ok(());
        }
        let id = id_codec.id_from_row(&entry.row)?;
        let feature = decode_feature(ctx, &None, id, vec![entry])?;
        emit(ctx, residual, feature, tx, cancel).await?;
    }
    Ok(())
}

/// Residual filter, sampling and projection, then push downstream.
async fn emit(
    ctx: &TaskContext,
    residual: &Option<strata_index::Predicate>,
    feature: Feature,
    tx: &mpsc::Sender<StrataResult<Feature>>,
    cancel: &CancellationToken,
) -> StrataResult<()> {
    if let Some(residual) = residual {
        if !residual.matches(&ctx.ft, &feature)? {
            return Ok(());
        }
    }
    if let Some(sampling) = &ctx.sampling {
        if !aggregate::sample_keep(&ctx.ft, sampling, &feature) {
            return Ok(());
        }
    }
    let feature = match &ctx.transform {
        Some(projection) => project(&feature, projection),
        None => feature,
    };
    if tx.send(Ok(feature)).await.is_err() {
        // consumer went away; stop quietly
        cancel.cancel();
    }
    Ok(())
}

fn project(feature: &Feature, projection: &[usize]) -> Feature {
    let mut projected = Feature::new(
        feature.id.clone(),
        projection
            .iter()
            .map(|&idx| feature.datums[idx].clone())
            .collect(),
    );
    projected.visibility = feature.visibility.clone();
    projected
}

struct CoordinatorContext {
    ft: Arc<FeatureType>,
    config: EngineConfig,
    plan: QueryPlan,
    fail_fast: bool,
}

/// Apply stream-level stages between the merged task output and the
/// consumer.
async fn coordinate(
    ctx: CoordinatorContext,
    mut rx: mpsc::Receiver<StrataResult<Feature>>,
    tx: mpsc::Sender<StrataResult<QueryResult>>,
    cancel: CancellationToken,
) {
    let mut density = ctx
        .plan
        .density
        .clone()
        .map(|options| aggregate::DensityAccumulator::new(&ctx.ft, options));
    let mut bin = ctx
        .plan
        .bin
        .as_ref()
        .map(|options| aggregate::BinAccumulator::new(&ctx.ft, options, ctx.config.scan_batch_rows));
    let mut sort_buffer: Option<Vec<Feature>> = ctx.plan.sort.as_ref().map(|_| Vec::new());
    let mut sort_bytes = 0usize;

    while let Some(item) = rx.recv().await {
        if cancel.is_cancelled() {
            let _ = tx.send(Err(StrataError::Cancelled)).await;
            return;
        }
        match item {
            Err(e) => {
                warn!(error = %e.as_report(), "scan task failed");
                let fatal = ctx.fail_fast;
                if tx.send(Err(e)).await.is_err() {
                    return;
                }
                if fatal {
                    cancel.cancel();
                    return;
                }
            }
            Ok(feature) => {
                if let Some(density) = &mut density {
                    density.add(&ctx.ft, &feature);
                } else if let Some(bin) = &mut bin {
                    if let Some(chunk) = bin.add(&ctx.ft, &feature) {
                        if tx.send(Ok(QueryResult::BinChunk(chunk))).await.is_err() {
                            return;
                        }
                    }
                } else if let Some(buffer) = &mut sort_buffer {
                    sort_bytes += feature.estimated_size();
                    if sort_bytes > ctx.config.sort_buffer_bytes {
                        let _ = tx
                            .send(Err(StrataError::SortBudgetExceeded {
                                limit_bytes: ctx.config.sort_buffer_bytes,
                            }))
                            .await;
                        cancel.cancel();
                        return;
                    }
                    buffer.push(feature);
                } else if tx.send(Ok(QueryResult::Feature(feature))).await.is_err() {
                    return;
                }
            }
        }
    }

    if let Some(density) = density {
        let _ = tx.send(Ok(QueryResult::Density(density.finish()))).await;
    } else if let Some(bin) = bin {
        if let Some(chunk) = bin.finish() {
            let _ = tx.send(Ok(QueryResult::BinChunk(chunk))).await;
        }
    } else if let Some(mut buffer) = sort_buffer {
        let sort_keys = resolve_sort(&ctx);
        buffer.sort_by(|a, b| compare_features(a, b, &sort_keys));
        for feature in buffer {
            if tx.send(Ok(QueryResult::Feature(feature))).await.is_err() {
                return;
            }
        }
    }
}

/// Sort attribute positions in the *output* shape (post-projection).
fn resolve_sort(ctx: &CoordinatorContext) -> Vec<(usize, SortOrder)> {
    let Some(sort) = &ctx.plan.sort else {
        return Vec::new();
    };
    sort.iter()
        .filter_map(|(name, order)| {
            let idx = match &ctx.plan.transform {
                Some(attrs) => attrs.iter().position(|a| a == name),
                None => ctx.ft.attribute_index(name),
            };
            idx.map(|idx| (idx, *order))
        })
        .collect()
}

fn compare_features(a: &Feature, b: &Feature, keys: &[(usize, SortOrder)]) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    for (idx, order) in keys {
        let ord = match (&a.datums[*idx], &b.datums[*idx]) {
            (None, None) => Ordering::Equal,
            // nulls sort last
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => x.cmp_same_type(y).unwrap_or(Ordering::Equal),
        };
        let ord = match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.id.cmp(&b.id)
}
