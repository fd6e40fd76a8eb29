//! Fan-out query executor
//!
//! Spawns one tokio task per region group. All tasks share a cancellation
//! token that is a child of the caller's; the first task error cancels it
//! and becomes the batch error. Results flow through a bounded mpsc channel
//! that is drained only after every task has finished.
//!
//! A panic inside a region task is caught at the task boundary and turned
//! into a fault result on the same channel. It never reaches siblings or
//! the coordinator, and it does not fail the batch.

use crate::backend::MetricsBackend;
use crate::error::{BoxError, CallError, QueryError, Result};
use crate::model::{ExecutionContext, MetricQuery, QueryDataResponse, TaggedResult};
use crate::partition::{partition, PartitionedBatch};
use crate::stats::{ExecutorStats, StatsSnapshot};
use fanq_core::{ExecutionConfig, QueryId, Region, TimeRange};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Lifecycle of a region task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Dispatched,
    ClientResolved,
    Translated,
    RequestBuilt,
    CallExecuted,
    ResponseParsed,
    ResultsEmitted,
    Completed,
    /// Panicked; converted into a fault result
    Faulted,
    /// Returned an ordinary error
    Aborted,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Faulted | TaskState::Aborted)
    }
}

/// How a region task ended, when it did not fail the batch
#[derive(Debug)]
enum TaskOutcome {
    Completed,
    Faulted,
}

/// Everything one region task owns
struct RegionTask<B: MetricsBackend> {
    backend: Arc<B>,
    ctx: Arc<ExecutionContext>,
    region: Region,
    queries: Vec<MetricQuery>,
    time_range: TimeRange,
    cancel: CancellationToken,
    results: mpsc::Sender<TaggedResult>,
    state: TaskState,
}

impl<B: MetricsBackend> RegionTask<B> {
    fn advance(&mut self, next: TaskState) {
        trace!(region = %self.region, from = ?self.state, to = ?next, "Region task transition");
        self.state = next;
    }

    /// Drive the region through every backend stage and emit its results.
    /// Returns the number of tagged results emitted.
    async fn run(&mut self) -> Result<usize> {
        self.advance(TaskState::Dispatched);

        // A sibling may already have failed
        if self.cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }

        let client = self
            .backend
            .resolve_client(&self.region, &self.ctx)
            .map_err(|source| QueryError::ClientResolution {
                region: self.region.clone(),
                source,
            })?;
        self.advance(TaskState::ClientResolved);

        let native = self
            .backend
            .translate(&self.queries)
            .map_err(|source| QueryError::Translation {
                region: self.region.clone(),
                source,
            })?;
        self.advance(TaskState::Translated);

        let request = self
            .backend
            .build_request(&self.time_range, &native)
            .map_err(|source| QueryError::Build {
                region: self.region.clone(),
                source,
            })?;
        self.advance(TaskState::RequestBuilt);

        // Stop waiting as soon as the group is cancelled, even if the
        // backend does not watch the token itself
        let call = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CallError::Cancelled),
            res = self.backend.execute(&self.cancel, &client, request) => res,
        };
        let response = match call {
            Ok(response) => response,
            Err(CallError::Cancelled) => return Err(QueryError::Cancelled),
            Err(source) => {
                return Err(QueryError::Call {
                    region: self.region.clone(),
                    source,
                })
            }
        };
        self.advance(TaskState::CallExecuted);

        let result_sets = self
            .backend
            .parse(response, &native)
            .map_err(|source| QueryError::Parse {
                region: self.region.clone(),
                source,
            })?;
        self.advance(TaskState::ResponseParsed);

        let shaped = self
            .backend
            .shape(result_sets, &self.queries, &self.time_range)
            .map_err(|source| QueryError::Shape {
                region: self.region.clone(),
                source,
            })?;

        // Every entry must belong to this region's group; a stray key would
        // overwrite another region's entry or add one nobody asked for
        let expected: HashSet<&QueryId> = self.queries.iter().map(|q| &q.id).collect();
        if let Some(stray) = shaped.keys().find(|id| !expected.contains(id)) {
            return Err(QueryError::Shape {
                region: self.region.clone(),
                source: format!("result for query {:?} which is not in this region's group", stray.as_str()).into(),
            });
        }

        let emitted = shaped.len();
        for (id, response) in shaped {
            // The receiver outlives every task; a closed channel means the
            // batch is being torn down
            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(QueryError::Cancelled),
                sent = self.results.send(TaggedResult::new(id, response)) => sent,
            };
            if sent.is_err() {
                return Err(QueryError::Cancelled);
            }
        }
        self.advance(TaskState::ResultsEmitted);

        Ok(emitted)
    }
}

/// Run a region task inside its fault-isolation boundary.
async fn run_isolated<B: MetricsBackend>(
    mut task: RegionTask<B>,
    stats: Arc<ExecutorStats>,
) -> Result<TaskOutcome> {
    let started = Instant::now();
    let outcome = AssertUnwindSafe(task.run()).catch_unwind().await;

    match outcome {
        Ok(Ok(emitted)) => {
            task.advance(TaskState::Completed);
            stats.record_completed(emitted as u64);
            debug!(
                region = %task.region,
                results = emitted,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Region task completed"
            );
            Ok(TaskOutcome::Completed)
        }
        Ok(Err(e)) => {
            let stage = task.state;
            task.advance(TaskState::Aborted);
            stats.record_aborted();
            debug!(region = %task.region, stage = ?stage, error = %e, "Region task aborted");
            Err(e)
        }
        Err(payload) => {
            let stage = task.state;
            task.advance(TaskState::Faulted);
            stats.record_faulted();
            error!(
                region = %task.region,
                stage = ?stage,
                panic = %panic_message(payload.as_ref()),
                "Region task panicked"
            );

            match recover_fault(&task.region, payload) {
                Some(fault) => {
                    if task.results.send(TaggedResult::fault(fault.to_string())).await.is_ok() {
                        stats.record_fault_result();
                    }
                }
                None => {
                    warn!(region = %task.region, "Panic payload is not an error; region result dropped");
                }
            }
            Ok(TaskOutcome::Faulted)
        }
    }
}

/// Convert a panic payload into a [`QueryError::RecoveredFault`].
///
/// Only payloads that carry an error or a message are representable; any
/// other payload type yields `None` and the region's output is lost.
pub fn recover_fault(region: &Region, payload: Box<dyn Any + Send>) -> Option<QueryError> {
    let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(e) = payload.downcast_ref::<QueryError>() {
        e.to_string()
    } else if let Some(e) = payload.downcast_ref::<BoxError>() {
        e.to_string()
    } else {
        return None;
    };

    Some(QueryError::RecoveredFault {
        region: region.clone(),
        message,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(e) = payload.downcast_ref::<QueryError>() {
        e.to_string()
    } else if let Some(e) = payload.downcast_ref::<BoxError>() {
        e.to_string()
    } else {
        "<non-error panic payload>".to_string()
    }
}

/// Fan-out executor for running metric query batches against a backend
pub struct FanOutExecutor<B: MetricsBackend> {
    /// Remote metrics backend
    backend: Arc<B>,
    /// Executor settings
    config: ExecutionConfig,
    /// Cumulative counters
    stats: Arc<ExecutorStats>,
}

impl<B: MetricsBackend> FanOutExecutor<B> {
    /// Create a new executor with default settings
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_config(backend, ExecutionConfig::default())
    }

    /// Create a new executor
    pub fn with_config(backend: Arc<B>, config: ExecutionConfig) -> Self {
        Self {
            backend,
            config,
            stats: Arc::new(ExecutorStats::new()),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Snapshot of the cumulative counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Validate, partition and execute a batch.
    ///
    /// Returns one entry per query id, or the first region error. A failed
    /// batch never yields a partial response.
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        queries: Vec<MetricQuery>,
        cancel: CancellationToken,
    ) -> Result<QueryDataResponse> {
        debug!(queries = queries.len(), datasource = %ctx.datasource_uid, "Executing metric query batch");

        let batch = match partition(queries, ctx.default_region.as_ref()) {
            Ok(batch) => batch,
            Err(e) => {
                self.stats.record_batch(false);
                return Err(e);
            }
        };

        self.execute_groups(ctx, batch, cancel).await
    }

    /// Execute an already partitioned batch.
    ///
    /// An empty batch returns an empty response without spawning tasks.
    pub async fn execute_groups(
        &self,
        ctx: &ExecutionContext,
        batch: PartitionedBatch,
        cancel: CancellationToken,
    ) -> Result<QueryDataResponse> {
        if batch.is_empty() {
            self.stats.record_batch(true);
            return Ok(QueryDataResponse::new());
        }

        let started = Instant::now();
        let regions = batch.region_count();
        let group = cancel.child_token();

        let outcome = self.fan_out(ctx, batch, group).await;

        self.stats.record_batch(outcome.is_ok());
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(response) => debug!(regions, entries = response.len(), elapsed_ms, "Batch completed"),
            Err(e) => warn!(regions, error = %e, elapsed_ms, "Batch failed"),
        }

        outcome
    }

    async fn fan_out(
        &self,
        ctx: &ExecutionContext,
        batch: PartitionedBatch,
        group: CancellationToken,
    ) -> Result<QueryDataResponse> {
        // One slot per query, one fault slot per region, one for the
        // request-failure summary: producers never block
        let capacity = batch.query_count() + batch.region_count() + 1;
        let (tx, mut rx) = mpsc::channel(capacity);

        let PartitionedBatch { time_range, groups } = batch;
        let ctx = Arc::new(ctx.clone());
        let mut tasks = JoinSet::new();

        for (region, queries) in groups {
            trace!(region = %region, queries = queries.len(), "Dispatching region task");
            let task = RegionTask {
                backend: Arc::clone(&self.backend),
                ctx: Arc::clone(&ctx),
                region,
                queries,
                time_range,
                cancel: group.clone(),
                results: tx.clone(),
                state: TaskState::Created,
            };
            self.stats.record_spawn();
            tasks.spawn(run_isolated(task, Arc::clone(&self.stats)));
        }

        let deadline = self
            .config
            .query_timeout()
            .map(|limit| (tokio::time::Instant::now() + limit, limit));

        // Wait for every task, even after the first failure
        let mut first_error: Option<QueryError> = None;
        loop {
            let joined = match deadline {
                Some((at, limit)) => {
                    let next = tokio::select! {
                        joined = tasks.join_next() => Some(joined),
                        _ = tokio::time::sleep_until(at) => None,
                    };
                    match next {
                        Some(joined) => joined,
                        None => {
                            group.cancel();
                            self.abort_remaining(&mut tasks, &tx).await;
                            return Err(QueryError::Timeout(limit.as_secs()));
                        }
                    }
                }
                None => tasks.join_next().await,
            };
            let joined = match joined {
                Some(joined) => joined,
                None => break,
            };

            match joined {
                Ok(Ok(TaskOutcome::Completed | TaskOutcome::Faulted)) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        group.cancel();
                        first_error = Some(e);
                    } else {
                        trace!(error = %e, "Ignoring error from cancelled sibling");
                    }
                }
                Err(join_err) => self.handle_join_error(join_err, &tx),
            }
        }

        if let Some(err) = first_error {
            if err.is_request_failure() && self.config.emit_request_failure_fault {
                let summary = TaggedResult::fault(format!("metric request error: {:?}", err.to_string()));
                if tx.try_send(summary).is_ok() {
                    self.stats.record_fault_result();
                    warn!(region = ?err.region(), error = %err, "Emitted request failure fault");
                }
            }

            // The caller gets the error, not the results already collected
            drop(tx);
            rx.close();
            let mut discarded = 0usize;
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
            debug!(discarded, "Discarded results of failed batch");

            return Err(err);
        }

        // Every producer has finished; closing our sender ends the stream
        drop(tx);

        let mut response = QueryDataResponse::new();
        while let Some(result) = rx.recv().await {
            if result.is_fault() {
                self.stats.record_dropped_fault();
                if self.config.log_dropped_faults {
                    warn!(
                        error = result.response.error.as_deref().unwrap_or_default(),
                        "Fault result has no query id; not included in response"
                    );
                }
                continue;
            }
            response.responses.insert(result.id, result.response);
        }

        Ok(response)
    }

    /// Abort every task still in the set once the batch deadline has
    /// passed. Tasks that finish on their own record their own outcome;
    /// tasks cut short here are counted as aborted.
    async fn abort_remaining(&self, tasks: &mut JoinSet<Result<TaskOutcome>>, tx: &mpsc::Sender<TaggedResult>) {
        tasks.abort_all();
        let mut cut_short = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(_) => {}
                Err(join_err) if join_err.is_cancelled() => {
                    self.stats.record_aborted();
                    cut_short += 1;
                }
                Err(join_err) => self.handle_join_error(join_err, tx),
            }
        }
        debug!(cut_short, "Aborted region tasks at batch deadline");
    }

    /// A task that escaped its own boundary: treat it like a caught panic.
    fn handle_join_error(&self, join_err: JoinError, tx: &mpsc::Sender<TaggedResult>) {
        self.stats.record_faulted();

        if !join_err.is_panic() {
            error!(error = %join_err, "Region task was cancelled unexpectedly");
            return;
        }

        let region = Region::new("unknown");
        let payload = join_err.into_panic();
        error!(panic = %panic_message(payload.as_ref()), "Region task panicked outside its boundary");

        if let Some(fault) = recover_fault(&region, payload) {
            if tx.try_send(TaggedResult::fault(fault.to_string())).is_ok() {
                self.stats.record_fault_result();
            }
        }
    }
}
