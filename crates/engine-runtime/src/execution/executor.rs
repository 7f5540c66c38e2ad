use crate::{
    catalog::{self, Catalog},
    error::SyncError,
    execution::{context::SyncContext, factory},
    streams::{
        planner::plan_partitions,
        transform::{RecordTransformer, TransformOptions},
    },
};
use chrono::Utc;
use connectors::error::ApiError;
use engine_config::settings::TapConfig;
use engine_core::{
    connectors::{fetcher::Fetcher, source::Partition},
    error::{SinkError, SourceError},
    metrics::Metrics,
    sink::MessageSink,
    state::TapState,
};
use model::{
    core::{stream::StreamId, utils::fingerprint},
    pagination::cursor::Cursor,
};
use serde_json::Value;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How a run that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every enabled stream was synced and the run was finalized.
    Completed,
    /// `max_run_time` elapsed; progress is checkpointed for the next run.
    StoppedEarly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Deadline,
    Cancelled,
}

enum StreamStatus {
    Completed,
    Stopped(StopReason),
}

pub async fn run(
    config: TapConfig,
    state: TapState,
    sink: Box<dyn MessageSink>,
    cancel: CancellationToken,
) -> Result<SyncOutcome, SyncError> {
    run_with_catalog(config, state, None, sink, cancel).await
}

/// Runs a sync restricted to, and using the schemas of, `catalog`.
pub async fn run_with_catalog(
    mut config: TapConfig,
    state: TapState,
    catalog: Option<Catalog>,
    sink: Box<dyn MessageSink>,
    cancel: CancellationToken,
) -> Result<SyncOutcome, SyncError> {
    if let Some(catalog) = &catalog {
        config.restrict_streams(catalog.selected_streams()?)?;
    }

    let metrics = Metrics::new();
    let fetcher = factory::create_fetcher(&config, metrics.clone())?;
    let ctx = SyncContext::new(state, sink, metrics, config.state_flush_interval);

    SyncExecutor::new(config, catalog, fetcher, cancel)
        .execute(ctx)
        .await
}

/// Builds the catalog for `--discover`.
pub async fn discover(config: &TapConfig) -> Result<Catalog, SyncError> {
    let fetcher = factory::create_fetcher(config, Metrics::new())?;
    catalog::discover(config, &fetcher).await
}

struct SyncExecutor {
    config: TapConfig,
    catalog: Option<Catalog>,
    fetcher: Fetcher,
    transformer: RecordTransformer,
    cancel: CancellationToken,
    started: Instant,
}

impl SyncExecutor {
    fn new(
        config: TapConfig,
        catalog: Option<Catalog>,
        fetcher: Fetcher,
        cancel: CancellationToken,
    ) -> Self {
        let transformer = RecordTransformer::new(TransformOptions::from(&config), fetcher.clone());
        SyncExecutor {
            config,
            catalog,
            fetcher,
            transformer,
            cancel,
            started: Instant::now(),
        }
    }

    async fn execute(mut self, mut ctx: SyncContext) -> Result<SyncOutcome, SyncError> {
        let (run_started, resumed) = ctx.state_mut().begin_run(Utc::now());
        if resumed {
            info!("Resuming interrupted run started at {run_started}");
        } else {
            info!("Starting run at {run_started}");
        }
        ctx.flush_state()?;

        let streams = self.config.enabled_streams();
        let total = streams.len();
        let mut failed: Vec<StreamId> = Vec::new();

        for (idx, stream) in streams.into_iter().enumerate() {
            if let Some(reason) = self.stop_reason() {
                return self.stop(&mut ctx, reason);
            }

            if resumed && ctx.state().is_stream_done(stream) {
                info!("Stream {stream} already completed in this run, skipping");
                continue;
            }

            if let Some(parent) = stream.parent()
                && failed.contains(&parent)
            {
                warn!("Skipping {stream} because its parent stream {parent} failed");
                continue;
            }

            info!("Syncing stream {}/{}: {stream}", idx + 1, total);
            let before = ctx.metrics().snapshot();

            let result = self.sync_stream(&mut ctx, stream).await;
            let delta = ctx.metrics().snapshot().since(&before);
            info!(
                stream = %stream,
                records = delta.records_emitted,
                pages = delta.pages_fetched,
                requests = delta.http_requests,
                retries = delta.retry_count,
                "Stream finished"
            );

            match result {
                Ok(StreamStatus::Completed) => {}
                Ok(StreamStatus::Stopped(reason)) => return self.stop(&mut ctx, reason),
                Err(StreamFailure::Sink(err)) => return Err(err.into()),
                Err(StreamFailure::Source(err)) if err.aborts_run() => {
                    error!("Aborting run, {stream} failed: {err}");
                    ctx.flush_state()?;
                    return Err(SyncError::Stream {
                        stream,
                        source: err,
                    });
                }
                Err(StreamFailure::Source(err)) => {
                    error!("Stream {stream} failed: {err}");
                    failed.push(stream);
                    ctx.flush_state()?;
                }
            }
        }

        let totals = ctx.metrics().snapshot();
        info!(
            records = totals.records_emitted,
            pages = totals.pages_fetched,
            requests = totals.http_requests,
            retries = totals.retry_count,
            state_flushes = totals.state_flushes,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Run finished"
        );

        if !failed.is_empty() {
            ctx.state_mut().set_currently_syncing(None);
            ctx.flush_state()?;
            return Err(SyncError::StreamsFailed(failed));
        }

        ctx.state_mut().finalize_run();
        ctx.flush_state()?;
        Ok(SyncOutcome::Completed)
    }

    fn stop_reason(&self) -> Option<StopReason> {
        if self.cancel.is_cancelled() {
            return Some(StopReason::Cancelled);
        }
        match self.config.max_run_time {
            Some(limit) if self.started.elapsed() >= limit => Some(StopReason::Deadline),
            _ => None,
        }
    }

    fn stop(&self, ctx: &mut SyncContext, reason: StopReason) -> Result<SyncOutcome, SyncError> {
        ctx.flush_state()?;
        match reason {
            StopReason::Cancelled => {
                warn!("Shutdown requested, stopping with progress checkpointed");
                Err(SyncError::ShutdownRequested)
            }
            StopReason::Deadline => {
                info!(
                    "Maximum run time of {:?} reached, stopping early",
                    self.config.max_run_time.unwrap_or_default()
                );
                Ok(SyncOutcome::StoppedEarly)
            }
        }
    }

    async fn sync_stream(
        &mut self,
        ctx: &mut SyncContext,
        stream: StreamId,
    ) -> Result<StreamStatus, StreamFailure> {
        ctx.state_mut().set_currently_syncing(Some(stream));

        let schema = self.schema_for(stream).await?;
        let version = fingerprint(&schema);
        ctx.emit_schema(stream, schema.clone())?;

        let partitions = plan_partitions(stream, &self.config, ctx.state());
        info!("Stream {stream} has {} partition(s)", partitions.len());

        for partition in partitions {
            if let Some(reason) = self.stop_reason() {
                return Ok(StreamStatus::Stopped(reason));
            }
            if ctx.state().partition(stream, &partition.key).done {
                continue;
            }
            self.sync_partition(ctx, stream, partition, &schema, version)
                .await?;
        }

        ctx.state_mut().complete_stream(stream);
        ctx.flush_state()?;
        Ok(StreamStatus::Completed)
    }

    async fn schema_for(&self, stream: StreamId) -> Result<Value, SourceError> {
        if let Some(schema) = self.catalog.as_ref().and_then(|c| c.schema(stream)) {
            return Ok(schema.clone());
        }
        catalog::fetch_schema(stream, &self.config, &self.fetcher).await
    }

    async fn sync_partition(
        &mut self,
        ctx: &mut SyncContext,
        stream: StreamId,
        partition: Partition,
        schema: &Value,
        version: u64,
    ) -> Result<(), StreamFailure> {
        let key = partition.key.clone();
        let mut source = factory::create_source(&self.config, &self.fetcher, stream, partition);

        // Export jobs cannot start mid-way, so they re-read the partition.
        let mut cursor = if source.is_export() {
            ctx.state_mut().restart_partition(stream, &key);
            Cursor::None
        } else {
            match ctx.state().partition(stream, &key).count {
                0 => Cursor::None,
                count => {
                    info!(stream = %stream, partition = %key, offset = count, "Resuming partition");
                    Cursor::Offset {
                        offset: count as usize,
                    }
                }
            }
        };

        let mut emitted = 0u64;
        loop {
            let page = source.fetch_data(self.config.count, cursor).await?;
            if page.reached_end {
                break;
            }

            let consumed = page.row_count() as u64;
            for record in page.records {
                let Some(record) = self.transformer.apply(stream, record, schema).await? else {
                    continue;
                };

                if stream.tracks_ids() {
                    let id = record.id().map(str::to_string).ok_or_else(|| {
                        SourceError::Api(ApiError::Malformed(format!(
                            "{stream} record without an 'id'"
                        )))
                    })?;
                    if !ctx.state_mut().record_id(stream, &id) {
                        continue;
                    }
                }

                ctx.emit_record(stream, record, version)?;
                emitted += 1;
            }

            ctx.state_mut().advance_partition(stream, &key, consumed);
            ctx.checkpoint()?;

            match page.next_cursor {
                Some(next) => cursor = next,
                None => break,
            }
        }

        ctx.state_mut().complete_partition(stream, &key);
        ctx.flush_state()?;
        info!(stream = %stream, partition = %key, records = emitted, "Partition complete");
        Ok(())
    }
}

/// Why a single stream stopped before completing.
enum StreamFailure {
    Source(SourceError),
    Sink(SinkError),
}

impl From<SourceError> for StreamFailure {
    fn from(err: SourceError) -> Self {
        StreamFailure::Source(err)
    }
}

impl From<SinkError> for StreamFailure {
    fn from(err: SinkError) -> Self {
        StreamFailure::Sink(err)
    }
}
