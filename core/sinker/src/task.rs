/* Licensed to the Apache Software Foundation (ASF) under one
 * or more contributor license agreements.  See the NOTICE file
 * distributed with this work for additional information
 * regarding copyright ownership.  The ASF licenses this file
 * to you under the Apache License, Version 2.0 (the
 * "License"); you may not use this file except in compliance
 * with the License.  You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing,
 * software distributed under the License is distributed on an
 * "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
 * KIND, either express or implied.  See the License for the
 * specific language governing permissions and limitations
 * under the License.
 */

//! One running task: a reader per partition, a flush ticker and a flush
//! worker per shard.

use crate::buffer::{BufferManager, Thresholds};
use crate::error::{FlushError, RuntimeError, SourceError};
use crate::flush::{FlushCoordinator, drain};
use crate::metrics::TaskMetrics;
use crate::offsets::OffsetTracker;
use crate::resolver::ResolvedTaskConfig;
use crate::router::ShardRouter;
use crate::source::{PartitionReader, RecordSource};
use crate::writer::TableWriter;
use futures::future::join_all;
use std::sync::Arc;
use strum::Display;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    /// Shutdown was requested.
    Shutdown,
    /// Every partition reader reached its end.
    SourceExhausted,
}

enum Stop {
    Requested,
    Exhausted,
    Halted(FlushError),
    SourceFailed(SourceError),
}

/// Runs a task until shutdown, source exhaustion or a fatal flush. Whatever
/// the cause, buffered records are flushed and the workers drained before
/// returning.
pub async fn run_task(
    config: Arc<ResolvedTaskConfig>,
    mut source: Box<dyn RecordSource>,
    writer: Arc<dyn TableWriter>,
    metrics: TaskMetrics,
    mut shutdown: watch::Receiver<()>,
) -> Result<StopReason, RuntimeError> {
    let name = config.name.clone();
    let router = Arc::new(
        ShardRouter::new(&config).with_fallback_counter(metrics.routing_fallbacks.clone()),
    );
    let (buffers, receivers) =
        BufferManager::new(router.shard_count(), Thresholds::from(config.as_ref()));
    let buffers = Arc::new(buffers);
    let offsets = Arc::new(Mutex::new(OffsetTracker::default()));
    let coordinator = Arc::new(FlushCoordinator::new(
        &config,
        writer,
        source.committer(),
        offsets.clone(),
        metrics.clone(),
    ));

    let (halt_tx, halt_rx) = flume::unbounded();
    let workers = coordinator.spawn_workers(receivers, halt_tx);

    let partitions = match source.partitions().await {
        Ok(partitions) => partitions,
        Err(error) => {
            shutdown_buffers(&name, &buffers).await;
            drain(&name, workers, config.drain_timeout).await?;
            return Err(error.into());
        }
    };
    info!(
        "Task '{name}' started with {} partition(s) and {} shard(s), policy: {}",
        partitions.len(),
        router.shard_count(),
        config.sharding_policy
    );

    let (stop_tx, stop_rx) = watch::channel(());
    let (failure_tx, failure_rx) = flume::unbounded();
    let readers: Vec<JoinHandle<()>> = partitions
        .into_iter()
        .map(|reader| {
            let context = ReaderContext {
                router: router.clone(),
                buffers: buffers.clone(),
                offsets: offsets.clone(),
                metrics: metrics.clone(),
            };
            let stop = stop_rx.clone();
            let failure_tx = failure_tx.clone();
            tokio::spawn(async move {
                let partition = reader.partition();
                if let Err(error) = consume_partition(reader, context, stop).await {
                    error!("Reader of partition {partition} failed: {error}");
                    let _ = failure_tx.send(error);
                }
            })
        })
        .collect();
    drop(failure_tx);
    let ticker = spawn_ticker(&config, buffers.clone(), stop_rx.clone());

    let mut readers_done = join_all(readers);
    let mut stop = tokio::select! {
        biased;
        _ = shutdown.changed() => Stop::Requested,
        Ok(error) = halt_rx.recv_async() => Stop::Halted(error),
        Ok(error) = failure_rx.recv_async() => Stop::SourceFailed(error),
        _ = &mut readers_done => Stop::Exhausted,
    };

    let _ = stop_tx.send(());
    if matches!(stop, Stop::Exhausted) {
        if let Ok(error) = failure_rx.try_recv() {
            stop = Stop::SourceFailed(error);
        }
    } else {
        readers_done.await;
    }
    let _ = ticker.await;
    shutdown_buffers(&name, &buffers).await;
    let drained = drain(&name, workers, config.drain_timeout).await;

    match stop {
        Stop::Halted(error) => {
            error!("Task '{name}' halted: {error}");
            Err(error.into())
        }
        Stop::SourceFailed(error) => Err(error.into()),
        Stop::Requested | Stop::Exhausted => {
            drained?;
            if let Ok(error) = halt_rx.try_recv() {
                return Err(error.into());
            }
            let reason = match stop {
                Stop::Exhausted => StopReason::SourceExhausted,
                _ => StopReason::Shutdown,
            };
            info!("Task '{name}' stopped: {reason}");
            Ok(reason)
        }
    }
}

struct ReaderContext {
    router: Arc<ShardRouter>,
    buffers: Arc<BufferManager>,
    offsets: Arc<Mutex<OffsetTracker>>,
    metrics: TaskMetrics,
}

async fn consume_partition(
    mut reader: Box<dyn PartitionReader>,
    context: ReaderContext,
    mut stop: watch::Receiver<()>,
) -> Result<(), SourceError> {
    loop {
        let next = tokio::select! {
            _ = stop.changed() => return Ok(()),
            next = reader.next_record() => next?,
        };
        let Some(record) = next else {
            return Ok(());
        };
        context.metrics.records_consumed.inc();
        context
            .offsets
            .lock()
            .await
            .track(record.partition, record.offset);
        let shard = context.router.route(&record);
        let appended = tokio::select! {
            _ = stop.changed() => return Ok(()),
            appended = context.buffers.append(shard, record) => appended,
        };
        if let Err(error) = appended {
            // The shard's worker is gone; the task is already halting.
            warn!("Stopped reading partition {}: {error}", reader.partition());
            return Ok(());
        }
    }
}

fn spawn_ticker(
    config: &ResolvedTaskConfig,
    buffers: Arc<BufferManager>,
    mut stop: watch::Receiver<()>,
) -> JoinHandle<()> {
    let period = config.flush_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = stop.changed() => return,
                _ = interval.tick() => {}
            }
            let flushed = tokio::select! {
                _ = stop.changed() => return,
                flushed = buffers.tick() => flushed,
            };
            if let Err(error) = flushed {
                warn!("Timer flush stopped: {error}");
                return;
            }
        }
    })
}

async fn shutdown_buffers(name: &str, buffers: &BufferManager) {
    match buffers.shutdown().await {
        Ok(0) => {}
        Ok(flushed) => info!("Task '{name}' handed off {flushed} final batch(es)"),
        Err(error) => warn!("Task '{name}' could not hand off every final batch: {error}"),
    }
}
