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

use crate::buffer::Batch;
use crate::configs::DimConfig;
use crate::error::FlushError;
use crate::metrics::TaskMetrics;
use crate::offsets::OffsetTracker;
use crate::resolver::ResolvedTaskConfig;
use crate::router::ShardKey;
use crate::source::OffsetCommitter;
use crate::writer::{TableWriter, WriteRequest};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0 based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub shard: ShardKey,
    pub records: usize,
    pub attempts: u32,
    /// Commit positions handed to the source, per partition.
    pub committed: Vec<(i32, i64)>,
}

pub struct FlushCoordinator {
    task: String,
    destination: String,
    table: String,
    auto_schema: bool,
    exclude_columns: Vec<String>,
    dims: Vec<DimConfig>,
    retry: RetryPolicy,
    writer: Arc<dyn TableWriter>,
    committer: Arc<dyn OffsetCommitter>,
    offsets: Arc<Mutex<OffsetTracker>>,
    /// Held from completing offsets until the committer has them, so commit
    /// positions reach the source in the order they were computed.
    commit_order: Mutex<()>,
    metrics: TaskMetrics,
}

impl FlushCoordinator {
    pub fn new(
        config: &ResolvedTaskConfig,
        writer: Arc<dyn TableWriter>,
        committer: Arc<dyn OffsetCommitter>,
        offsets: Arc<Mutex<OffsetTracker>>,
        metrics: TaskMetrics,
    ) -> Self {
        Self {
            task: config.name.clone(),
            destination: config.destination.clone(),
            table: config.table_name.clone(),
            auto_schema: config.auto_schema,
            exclude_columns: config.exclude_columns.clone(),
            dims: config.dims.clone(),
            retry: config.retry,
            writer,
            committer,
            offsets,
            commit_order: Mutex::new(()),
            metrics,
        }
    }

    pub async fn flush(&self, batch: Batch) -> Result<FlushReport, FlushError> {
        let shard = batch.shard;
        let records = batch.len();
        let offsets: Vec<(i32, i64)> = batch.offsets().collect();
        let request = WriteRequest {
            destination: self.destination.clone(),
            table: self.table.clone(),
            auto_schema: self.auto_schema,
            exclude_columns: self.exclude_columns.clone(),
            dims: self.dims.clone(),
            shard: shard.index(),
            records: batch.records,
        };

        let attempts = self.write_with_retry(&request).await?;

        self.metrics.batches_flushed.inc();
        self.metrics.records_flushed.inc_by(records as u64);
        debug!(
            "Flushed {records} records to table '{}' (shard {shard}) for task '{}' after {attempts} attempt(s)",
            self.table, self.task
        );

        let _commit_order = self.commit_order.lock().await;
        let committed = self.offsets.lock().await.complete(offsets);
        for (partition, offset) in &committed {
            match self.committer.commit(*partition, *offset).await {
                Ok(()) => {
                    self.metrics.offsets_committed.inc();
                }
                Err(error) => {
                    // A later commit for the same partition covers this one.
                    warn!(
                        "Failed to commit offset {offset} of partition {partition} for task '{}': {error}",
                        self.task
                    );
                }
            }
        }

        Ok(FlushReport {
            shard,
            records,
            attempts,
            committed,
        })
    }

    async fn write_with_retry(&self, request: &WriteRequest) -> Result<u32, FlushError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.writer.write(request).await {
                Ok(()) => return Ok(attempt),
                Err(error) => error,
            };

            if !error.is_transient() {
                return Err(self.fail(FlushError::Rejected {
                    table: request.table.clone(),
                    shard: request.shard,
                    records: request.records.len(),
                    source: error,
                }));
            }
            if attempt >= self.retry.max_attempts {
                return Err(self.fail(FlushError::Exhausted {
                    table: request.table.clone(),
                    shard: request.shard,
                    records: request.records.len(),
                    attempts: attempt,
                    source: error,
                }));
            }

            let delay = self.retry.backoff(attempt - 1);
            warn!(
                "Write to table '{}' (shard {}) failed on attempt {attempt}/{}: {error}. Retrying in {delay:?}",
                request.table, request.shard, self.retry.max_attempts
            );
            self.metrics.flush_retries.inc();
            tokio::time::sleep(delay).await;
        }
    }

    fn fail(&self, error: FlushError) -> FlushError {
        self.metrics.flush_failures.inc();
        error!("Task '{}': {error}", self.task);
        error
    }

    /// One worker per shard lane. A worker stops at the first fatal batch and
    /// reports it on `halt`; its queued batches stay unwritten and their
    /// offsets uncommitted.
    pub fn spawn_workers(
        self: &Arc<Self>,
        receivers: Vec<mpsc::Receiver<Batch>>,
        halt: flume::Sender<FlushError>,
    ) -> Vec<JoinHandle<()>> {
        receivers
            .into_iter()
            .map(|mut receiver| {
                let coordinator = self.clone();
                let halt = halt.clone();
                tokio::spawn(async move {
                    while let Some(batch) = receiver.recv().await {
                        if let Err(error) = coordinator.flush(batch).await {
                            let _ = halt.send(error);
                            break;
                        }
                    }
                })
            })
            .collect()
    }
}

/// Waits for the flush workers. Workers still running after `timeout` are
/// aborted and their batches reported as a drain timeout.
pub async fn drain(
    task: &str,
    handles: Vec<JoinHandle<()>>,
    timeout: Duration,
) -> Result<(), FlushError> {
    let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
    match tokio::time::timeout(timeout, join_all(handles)).await {
        Ok(_) => {
            info!("Flush workers of task '{task}' drained");
            Ok(())
        }
        Err(_) => {
            for abort in aborts {
                abort.abort();
            }
            let error = FlushError::DrainTimeout {
                task: task.to_owned(),
                timeout_ms: timeout.as_millis(),
            };
            error!("{error}");
            Err(error)
        }
    }
}
