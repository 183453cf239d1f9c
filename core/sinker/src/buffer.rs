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

//! Per-shard accumulation.
//!
//! Every shard owns a lane: its open buffer plus the sending half of a
//! one-slot channel towards the shard's flush worker. A full buffer is swapped
//! for an empty one and handed to the worker while the lane lock is held, so
//! appends to that shard wait while the previous batch is still queued, and
//! batches of one shard reach the worker in append order.

use crate::error::FlushError;
use crate::resolver::ResolvedTaskConfig;
use crate::router::ShardKey;
use crate::source::Record;
use std::mem;
use std::time::Duration;
use strum::Display;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tracing::debug;

const LANE_CAPACITY: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub buffer_size: usize,
    pub min_buffer_size: usize,
    pub flush_interval: Duration,
    /// Byte estimate for records whose size is unknown.
    pub msg_size_hint: usize,
}

impl From<&ResolvedTaskConfig> for Thresholds {
    fn from(config: &ResolvedTaskConfig) -> Self {
        Self {
            buffer_size: config.buffer_size,
            min_buffer_size: config.min_buffer_size,
            flush_interval: config.flush_interval,
            msg_size_hint: config.msg_size_hint,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FlushTrigger {
    Size,
    Interval,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
    Buffered,
    Flushed(FlushTrigger),
}

/// Records of one shard moving from the buffer to its flush worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub shard: ShardKey,
    pub records: Vec<Record>,
    pub byte_size: usize,
    pub trigger: FlushTrigger,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn offsets(&self) -> impl Iterator<Item = (i32, i64)> + '_ {
        self.records
            .iter()
            .map(|record| (record.partition, record.offset))
    }
}

#[derive(Debug, Default)]
pub struct ShardBuffer {
    records: Vec<Record>,
    byte_size: usize,
    opened_at: Option<Instant>,
}

impl ShardBuffer {
    pub fn push(&mut self, record: Record, size_hint: usize, now: Instant) {
        if self.records.is_empty() {
            self.opened_at = Some(now);
        }
        self.byte_size += if record.size > 0 {
            record.size
        } else {
            size_hint
        };
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    fn interval_due(&self, thresholds: &Thresholds, now: Instant) -> bool {
        match self.opened_at {
            Some(opened_at) => {
                now.duration_since(opened_at) >= thresholds.flush_interval
                    && self.records.len() >= thresholds.min_buffer_size
            }
            None => false,
        }
    }

    fn take(&mut self, shard: ShardKey, trigger: FlushTrigger) -> Batch {
        self.opened_at = None;
        Batch {
            shard,
            records: mem::take(&mut self.records),
            byte_size: mem::take(&mut self.byte_size),
            trigger,
        }
    }
}

struct Lane {
    shard: ShardKey,
    buffer: ShardBuffer,
    sender: Option<mpsc::Sender<Batch>>,
}

impl Lane {
    /// Waits for the worker to have room before the swap, so a cancelled
    /// hand-off leaves the records in the buffer.
    async fn hand_off(&mut self, trigger: FlushTrigger) -> Result<(), FlushError> {
        let shard = self.shard;
        let sender = self
            .sender
            .as_ref()
            .ok_or(FlushError::LaneClosed(shard.index()))?;
        let permit = sender
            .reserve()
            .await
            .map_err(|_| FlushError::LaneClosed(shard.index()))?;
        let batch = self.buffer.take(shard, trigger);
        debug!(
            "Handing off {} records ({} bytes) of shard {shard}, trigger: {trigger}",
            batch.len(),
            batch.byte_size
        );
        permit.send(batch);
        Ok(())
    }
}

pub struct BufferManager {
    lanes: Vec<Mutex<Lane>>,
    thresholds: Thresholds,
}

impl BufferManager {
    /// Returns the manager and one batch receiver per shard, in shard order.
    pub fn new(shards: usize, thresholds: Thresholds) -> (Self, Vec<mpsc::Receiver<Batch>>) {
        let mut lanes = Vec::with_capacity(shards);
        let mut receivers = Vec::with_capacity(shards);
        for shard in 0..shards.max(1) {
            let (sender, receiver) = mpsc::channel(LANE_CAPACITY);
            lanes.push(Mutex::new(Lane {
                shard: ShardKey::from(shard),
                buffer: ShardBuffer::default(),
                sender: Some(sender),
            }));
            receivers.push(receiver);
        }
        (Self { lanes, thresholds }, receivers)
    }

    pub fn shard_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub async fn append(&self, shard: ShardKey, record: Record) -> Result<FlushDecision, FlushError> {
        let lane = self
            .lanes
            .get(shard.index())
            .ok_or(FlushError::LaneClosed(shard.index()))?;
        let mut lane = lane.lock().await;
        let now = Instant::now();
        lane.buffer.push(record, self.thresholds.msg_size_hint, now);
        let trigger = if lane.buffer.len() >= self.thresholds.buffer_size {
            FlushTrigger::Size
        } else if lane.buffer.interval_due(&self.thresholds, now) {
            FlushTrigger::Interval
        } else {
            return Ok(FlushDecision::Buffered);
        };
        lane.hand_off(trigger).await?;
        Ok(FlushDecision::Flushed(trigger))
    }

    /// Timer-driven check of every shard. Returns the number of batches handed off.
    pub async fn tick(&self) -> Result<usize, FlushError> {
        let mut flushed = 0;
        for lane in &self.lanes {
            let mut lane = lane.lock().await;
            if lane.buffer.interval_due(&self.thresholds, Instant::now()) {
                lane.hand_off(FlushTrigger::Interval).await?;
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Hands off every non-empty buffer regardless of thresholds, then closes
    /// the lanes so the workers stop once their queue is empty.
    pub async fn shutdown(&self) -> Result<usize, FlushError> {
        let mut flushed = 0;
        let mut first_error = None;
        for lane in &self.lanes {
            let mut lane = lane.lock().await;
            if !lane.buffer.is_empty() {
                match lane.hand_off(FlushTrigger::Shutdown).await {
                    Ok(()) => flushed += 1,
                    Err(error) => {
                        first_error.get_or_insert(error);
                    }
                }
            }
            lane.sender = None;
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(flushed),
        }
    }

    pub async fn buffered(&self, shard: ShardKey) -> usize {
        match self.lanes.get(shard.index()) {
            Some(lane) => lane.lock().await.buffer.len(),
            None => 0,
        }
    }
}
