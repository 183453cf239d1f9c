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

use async_trait::async_trait;
use serde_json::Value;
use sinker::auth::CredentialProfile;
use sinker::config_loader::load_config;
use sinker::configs::SinkerConfig;
use sinker::error::{SourceError, WriteError};
use sinker::resolver::{ResolvedTaskConfig, resolve_all};
use sinker::source::{OffsetCommitter, PartitionReader, Record, RecordSource, SourceFactory};
use sinker::writer::{TableWriter, WriteRequest};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub fn load_fixture() -> SinkerConfig {
    load_config(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/sinker.json"))
        .expect("fixture should load")
}

pub fn resolved_task(name: &str) -> Arc<ResolvedTaskConfig> {
    let resolved = resolve_all(&load_fixture());
    assert!(resolved.rejected.is_empty(), "{:?}", resolved.rejected);
    let task = resolved
        .tasks
        .into_iter()
        .find(|task| task.name == name)
        .expect("task should be in the fixture");
    Arc::new(task)
}

/// Serves the given records per partition. Once a partition runs out it
/// either ends or, when `hold_open` is set, waits forever like an idle topic.
pub struct MemorySource {
    partitions: Vec<(i32, Vec<Value>)>,
    hold_open: bool,
    committer: Arc<RecordingCommitter>,
}

impl MemorySource {
    pub fn new(partitions: Vec<(i32, Vec<Value>)>) -> Self {
        Self {
            partitions,
            hold_open: false,
            committer: Arc::new(RecordingCommitter::default()),
        }
    }

    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn committer(&self) -> Arc<RecordingCommitter> {
        self.committer.clone()
    }
}

struct MemoryReader {
    partition: i32,
    records: VecDeque<Record>,
    hold_open: bool,
}

#[async_trait]
impl PartitionReader for MemoryReader {
    fn partition(&self) -> i32 {
        self.partition
    }

    async fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        match self.records.pop_front() {
            Some(record) => Ok(Some(record)),
            None if self.hold_open => std::future::pending().await,
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn partitions(&mut self) -> Result<Vec<Box<dyn PartitionReader>>, SourceError> {
        let hold_open = self.hold_open;
        Ok(self
            .partitions
            .drain(..)
            .map(|(partition, bodies)| {
                let records = bodies
                    .into_iter()
                    .enumerate()
                    .map(|(offset, body)| Record::new(partition, offset as i64, body))
                    .collect();
                Box::new(MemoryReader {
                    partition,
                    records,
                    hold_open,
                }) as Box<dyn PartitionReader>
            })
            .collect())
    }

    fn committer(&self) -> Arc<dyn OffsetCommitter> {
        self.committer.clone()
    }
}

/// Opens an idle source for every task, for lifecycle tests.
pub struct IdleSources;

impl SourceFactory for IdleSources {
    fn open(
        &self,
        _task: &ResolvedTaskConfig,
        _credentials: &CredentialProfile,
    ) -> Result<Box<dyn RecordSource>, SourceError> {
        Ok(Box::new(MemorySource::new(vec![(0, Vec::new())]).hold_open()))
    }
}

#[derive(Default)]
pub struct RecordingCommitter {
    commits: Mutex<Vec<(i32, i64)>>,
}

impl RecordingCommitter {
    pub fn commits(&self) -> Vec<(i32, i64)> {
        self.commits.lock().unwrap().clone()
    }

    pub fn last(&self, partition: i32) -> Option<i64> {
        self.commits()
            .into_iter()
            .filter(|(p, _)| *p == partition)
            .map(|(_, offset)| offset)
            .last()
    }
}

#[async_trait]
impl OffsetCommitter for RecordingCommitter {
    async fn commit(&self, partition: i32, offset: i64) -> Result<(), SourceError> {
        self.commits.lock().unwrap().push((partition, offset));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingWriter {
    requests: Mutex<Vec<WriteRequest>>,
    reject: bool,
}

impl RecordingWriter {
    pub fn rejecting() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    pub fn requests(&self) -> Vec<WriteRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// `(partition, offset, shard)` of every written record.
    pub fn placements(&self) -> Vec<(i32, i64, usize)> {
        let mut placements: Vec<_> = self
            .requests()
            .into_iter()
            .flat_map(|request| {
                let shard = request.shard;
                request
                    .records
                    .into_iter()
                    .map(move |record| (record.partition, record.offset, shard))
            })
            .collect();
        placements.sort();
        placements
    }
}

#[async_trait]
impl TableWriter for RecordingWriter {
    async fn write(&self, request: &WriteRequest) -> Result<(), WriteError> {
        if self.reject {
            return Err(WriteError::Permanent("table does not exist".to_owned()));
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }
}
