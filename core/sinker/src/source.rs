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

//! Seams towards the Kafka client. The pipeline only sees partitions,
//! decoded records and an offset committer.

use crate::auth::CredentialProfile;
use crate::error::SourceError;
use crate::resolver::ResolvedTaskConfig;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A decoded record together with its position in the topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub partition: i32,
    pub offset: i64,
    pub body: Value,
    /// Size of the raw message in bytes, 0 when unknown.
    #[serde(skip)]
    pub size: usize,
}

impl Record {
    pub fn new(partition: i32, offset: i64, body: Value) -> Self {
        Self {
            partition,
            offset,
            body,
            size: 0,
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }
}

#[async_trait]
pub trait PartitionReader: Send {
    fn partition(&self) -> i32;

    /// `Ok(None)` once the partition is exhausted or revoked.
    async fn next_record(&mut self) -> Result<Option<Record>, SourceError>;
}

#[async_trait]
pub trait OffsetCommitter: Send + Sync {
    /// `offset` is the next offset the consumer group resumes from.
    async fn commit(&self, partition: i32, offset: i64) -> Result<(), SourceError>;
}

#[async_trait]
pub trait RecordSource: Send {
    async fn partitions(&mut self) -> Result<Vec<Box<dyn PartitionReader>>, SourceError>;

    fn committer(&self) -> Arc<dyn OffsetCommitter>;
}

/// Opens a source for a resolved task. The credential profile has already been
/// validated when this is called.
pub trait SourceFactory: Send + Sync {
    fn open(
        &self,
        task: &ResolvedTaskConfig,
        credentials: &CredentialProfile,
    ) -> Result<Box<dyn RecordSource>, SourceError>;

    /// Called once a task is removed from the configuration.
    fn release(&self, _task: &str) {}
}

const FEED_CAPACITY: usize = 1_024;

/// Newline-delimited JSON on stdin, presented to every task as a single
/// partition 0 whose offsets are line numbers.
///
/// One pump reads the input and hands each record to every subscribed task.
/// A task sees the records read after it subscribed; a restarted task keeps
/// its subscription and resumes where its previous instance stopped.
#[derive(Default)]
pub struct StdinSourceFactory {
    feeds: Arc<DashMap<String, Feed>>,
    finished: Arc<AtomicBool>,
    started: AtomicBool,
}

struct Feed {
    sender: Option<mpsc::Sender<Record>>,
    receiver: Arc<Mutex<mpsc::Receiver<Record>>>,
}

impl StdinSourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts pumping `input` to the subscribed tasks. Only the first call
    /// has an effect.
    pub fn start<R>(&self, input: R) -> Option<JoinHandle<()>>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return None;
        }
        let feeds = self.feeds.clone();
        let finished = self.finished.clone();
        Some(tokio::spawn(async move {
            if let Err(error) = pump(input.lines(), &feeds).await {
                error!("Stopped reading input: {error}");
            }
            finished.store(true, Ordering::SeqCst);
            for mut feed in feeds.iter_mut() {
                feed.sender = None;
            }
            info!("Input exhausted");
        }))
    }

    pub fn subscribers(&self) -> usize {
        self.feeds.len()
    }
}

async fn pump<R>(mut lines: Lines<R>, feeds: &DashMap<String, Feed>) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut offset = -1;
    while let Some(line) = lines.next_line().await? {
        offset += 1;
        if line.trim().is_empty() {
            continue;
        }
        let body = match serde_json::from_str::<Value>(&line) {
            Ok(body) => body,
            Err(error) => {
                warn!("Skipping line {offset}: not valid JSON ({error})");
                continue;
            }
        };
        let record = Record::new(0, offset, body).with_size(line.len());
        let senders: Vec<_> = feeds
            .iter()
            .filter_map(|feed| feed.sender.clone())
            .collect();
        for sender in senders {
            // A closed feed belongs to a released task.
            let _ = sender.send(record.clone()).await;
        }
    }
    Ok(())
}

impl SourceFactory for StdinSourceFactory {
    fn open(
        &self,
        task: &ResolvedTaskConfig,
        _credentials: &CredentialProfile,
    ) -> Result<Box<dyn RecordSource>, SourceError> {
        let receiver = self
            .feeds
            .entry(task.name.clone())
            .or_insert_with(|| {
                let (sender, receiver) = mpsc::channel(FEED_CAPACITY);
                Feed {
                    sender: Some(sender),
                    receiver: Arc::new(Mutex::new(receiver)),
                }
            })
            .receiver
            .clone();
        if self.finished.load(Ordering::SeqCst) {
            if let Some(mut feed) = self.feeds.get_mut(&task.name) {
                feed.sender = None;
            }
        }
        info!(
            "Reading records for task '{}' (topic '{}') from stdin",
            task.name, task.topic
        );
        Ok(Box::new(StdinSource { receiver }))
    }

    fn release(&self, task: &str) {
        if self.feeds.remove(task).is_some() {
            info!("Released the stdin feed of task '{task}'");
        }
    }
}

pub struct StdinSource {
    receiver: Arc<Mutex<mpsc::Receiver<Record>>>,
}

#[async_trait]
impl RecordSource for StdinSource {
    async fn partitions(&mut self) -> Result<Vec<Box<dyn PartitionReader>>, SourceError> {
        Ok(vec![Box::new(StdinReader {
            receiver: self.receiver.clone(),
        })])
    }

    fn committer(&self) -> Arc<dyn OffsetCommitter> {
        Arc::new(LoggingCommitter)
    }
}

struct StdinReader {
    receiver: Arc<Mutex<mpsc::Receiver<Record>>>,
}

#[async_trait]
impl PartitionReader for StdinReader {
    fn partition(&self) -> i32 {
        0
    }

    async fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        Ok(self.receiver.lock().await.recv().await)
    }
}

struct LoggingCommitter;

#[async_trait]
impl OffsetCommitter for LoggingCommitter {
    async fn commit(&self, partition: i32, offset: i64) -> Result<(), SourceError> {
        info!("Committed offset {offset} for partition {partition}");
        Ok(())
    }
}
