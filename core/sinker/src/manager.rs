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

use crate::auth;
use crate::configs::SinkerConfig;
use crate::error::RuntimeError;
use crate::metrics::Metrics;
use crate::resolver::{ResolvedTaskConfig, resolve_all};
use crate::source::SourceFactory;
use crate::task::run_task;
use crate::writer::TableWriter;
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TaskStatus {
    Starting,
    Running,
    Stopped,
    Error,
}

#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub name: String,
    pub cluster: String,
    pub topic: String,
    pub table: String,
    pub policy: String,
    pub shards: usize,
    pub status: TaskStatus,
    pub last_error: Option<String>,
}

impl TaskInfo {
    fn from_config(config: &ResolvedTaskConfig) -> Self {
        Self {
            name: config.name.clone(),
            cluster: config.cluster.name.clone(),
            topic: config.topic.clone(),
            table: config.table_name.clone(),
            policy: config.sharding_policy.to_string(),
            shards: config.shard_count(),
            status: TaskStatus::Stopped,
            last_error: None,
        }
    }

    fn rejected(name: &str, error: &str) -> Self {
        Self {
            name: name.to_owned(),
            cluster: String::new(),
            topic: String::new(),
            table: String::new(),
            policy: String::new(),
            shards: 0,
            status: TaskStatus::Error,
            last_error: Some(error.to_owned()),
        }
    }
}

pub struct TaskDetails {
    pub info: TaskInfo,
    /// `None` when the task failed validation.
    pub config: Option<Arc<ResolvedTaskConfig>>,
    pub shutdown_tx: Option<watch::Sender<()>>,
    pub task_handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for TaskDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDetails")
            .field("info", &self.info)
            .field("config", &self.config)
            .field("running", &self.task_handle.is_some())
            .finish()
    }
}

/// What a reload changed, by task name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReloadReport {
    pub started: Vec<String>,
    pub restarted: Vec<String>,
    pub stopped: Vec<String>,
    pub unchanged: Vec<String>,
    pub rejected: Vec<String>,
}

pub struct TaskManager {
    tasks: DashMap<String, Arc<Mutex<TaskDetails>>>,
    sources: Arc<dyn SourceFactory>,
    writer: Arc<dyn TableWriter>,
    metrics: Arc<Metrics>,
    finished: Arc<Notify>,
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl TaskManager {
    pub fn new(
        sources: Arc<dyn SourceFactory>,
        writer: Arc<dyn TableWriter>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            tasks: DashMap::new(),
            sources,
            writer,
            metrics,
            finished: Arc::new(Notify::new()),
        }
    }

    pub fn register(&self, details: TaskDetails) {
        self.tasks
            .insert(details.info.name.clone(), Arc::new(Mutex::new(details)));
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Mutex<TaskDetails>>> {
        self.tasks.get(name).map(|entry| entry.value().clone())
    }

    pub async fn get_config(&self, name: &str) -> Option<Arc<ResolvedTaskConfig>> {
        let task = self.get(name).await?;
        let task = task.lock().await;
        task.config.clone()
    }

    pub async fn get_all(&self) -> Vec<TaskInfo> {
        let tasks: Vec<_> = self.tasks.iter().map(|entry| entry.value().clone()).collect();
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            let task = task.lock().await;
            results.push(task.info.clone());
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));
        results
    }

    pub async fn running(&self) -> usize {
        self.get_all()
            .await
            .iter()
            .filter(|info| matches!(info.status, TaskStatus::Running | TaskStatus::Starting))
            .count()
    }

    /// Resolves when a task ends on its own (source exhausted or failure).
    pub async fn task_finished(&self) {
        self.finished.notified().await;
    }

    pub async fn update_status(&self, name: &str, status: TaskStatus) {
        if let Some(task) = self.get(name).await {
            let mut task = task.lock().await;
            let old_status = task.info.status;
            task.info.status = status;
            if matches!(status, TaskStatus::Running | TaskStatus::Stopped) {
                task.info.last_error = None;
            }
            if old_status != TaskStatus::Running && status == TaskStatus::Running {
                self.metrics.increment_tasks_running();
            } else if old_status == TaskStatus::Running && status != TaskStatus::Running {
                self.metrics.decrement_tasks_running();
            }
        }
    }

    pub async fn set_error(&self, name: &str, error_message: &str) {
        if let Some(task) = self.get(name).await {
            let mut task = task.lock().await;
            if task.info.status == TaskStatus::Running {
                self.metrics.decrement_tasks_running();
            }
            task.info.status = TaskStatus::Error;
            task.info.last_error = Some(error_message.to_owned());
        }
    }

    pub async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        let details_arc = self
            .get(name)
            .await
            .ok_or_else(|| RuntimeError::TaskNotFound(name.to_owned()))?;

        let config = {
            let details = details_arc.lock().await;
            if details.task_handle.is_some() {
                return Ok(());
            }
            details.config.clone().ok_or_else(|| {
                RuntimeError::TaskNotRunnable(
                    name.to_owned(),
                    details
                        .info
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "no valid configuration".to_owned()),
                )
            })?
        };
        self.update_status(name, TaskStatus::Starting).await;

        let credentials = match auth::build(&config.cluster) {
            Ok(credentials) => credentials,
            Err(error) => {
                self.set_error(name, &error.to_string()).await;
                return Err(error.into());
            }
        };
        info!(
            "Starting task '{name}' on cluster '{}' with credentials: {credentials}",
            config.cluster.name
        );
        let source = match self.sources.open(&config, &credentials) {
            Ok(source) => source,
            Err(error) => {
                self.set_error(name, &error.to_string()).await;
                return Err(error.into());
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let mut details = details_arc.lock().await;
        let handle = tokio::spawn({
            let details_arc = details_arc.clone();
            let writer = self.writer.clone();
            let sources = self.sources.clone();
            let task_metrics = self.metrics.for_task(name);
            let metrics = self.metrics.clone();
            let finished = self.finished.clone();
            let name = name.to_owned();
            async move {
                let result = run_task(config, source, writer, task_metrics, shutdown_rx).await;
                let mut details = details_arc.lock().await;
                if details.info.status == TaskStatus::Running {
                    metrics.decrement_tasks_running();
                }
                match result {
                    Ok(reason) => {
                        info!("Task '{name}' finished: {reason}");
                        details.info.status = TaskStatus::Stopped;
                        details.info.last_error = None;
                    }
                    Err(error) => {
                        error!("Task '{name}' failed: {error}");
                        sources.release(&name);
                        details.info.status = TaskStatus::Error;
                        details.info.last_error = Some(error.to_string());
                    }
                }
                details.shutdown_tx = None;
                drop(details);
                finished.notify_one();
            }
        });

        details.info.status = TaskStatus::Running;
        details.info.last_error = None;
        details.shutdown_tx = Some(shutdown_tx);
        details.task_handle = Some(handle);
        self.metrics.increment_tasks_running();
        Ok(())
    }

    pub async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        let details_arc = self
            .get(name)
            .await
            .ok_or_else(|| RuntimeError::TaskNotFound(name.to_owned()))?;

        let (shutdown_tx, task_handle, drain_timeout) = {
            let mut details = details_arc.lock().await;
            (
                details.shutdown_tx.take(),
                details.task_handle.take(),
                details
                    .config
                    .as_ref()
                    .map_or(Duration::ZERO, |config| config.drain_timeout),
            )
        };

        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }

        if let Some(handle) = task_handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(drain_timeout + STOP_GRACE, handle)
                .await
                .is_err()
            {
                warn!("Task '{name}' did not stop in time, aborting it");
                abort.abort();
            }
        }

        let mut details = details_arc.lock().await;
        let old_status = details.info.status;
        if old_status == TaskStatus::Running {
            self.metrics.decrement_tasks_running();
        }
        if old_status != TaskStatus::Error {
            details.info.status = TaskStatus::Stopped;
            details.info.last_error = None;
        }
        info!("Task '{name}' stopped");
        Ok(())
    }

    pub async fn restart(&self, name: &str) -> Result<(), RuntimeError> {
        info!("Restarting task: {name}");
        self.stop(name).await?;
        self.start(name).await?;
        info!("Task: {name} restarted successfully.");
        Ok(())
    }

    pub async fn stop_all(&self) {
        let names: Vec<String> = self.tasks.iter().map(|entry| entry.key().clone()).collect();
        for name in names {
            if let Err(error) = self.stop(&name).await {
                error!("Failed to stop task '{name}': {error}");
            }
        }
    }

    /// Applies a configuration: new tasks start, tasks whose resolved config
    /// changed restart, removed tasks stop, untouched tasks keep running.
    pub async fn reload(&self, config: &SinkerConfig) -> ReloadReport {
        let resolved = resolve_all(config);
        for error in &resolved.cluster_errors {
            warn!("{error}");
        }

        let mut report = ReloadReport::default();
        let mut seen = HashSet::new();

        for task in resolved.tasks {
            let name = task.name.clone();
            seen.insert(name.clone());
            let task = Arc::new(task);

            let existing = self.get(&name).await;
            let changed = match &existing {
                Some(details) => {
                    let details = details.lock().await;
                    details.config.as_deref() != Some(task.as_ref())
                }
                None => true,
            };
            if !changed {
                report.unchanged.push(name);
                continue;
            }

            if existing.is_some() {
                if let Err(error) = self.stop(&name).await {
                    error!("Failed to stop task '{name}' for restart: {error}");
                }
                if let Some(details) = self.get(&name).await {
                    let mut details = details.lock().await;
                    details.info = TaskInfo::from_config(&task);
                    details.config = Some(task);
                }
            } else {
                self.register(TaskDetails {
                    info: TaskInfo::from_config(&task),
                    config: Some(task),
                    shutdown_tx: None,
                    task_handle: None,
                });
            }

            match self.start(&name).await {
                Ok(()) if existing.is_some() => report.restarted.push(name),
                Ok(()) => report.started.push(name),
                Err(error) => {
                    error!("Failed to start task '{name}': {error}");
                    report.rejected.push(name);
                }
            }
        }

        for (name, error) in resolved.rejected {
            error!("Task '{name}' is invalid: {error}");
            if !seen.insert(name.clone()) {
                continue;
            }
            if self.get(&name).await.is_some() {
                let _ = self.stop(&name).await;
                self.sources.release(&name);
            }
            self.register(TaskDetails {
                info: TaskInfo::rejected(&name, &error.to_string()),
                config: None,
                shutdown_tx: None,
                task_handle: None,
            });
            report.rejected.push(name);
        }

        let removed: Vec<String> = self
            .tasks
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|name| !seen.contains(name))
            .collect();
        for name in removed {
            if let Err(error) = self.stop(&name).await {
                error!("Failed to stop removed task '{name}': {error}");
            }
            self.tasks.remove(&name);
            self.sources.release(&name);
            report.stopped.push(name);
        }

        info!(
            "Configuration applied: {} started, {} restarted, {} stopped, {} unchanged, {} rejected",
            report.started.len(),
            report.restarted.len(),
            report.stopped.len(),
            report.unchanged.len(),
            report.rejected.len()
        );
        report
    }
}
