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

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tracing::error;

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TaskLabels {
    pub task: String,
}

#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    records_consumed: Family<TaskLabels, Counter>,
    routing_fallbacks: Family<TaskLabels, Counter>,
    batches_flushed: Family<TaskLabels, Counter>,
    records_flushed: Family<TaskLabels, Counter>,
    flush_retries: Family<TaskLabels, Counter>,
    flush_failures: Family<TaskLabels, Counter>,
    offsets_committed: Family<TaskLabels, Counter>,
    running_tasks: Gauge,
}

/// Handles bound to one task's label set.
#[derive(Debug, Clone, Default)]
pub struct TaskMetrics {
    pub records_consumed: Counter,
    pub routing_fallbacks: Counter,
    pub batches_flushed: Counter,
    pub records_flushed: Counter,
    pub flush_retries: Counter,
    pub flush_failures: Counter,
    pub offsets_committed: Counter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::init()
    }
}

impl Metrics {
    pub fn init() -> Self {
        let mut registry = Registry::with_prefix("sinker");
        let records_consumed = Family::<TaskLabels, Counter>::default();
        let routing_fallbacks = Family::<TaskLabels, Counter>::default();
        let batches_flushed = Family::<TaskLabels, Counter>::default();
        let records_flushed = Family::<TaskLabels, Counter>::default();
        let flush_retries = Family::<TaskLabels, Counter>::default();
        let flush_failures = Family::<TaskLabels, Counter>::default();
        let offsets_committed = Family::<TaskLabels, Counter>::default();
        let running_tasks = Gauge::default();

        registry.register(
            "records_consumed",
            "Records read from the source",
            records_consumed.clone(),
        );
        registry.register(
            "routing_fallbacks",
            "Records routed to shard 0 because the sharding key was missing or unreadable",
            routing_fallbacks.clone(),
        );
        registry.register(
            "batches_flushed",
            "Batches written to the destination",
            batches_flushed.clone(),
        );
        registry.register(
            "records_flushed",
            "Records written to the destination",
            records_flushed.clone(),
        );
        registry.register(
            "flush_retries",
            "Write attempts retried after a transient failure",
            flush_retries.clone(),
        );
        registry.register(
            "flush_failures",
            "Batches that failed permanently or exhausted their retries",
            flush_failures.clone(),
        );
        registry.register(
            "offsets_committed",
            "Offset commits handed to the source",
            offsets_committed.clone(),
        );
        registry.register(
            "running_tasks",
            "Tasks currently running",
            running_tasks.clone(),
        );

        Self {
            registry: Arc::new(registry),
            records_consumed,
            routing_fallbacks,
            batches_flushed,
            records_flushed,
            flush_retries,
            flush_failures,
            offsets_committed,
            running_tasks,
        }
    }

    pub fn for_task(&self, task: &str) -> TaskMetrics {
        let labels = TaskLabels {
            task: task.to_owned(),
        };
        let get = |family: &Family<TaskLabels, Counter>| family.get_or_create(&labels).clone();
        TaskMetrics {
            records_consumed: get(&self.records_consumed),
            routing_fallbacks: get(&self.routing_fallbacks),
            batches_flushed: get(&self.batches_flushed),
            records_flushed: get(&self.records_flushed),
            flush_retries: get(&self.flush_retries),
            flush_failures: get(&self.flush_failures),
            offsets_committed: get(&self.offsets_committed),
        }
    }

    pub fn increment_tasks_running(&self) {
        self.running_tasks.inc();
    }

    pub fn decrement_tasks_running(&self) {
        self.running_tasks.dec();
    }

    pub fn get_tasks_running(&self) -> i64 {
        self.running_tasks.get()
    }

    /// OpenMetrics text exposition of every registered metric.
    pub fn render(&self) -> String {
        let mut buffer = String::new();
        if let Err(err) = encode(&mut buffer, &self.registry) {
            error!("Failed to encode metrics: {err}");
        }
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_share_counters_per_task_label() {
        let metrics = Metrics::init();
        let first = metrics.for_task("logs");
        let second = metrics.for_task("logs");
        let other = metrics.for_task("events");

        first.records_consumed.inc();
        second.records_consumed.inc_by(2);
        other.routing_fallbacks.inc();

        assert_eq!(metrics.for_task("logs").records_consumed.get(), 3);
        assert_eq!(metrics.for_task("events").records_consumed.get(), 0);
        assert_eq!(metrics.for_task("events").routing_fallbacks.get(), 1);
    }

    #[test]
    fn should_render_registered_metrics() {
        let metrics = Metrics::init();
        metrics.for_task("logs").batches_flushed.inc();
        metrics.increment_tasks_running();

        let rendered = metrics.render();

        assert!(rendered.contains("sinker_batches_flushed_total{task=\"logs\"} 1"));
        assert!(rendered.contains("sinker_running_tasks 1"));
        assert_eq!(metrics.get_tasks_running(), 1);
    }
}
