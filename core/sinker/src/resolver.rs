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

//! Merges `Common` defaults, the referenced `Kafka` profile and the task's own
//! overrides into one immutable [`ResolvedTaskConfig`]. Pure: safe to re-run on
//! every reload.

use crate::configs::{CommonConfig, DimConfig, KafkaConfig, SinkerConfig, TaskConfig};
use crate::error::ConfigError;
use crate::flush::RetryPolicy;
use crate::layout::DateLayouts;
use crate::registry::{ClusterLookup, ClusterRegistry};
use crate::router::ShardingPolicy;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use strum::{Display, EnumString};

const DEFAULT_CSV_DELIMITER: &str = ",";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum KafkaClientKind {
    #[default]
    #[strum(serialize = "franz")]
    Franz,
    #[strum(serialize = "sarama")]
    Sarama,
    #[strum(serialize = "kafka-go")]
    KafkaGo,
}

/// Opaque selector handed to the record parsing collaborator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ParserKind {
    #[default]
    #[strum(serialize = "fastjson")]
    FastJson,
    #[strum(serialize = "gjson")]
    GJson,
    #[strum(serialize = "csv")]
    Csv,
}

impl ParserKind {
    pub fn is_json(&self) -> bool {
        matches!(self, ParserKind::FastJson | ParserKind::GJson)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTaskConfig {
    pub name: String,
    pub cluster: Arc<KafkaConfig>,
    pub brokers: Vec<String>,
    pub kafka_client: KafkaClientKind,
    pub topic: String,
    pub consumer_group: String,
    pub earliest: bool,
    pub parser: ParserKind,
    pub csv_format: Vec<String>,
    pub delimiter: String,
    pub destination: String,
    pub table_name: String,
    pub auto_schema: bool,
    pub exclude_columns: Vec<String>,
    pub dims: Vec<DimConfig>,
    pub sharding_key: Option<String>,
    pub sharding_policy: ShardingPolicy,
    pub replicas: u32,
    pub flush_interval: Duration,
    pub buffer_size: usize,
    pub min_buffer_size: usize,
    pub msg_size_hint: usize,
    pub layouts: DateLayouts,
    pub retry: RetryPolicy,
    pub drain_timeout: Duration,
}

impl ResolvedTaskConfig {
    pub fn shard_count(&self) -> usize {
        self.replicas as usize
    }
}

/// Outcome of resolving a whole configuration document.
#[derive(Debug, Default)]
pub struct ResolvedConfig {
    pub tasks: Vec<ResolvedTaskConfig>,
    pub rejected: Vec<(String, ConfigError)>,
    pub cluster_errors: Vec<ConfigError>,
}

pub fn resolve_all(config: &SinkerConfig) -> ResolvedConfig {
    let (registry, cluster_errors) = ClusterRegistry::new(&config.kafka);
    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    for task in &config.tasks {
        *occurrences.entry(task.name.as_str()).or_default() += 1;
    }

    let mut resolved = ResolvedConfig {
        cluster_errors,
        ..Default::default()
    };
    for task in &config.tasks {
        if occurrences.get(task.name.as_str()).copied().unwrap_or(0) > 1 {
            resolved.rejected.push((
                task.name.clone(),
                ConfigError::DuplicateTask(task.name.clone()),
            ));
            continue;
        }
        match resolve(&config.common, &registry, task) {
            Ok(task) => resolved.tasks.push(task),
            Err(error) => resolved.rejected.push((task.name.clone(), error)),
        }
    }
    resolved
}

pub fn resolve(
    defaults: &CommonConfig,
    clusters: &ClusterRegistry,
    task: &TaskConfig,
) -> Result<ResolvedTaskConfig, ConfigError> {
    let name = task.name.clone();
    if name.is_empty() {
        return Err(ConfigError::MissingField {
            task: name,
            field: "Name",
        });
    }

    let cluster = match clusters.lookup(&task.kafka) {
        ClusterLookup::Found(cluster) => cluster.clone(),
        ClusterLookup::Ambiguous => {
            return Err(ConfigError::AmbiguousCluster {
                task: name,
                cluster: task.kafka.clone(),
            });
        }
        ClusterLookup::Missing => {
            return Err(ConfigError::UnknownCluster {
                task: name,
                cluster: task.kafka.clone(),
            });
        }
    };

    let kafka_client = parse_token::<KafkaClientKind>(&task.kafka_client).ok_or_else(|| {
        ConfigError::UnknownKafkaClient {
            task: name.clone(),
            client: task.kafka_client.clone(),
        }
    })?;

    let parser =
        parse_token::<ParserKind>(&task.parser).ok_or_else(|| ConfigError::UnknownParser {
            task: name.clone(),
            parser: task.parser.clone(),
        })?;
    if parser == ParserKind::Csv && task.csv_format.is_empty() {
        return Err(ConfigError::MissingField {
            task: name,
            field: "CsvFormat",
        });
    }

    let sharding_policy = ShardingPolicy::parse(&task.sharding_policy).ok_or_else(|| {
        ConfigError::UnknownShardingPolicy {
            task: name.clone(),
            policy: task.sharding_policy.clone(),
        }
    })?;
    let sharding_key = Some(task.sharding_key.trim())
        .filter(|key| !key.is_empty())
        .map(ToOwned::to_owned);
    if sharding_policy != ShardingPolicy::None && sharding_key.is_none() {
        return Err(ConfigError::MissingField {
            task: name,
            field: "ShardingKey",
        });
    }

    let task_tier = &task.overrides;
    let cluster_tier = &cluster.overrides;
    let flush_interval = pick(
        task_tier.flush_interval,
        cluster_tier.flush_interval,
        defaults.flush_interval,
    );
    let buffer_size = pick(
        task_tier.buffer_size,
        cluster_tier.buffer_size,
        defaults.buffer_size,
    );
    let min_buffer_size = pick(
        task_tier.min_buffer_size,
        cluster_tier.min_buffer_size,
        defaults.min_buffer_size,
    );
    let msg_size_hint = pick(
        task_tier.msg_size_hint,
        cluster_tier.msg_size_hint,
        defaults.msg_size_hint,
    );
    let replicas = pick(task_tier.replicas, cluster_tier.replicas, defaults.replicas);

    if flush_interval == 0 {
        return Err(invalid(&name, "FlushInterval", "must be at least 1 second"));
    }
    if buffer_size == 0 {
        return Err(invalid(&name, "BufferSize", "must be at least 1 record"));
    }
    if min_buffer_size > buffer_size {
        return Err(invalid(
            &name,
            "MinBufferSize",
            format!("{min_buffer_size} exceeds BufferSize {buffer_size}"),
        ));
    }

    let replicas = match (replicas, sharding_policy) {
        (_, ShardingPolicy::None) => 1,
        (0, policy) => {
            return Err(ConfigError::InvalidReplicas {
                task: name,
                policy: policy.to_string(),
            });
        }
        (replicas, _) => replicas,
    };

    let layouts = DateLayouts::new(
        &pick_ref(
            &task_tier.layout_date,
            &cluster_tier.layout_date,
            &defaults.layout_date,
        ),
        &pick_ref(
            &task_tier.layout_date_time,
            &cluster_tier.layout_date_time,
            &defaults.layout_date_time,
        ),
        &pick_ref(
            &task_tier.layout_date_time64,
            &cluster_tier.layout_date_time64,
            &defaults.layout_date_time64,
        ),
    )?;

    if defaults.retry_max_attempts == 0 {
        return Err(invalid(&name, "RetryMaxAttempts", "must be at least 1"));
    }
    let retry = RetryPolicy {
        max_attempts: defaults.retry_max_attempts,
        initial_backoff: parse_duration("RetryBackoff", &defaults.retry_backoff)?,
        max_backoff: parse_duration("RetryMaxBackoff", &defaults.retry_max_backoff)?,
    };
    let drain_timeout = parse_duration("DrainTimeout", &defaults.drain_timeout)?;

    if task.topic.trim().is_empty() {
        return Err(ConfigError::MissingField {
            task: name,
            field: "Topic",
        });
    }
    if task.table_name.trim().is_empty() {
        return Err(ConfigError::MissingField {
            task: name,
            field: "TableName",
        });
    }
    let brokers = cluster.broker_list();
    if brokers.is_empty() {
        return Err(ConfigError::MissingField {
            task: name,
            field: "Brokers",
        });
    }

    let delimiter = if task.delimiter.is_empty() {
        DEFAULT_CSV_DELIMITER.to_owned()
    } else {
        task.delimiter.clone()
    };
    let consumer_group = if task.consumer_group.is_empty() {
        name.clone()
    } else {
        task.consumer_group.clone()
    };

    Ok(ResolvedTaskConfig {
        name,
        brokers,
        kafka_client,
        topic: task.topic.clone(),
        consumer_group,
        earliest: task.earliest,
        parser,
        csv_format: task.csv_format.clone(),
        delimiter,
        destination: task.clickhouse.clone(),
        table_name: task.table_name.clone(),
        auto_schema: task.auto_schema,
        exclude_columns: task.exclude_columns.clone(),
        dims: task.dims.clone(),
        sharding_key,
        sharding_policy,
        replicas,
        flush_interval: Duration::from_secs(flush_interval),
        buffer_size,
        min_buffer_size,
        msg_size_hint,
        layouts,
        retry,
        drain_timeout,
        cluster,
    })
}

fn pick<T: Copy>(task: Option<T>, cluster: Option<T>, global: T) -> T {
    task.or(cluster).unwrap_or(global)
}

fn pick_ref(task: &Option<String>, cluster: &Option<String>, global: &str) -> String {
    task.as_deref()
        .or(cluster.as_deref())
        .unwrap_or(global)
        .to_owned()
}

/// Empty tokens select the variant's default.
fn parse_token<T: FromStr + Default>(token: &str) -> Option<T> {
    let token = token.trim();
    if token.is_empty() {
        return Some(T::default());
    }
    T::from_str(&token.to_lowercase()).ok()
}

fn parse_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|error| ConfigError::InvalidDuration {
        field,
        value: value.to_owned(),
        reason: error.to_string(),
    })
}

fn invalid(task: &str, field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        task: task.to_owned(),
        field,
        reason: reason.into(),
    }
}
