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

use thiserror::Error;

/// Load-time configuration failures. Fatal for the offending task only.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yml::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),
    #[error("Duplicate Kafka cluster name: {0}")]
    DuplicateCluster(String),
    #[error("Duplicate task name: {0}")]
    DuplicateTask(String),
    #[error("Task '{task}' references unknown Kafka cluster '{cluster}'")]
    UnknownCluster { task: String, cluster: String },
    #[error("Task '{task}' references ambiguous Kafka cluster '{cluster}' (declared more than once)")]
    AmbiguousCluster { task: String, cluster: String },
    #[error("Task '{task}' has unknown sharding policy '{policy}'")]
    UnknownShardingPolicy { task: String, policy: String },
    #[error("Task '{task}' has unknown parser '{parser}'")]
    UnknownParser { task: String, parser: String },
    #[error("Task '{task}' has unknown Kafka client '{client}'")]
    UnknownKafkaClient { task: String, client: String },
    #[error("Task '{task}' declares sharding policy '{policy}' but resolves to 0 replicas")]
    InvalidReplicas { task: String, policy: String },
    #[error("Task '{task}' has invalid value for {field}: {reason}")]
    InvalidValue {
        task: String,
        field: &'static str,
        reason: String,
    },
    #[error("Task '{task}' is missing required field {field}")]
    MissingField { task: String, field: &'static str },
    #[error("Unsupported token '{token}' in time layout '{layout}'")]
    UnsupportedLayout { layout: String, token: String },
    #[error("Invalid duration '{value}' for {field}: {reason}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// Inconsistent credential profile. Fatal for the startup of every task
/// bound to the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Cluster '{cluster}' enables SASL without a mechanism")]
    MissingMechanism { cluster: String },
    #[error("Cluster '{cluster}' uses unknown SASL mechanism '{mechanism}'")]
    UnknownMechanism { cluster: String, mechanism: String },
    #[error("Cluster '{cluster}' uses {mechanism} without {missing}")]
    MissingCredentials {
        cluster: String,
        mechanism: &'static str,
        missing: &'static str,
    },
    #[error("Cluster '{cluster}' uses unknown GSSAPI auth type {auth_type}")]
    UnknownGssapiAuthType { cluster: String, auth_type: u8 },
    #[error("Cluster '{cluster}' has malformed path in {field}: '{path}'")]
    MalformedPath {
        cluster: String,
        field: &'static str,
        path: String,
    },
    #[error("Cluster '{cluster}' sets only one of TLS client certificate and key")]
    IncompleteClientCertificate { cluster: String },
}

/// Failure reported by the destination write collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("Transient write failure: {0}")]
    Transient(String),
    #[error("Permanent write failure: {0}")]
    Permanent(String),
}

impl WriteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, WriteError::Transient(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlushError {
    #[error("Flush of {records} records to '{table}' (shard {shard}) failed after {attempts} attempts: {source}")]
    Exhausted {
        table: String,
        shard: usize,
        records: usize,
        attempts: u32,
        source: WriteError,
    },
    #[error("Flush of {records} records to '{table}' (shard {shard}) rejected: {source}")]
    Rejected {
        table: String,
        shard: usize,
        records: usize,
        source: WriteError,
    },
    #[error("Task '{task}' did not drain in-flight flushes within {timeout_ms} ms")]
    DrainTimeout { task: String, timeout_ms: u128 },
    #[error("Flush lane for shard {0} is closed")]
    LaneClosed(usize),
}

/// Failure reported by the record source collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SourceError(pub String);

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Flush(#[from] FlushError),
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
    #[error("Task not found: {0}")]
    TaskNotFound(String),
    #[error("Task '{0}' is not runnable: {1}")]
    TaskNotRunnable(String, String),
    #[error("{0} task(s) failed validation")]
    InvalidTasks(usize),
    #[error("{0} task(s) ended with an error")]
    TasksFailed(usize),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
