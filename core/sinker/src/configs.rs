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

use serde::{Deserialize, Deserializer, Serialize};
use strum::Display;

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFormat {
    #[default]
    #[strum(to_string = "json")]
    Json,
    #[strum(to_string = "yaml")]
    Yaml,
    #[strum(to_string = "toml")]
    Toml,
}

/// Root document with the `Common`, `Kafka` and `Tasks` sections.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SinkerConfig {
    pub common: CommonConfig,
    pub kafka: Vec<KafkaConfig>,
    pub tasks: Vec<TaskConfig>,
}

/// Global defaults, used whenever neither the task nor its cluster override a value.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CommonConfig {
    /// Seconds.
    pub flush_interval: u64,
    pub buffer_size: usize,
    pub min_buffer_size: usize,
    pub msg_size_hint: usize,
    pub layout_date: String,
    pub layout_date_time: String,
    pub layout_date_time64: String,
    pub log_level: String,
    pub replicas: u32,
    pub retry_max_attempts: u32,
    pub retry_backoff: String,
    pub retry_max_backoff: String,
    pub drain_timeout: String,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            flush_interval: 3,
            buffer_size: 30_000,
            min_buffer_size: 0,
            msg_size_hint: 0,
            layout_date: "2006-01-02".to_owned(),
            layout_date_time: "2006-01-02 15:04:05".to_owned(),
            layout_date_time64: "2006-01-02 15:04:05.999999999".to_owned(),
            log_level: String::new(),
            replicas: 0,
            retry_max_attempts: 5,
            retry_backoff: "500ms".to_owned(),
            retry_max_backoff: "10s".to_owned(),
            drain_timeout: "30s".to_owned(),
        }
    }
}

/// Buffering and formatting fields that a cluster or a task may override.
/// Zero, empty and null values deserialize to `None`, meaning "inherit".
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct TuningOverrides {
    #[serde(
        deserialize_with = "inherit_if_default",
        skip_serializing_if = "Option::is_none"
    )]
    pub flush_interval: Option<u64>,
    #[serde(
        deserialize_with = "inherit_if_default",
        skip_serializing_if = "Option::is_none"
    )]
    pub buffer_size: Option<usize>,
    #[serde(
        deserialize_with = "inherit_if_default",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_buffer_size: Option<usize>,
    #[serde(
        deserialize_with = "inherit_if_default",
        skip_serializing_if = "Option::is_none"
    )]
    pub msg_size_hint: Option<usize>,
    #[serde(
        deserialize_with = "inherit_if_default",
        skip_serializing_if = "Option::is_none"
    )]
    pub layout_date: Option<String>,
    #[serde(
        deserialize_with = "inherit_if_default",
        skip_serializing_if = "Option::is_none"
    )]
    pub layout_date_time: Option<String>,
    #[serde(
        deserialize_with = "inherit_if_default",
        skip_serializing_if = "Option::is_none"
    )]
    pub layout_date_time64: Option<String>,
    #[serde(
        deserialize_with = "inherit_if_default",
        skip_serializing_if = "Option::is_none"
    )]
    pub replicas: Option<u32>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct KafkaConfig {
    pub name: String,
    /// Comma separated `host:port` list.
    pub brokers: String,
    pub version: String,
    #[serde(rename = "TLS")]
    pub tls: TlsConfig,
    pub sasl: SaslConfig,
    #[serde(flatten)]
    pub overrides: TuningOverrides,
}

impl KafkaConfig {
    pub fn broker_list(&self) -> Vec<String> {
        self.brokers
            .split(',')
            .map(str::trim)
            .filter(|broker| !broker.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct TlsConfig {
    pub enable: bool,
    pub ca_cert_files: String,
    pub client_cert_file: String,
    pub client_key_file: String,
    pub insecure_skip_verify: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SaslConfig {
    pub enable: bool,
    pub mechanism: String,
    pub username: String,
    pub password: String,
    #[serde(rename = "GSSAPI")]
    pub gssapi: GssapiConfig,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct GssapiConfig {
    /// 0 = infer, 1 = user/password, 2 = keytab.
    pub auth_type: u8,
    pub key_tab_path: String,
    pub kerberos_config_path: String,
    pub service_name: String,
    pub username: String,
    pub password: String,
    pub realm: String,
    #[serde(rename = "DisablePAFXFAST")]
    pub disable_pafxfast: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct TaskConfig {
    pub name: String,
    pub kafka_client: String,
    /// Name of the `Kafka` entry this task consumes from.
    pub kafka: String,
    pub topic: String,
    pub consumer_group: String,
    pub earliest: bool,
    pub parser: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub csv_format: Vec<String>,
    pub delimiter: String,
    /// Name of the destination the batches are written to.
    pub clickhouse: String,
    pub table_name: String,
    pub auto_schema: bool,
    #[serde(deserialize_with = "null_as_empty")]
    pub exclude_columns: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub dims: Vec<DimConfig>,
    pub sharding_key: String,
    pub sharding_policy: String,
    #[serde(flatten)]
    pub overrides: TuningOverrides,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct DimConfig {
    pub name: String,
    #[serde(rename = "Type")]
    pub column_type: String,
}

fn inherit_if_default<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default + PartialEq,
{
    let value = Option::<T>::deserialize(deserializer)?;
    Ok(value.filter(|value| *value != T::default()))
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
