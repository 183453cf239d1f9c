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

use crate::configs::DimConfig;
use crate::error::WriteError;
use crate::source::Record;
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

/// A batch write against one destination table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct WriteRequest {
    pub destination: String,
    pub table: String,
    pub auto_schema: bool,
    pub exclude_columns: Vec<String>,
    pub dims: Vec<DimConfig>,
    pub shard: usize,
    pub records: Vec<Record>,
}

#[async_trait]
pub trait TableWriter: Send + Sync {
    async fn write(&self, request: &WriteRequest) -> Result<(), WriteError>;
}

/// Prints every request as one JSON line.
pub struct StdoutWriter {
    stdout: Mutex<Stdout>,
}

impl Default for StdoutWriter {
    fn default() -> Self {
        Self {
            stdout: Mutex::new(tokio::io::stdout()),
        }
    }
}

#[async_trait]
impl TableWriter for StdoutWriter {
    async fn write(&self, request: &WriteRequest) -> Result<(), WriteError> {
        let mut line = serde_json::to_vec(request)
            .map_err(|error| WriteError::Permanent(format!("Cannot encode batch: {error}")))?;
        line.push(b'\n');
        let mut stdout = self.stdout.lock().await;
        stdout
            .write_all(&line)
            .await
            .map_err(|error| WriteError::Transient(error.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|error| WriteError::Transient(error.to_string()))
    }
}
