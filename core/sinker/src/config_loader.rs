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

use crate::configs::{ConfigFormat, SinkerConfig};
use crate::error::ConfigError;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SinkerConfig, ConfigError> {
    let path = path.as_ref();
    info!("Loading sinker configuration from: {}", path.display());
    let content = fs::read_to_string(path)?;

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    match format_from_extension(extension) {
        Some(format) => load_from_str(&content, format),
        None => {
            debug!("Unknown config extension '{extension}', detecting format from content");
            if let Ok(config) = load_from_json(&content) {
                return Ok(config);
            }
            if let Ok(config) = load_from_toml(&content) {
                return Ok(config);
            }
            if let Ok(config) = load_from_yaml(&content) {
                return Ok(config);
            }
            Err(ConfigError::UnsupportedFormat(extension.to_string()))
        }
    }
}

pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<SinkerConfig, ConfigError> {
    match format {
        ConfigFormat::Json => load_from_json(content),
        ConfigFormat::Yaml => load_from_yaml(content),
        ConfigFormat::Toml => load_from_toml(content),
    }
}

fn format_from_extension(extension: &str) -> Option<ConfigFormat> {
    match extension.to_lowercase().as_str() {
        "json" => Some(ConfigFormat::Json),
        "yaml" | "yml" => Some(ConfigFormat::Yaml),
        "toml" => Some(ConfigFormat::Toml),
        _ => None,
    }
}

fn load_from_json(content: &str) -> Result<SinkerConfig, ConfigError> {
    Ok(serde_json::from_str(content)?)
}

fn load_from_yaml(content: &str) -> Result<SinkerConfig, ConfigError> {
    Ok(serde_yml::from_str(content)?)
}

fn load_from_toml(content: &str) -> Result<SinkerConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}
