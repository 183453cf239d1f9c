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

use crate::configs::KafkaConfig;
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

/// Named broker connection profiles. Built once per configuration load.
#[derive(Debug, Default, Clone)]
pub struct ClusterRegistry {
    clusters: HashMap<String, Arc<KafkaConfig>>,
    duplicates: HashSet<String>,
}

pub enum ClusterLookup<'a> {
    Found(&'a Arc<KafkaConfig>),
    Ambiguous,
    Missing,
}

impl ClusterRegistry {
    pub fn new(profiles: &[KafkaConfig]) -> (Self, Vec<ConfigError>) {
        let mut registry = Self::default();
        let mut errors = Vec::new();
        for profile in profiles {
            if registry.duplicates.contains(&profile.name) {
                continue;
            }
            if registry.clusters.remove(&profile.name).is_some() {
                warn!("Kafka cluster '{}' is declared more than once", profile.name);
                registry.duplicates.insert(profile.name.clone());
                errors.push(ConfigError::DuplicateCluster(profile.name.clone()));
                continue;
            }
            registry
                .clusters
                .insert(profile.name.clone(), Arc::new(profile.clone()));
        }
        (registry, errors)
    }

    pub fn lookup(&self, name: &str) -> ClusterLookup<'_> {
        if self.duplicates.contains(name) {
            return ClusterLookup::Ambiguous;
        }
        match self.clusters.get(name) {
            Some(profile) => ClusterLookup::Found(profile),
            None => ClusterLookup::Missing,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<KafkaConfig>> {
        match self.lookup(name) {
            ClusterLookup::Found(profile) => Some(profile),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(name: &str, brokers: &str) -> KafkaConfig {
        KafkaConfig {
            name: name.to_owned(),
            brokers: brokers.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn should_register_unique_clusters() {
        let (registry, errors) =
            ClusterRegistry::new(&[cluster("kfk1", "a:9092"), cluster("kfk2", "b:9092")]);

        assert!(errors.is_empty());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("kfk2").unwrap().brokers, "b:9092");
        assert!(registry.get("kfk3").is_none());
    }

    #[test]
    fn should_mark_duplicated_names_as_ambiguous() {
        let (registry, errors) = ClusterRegistry::new(&[
            cluster("kfk1", "a:9092"),
            cluster("kfk1", "b:9092"),
            cluster("kfk1", "c:9092"),
            cluster("kfk2", "d:9092"),
        ]);

        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ConfigError::DuplicateCluster(name) if name == "kfk1"));
        assert!(matches!(registry.lookup("kfk1"), ClusterLookup::Ambiguous));
        assert!(matches!(registry.lookup("kfk2"), ClusterLookup::Found(_)));
        assert!(matches!(registry.lookup("nope"), ClusterLookup::Missing));
    }
}
