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

//! Shard routing.
//!
//! - **hash**: xxHash64 (seed 0) over the canonical bytes of the key field,
//!   reduced modulo the replica count. Object keys are written in sorted
//!   order at every level, so the same logical value always lands on the same shard, across
//!   restarts too.
//! - **stripe,N**: the key field is read as a timestamp, bucketed into
//!   `N`-second stripes and the bucket id is reduced modulo the replica count.
//!
//! A missing or unreadable key never fails a record: it goes to shard 0 and
//! the fallback counter is bumped.

use crate::layout::DateLayouts;
use crate::resolver::ResolvedTaskConfig;
use crate::source::Record;
use prometheus_client::metrics::counter::Counter;
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use twox_hash::XxHash64;

const HASH_SEED: u64 = 0;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ShardingPolicy {
    /// Everything goes to shard 0.
    #[default]
    None,
    Hash,
    Stripe {
        seconds: u64,
    },
}

impl ShardingPolicy {
    /// `""`, `hash` or `stripe,<positive seconds>`; `None` for anything else.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Some(ShardingPolicy::None);
        }
        if token.eq_ignore_ascii_case("hash") {
            return Some(ShardingPolicy::Hash);
        }
        let (name, seconds) = token.split_once(',')?;
        if !name.trim().eq_ignore_ascii_case("stripe") {
            return None;
        }
        let seconds = seconds
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|seconds| *seconds > 0)?;
        Some(ShardingPolicy::Stripe { seconds })
    }
}

impl Display for ShardingPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ShardingPolicy::None => write!(f, "none"),
            ShardingPolicy::Hash => write!(f, "hash"),
            ShardingPolicy::Stripe { seconds } => write!(f, "stripe,{seconds}"),
        }
    }
}

/// Index of a shard, always below the task's replica count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardKey(usize);

impl ShardKey {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl From<usize> for ShardKey {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl Display for ShardKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub struct ShardRouter {
    policy: ShardingPolicy,
    key: Option<String>,
    replicas: u64,
    layouts: DateLayouts,
    fallbacks: AtomicU64,
    fallback_counter: Option<Counter>,
}

impl ShardRouter {
    pub fn new(config: &ResolvedTaskConfig) -> Self {
        Self {
            policy: config.sharding_policy,
            key: config.sharding_key.clone(),
            replicas: u64::from(config.replicas.max(1)),
            layouts: config.layouts.clone(),
            fallbacks: AtomicU64::new(0),
            fallback_counter: None,
        }
    }

    /// Also report fallbacks to an exported counter.
    pub fn with_fallback_counter(mut self, counter: Counter) -> Self {
        self.fallback_counter = Some(counter);
        self
    }

    pub fn shard_count(&self) -> usize {
        self.replicas as usize
    }

    pub fn fallbacks(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    pub fn route(&self, record: &Record) -> ShardKey {
        let shard = match self.policy {
            ShardingPolicy::None => Some(0),
            ShardingPolicy::Hash => self.key_field(record).and_then(|field| self.hash(field)),
            ShardingPolicy::Stripe { seconds } => self
                .key_field(record)
                .and_then(|field| self.stripe(field, seconds)),
        };
        match shard {
            Some(shard) => ShardKey(shard),
            None => self.fallback(record),
        }
    }

    fn key_field<'a>(&self, record: &'a Record) -> Option<&'a Value> {
        self.key
            .as_deref()
            .and_then(|path| lookup(&record.body, path))
    }

    fn hash(&self, field: &Value) -> Option<usize> {
        let hash = match field {
            Value::Null => return None,
            Value::String(value) => XxHash64::oneshot(HASH_SEED, value.as_bytes()),
            other => {
                let mut bytes = Vec::new();
                write_canonical(other, &mut bytes).ok()?;
                XxHash64::oneshot(HASH_SEED, &bytes)
            }
        };
        Some((hash % self.replicas) as usize)
    }

    fn stripe(&self, field: &Value, seconds: u64) -> Option<usize> {
        let timestamp = match field {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|value| value.floor() as i64))?,
            Value::String(value) => match self.layouts.parse(value) {
                Some(parsed) => parsed.timestamp(),
                None => value.trim().parse::<i64>().ok()?,
            },
            _ => return None,
        };
        let bucket = timestamp.div_euclid(seconds as i64);
        Some(bucket.rem_euclid(self.replicas as i64) as usize)
    }

    fn fallback(&self, record: &Record) -> ShardKey {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        if let Some(counter) = &self.fallback_counter {
            counter.inc();
        }
        debug!(
            "Sharding key {:?} missing or unreadable at partition {} offset {}, routing to shard 0",
            self.key, record.partition, record.offset
        );
        ShardKey(0)
    }
}

/// The whole path as a literal key first (`@time`, `a.b` as one key), then as
/// dot separated segments, numeric segments indexing arrays.
fn lookup<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(value) = body.get(path) {
        return Some(value);
    }
    let mut current = body;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Compact JSON with object keys sorted at every level, independent of the
/// map ordering `serde_json` was built with.
fn write_canonical(value: &Value, out: &mut Vec<u8>) -> serde_json::Result<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_unstable_by(|left, right| left.0.cmp(right.0));
            out.push(b'{');
            for (index, (key, item)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(item, out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    fn router(policy: &str, key: &str, replicas: u32) -> ShardRouter {
        ShardRouter {
            policy: ShardingPolicy::parse(policy).unwrap(),
            key: Some(key.to_owned()),
            replicas: u64::from(replicas),
            layouts: DateLayouts::new("2006-01-02", "2006-01-02 15:04:05", "2006-01-02 15:04:05.000")
                .unwrap(),
            fallbacks: AtomicU64::new(0),
            fallback_counter: None,
        }
    }

    fn record(body: Value) -> Record {
        Record::new(0, 0, body)
    }

    #[test_case("", Some(ShardingPolicy::None); "empty")]
    #[test_case("hash", Some(ShardingPolicy::Hash); "hash")]
    #[test_case("HASH", Some(ShardingPolicy::Hash); "upper hash")]
    #[test_case("stripe,60", Some(ShardingPolicy::Stripe { seconds: 60 }); "stripe")]
    #[test_case(" stripe , 3600 ", Some(ShardingPolicy::Stripe { seconds: 3600 }); "padded stripe")]
    #[test_case("stripe", None; "stripe without width")]
    #[test_case("stripe,0", None; "zero width")]
    #[test_case("stripe,-5", None; "negative width")]
    #[test_case("stripe,1m", None; "duration width")]
    #[test_case("range", None; "unknown")]
    fn should_parse_policy(token: &str, expected: Option<ShardingPolicy>) {
        assert_eq!(ShardingPolicy::parse(token), expected);
    }

    #[test]
    fn hash_should_be_stable_and_in_range() {
        let router = router("hash", "request", 3);
        for key in ["GET /", "POST /login", "PUT /x", "DELETE /y", "HEAD /"] {
            let first = router.route(&record(json!({ "request": key })));
            let second = router.route(&record(json!({ "request": key, "other": 1 })));
            assert_eq!(first, second);
            assert!(first.index() < 3);
        }
        assert_eq!(router.fallbacks(), 0);
    }

    #[test]
    fn hash_should_match_known_xxhash64_value() {
        let router = router("hash", "id", 1_000_000_007);
        let shard = router.route(&record(json!({ "id": "" })));
        assert_eq!(shard.index() as u64, 0xEF46_DB37_51D8_E999 % 1_000_000_007);
    }

    #[test]
    fn hash_should_ignore_object_key_order() {
        let router = router("hash", "user", 16);
        let first: Value = serde_json::from_str(r#"{"user":{"id":7,"name":"x"}}"#).unwrap();
        let second: Value = serde_json::from_str(r#"{"user":{"name":"x","id":7}}"#).unwrap();

        assert_eq!(router.route(&record(first)), router.route(&record(second)));
    }

    #[test]
    fn canonical_bytes_should_sort_keys_regardless_of_insertion_order() {
        let mut inner = serde_json::Map::new();
        inner.insert("name".to_owned(), json!("x"));
        inner.insert("id".to_owned(), json!(7));
        let value = json!({ "tags": [{ "b": 1, "a": null }], "user": Value::Object(inner) });

        let mut bytes = Vec::new();
        write_canonical(&value, &mut bytes).unwrap();

        let expected = br#"{"tags":[{"a":null,"b":1}],"user":{"id":7,"name":"x"}}"#;
        assert_eq!(bytes, expected.to_vec());
        let router = router("hash", "payload", 1_000_000_007);
        let shard = router.route(&record(json!({ "payload": value })));
        assert_eq!(
            shard.index() as u64,
            XxHash64::oneshot(HASH_SEED, expected) % 1_000_000_007
        );
    }

    #[test]
    fn stripe_should_keep_same_bucket_within_width() {
        let router = router("stripe,60", "@time", 1_000);
        let t = 1_709_287_200;

        let base = router.route(&record(json!({ "@time": t })));
        let inside = router.route(&record(json!({ "@time": t + 59 })));
        let next = router.route(&record(json!({ "@time": t + 60 })));

        assert_eq!(base, inside);
        assert_eq!(next.index(), (base.index() + 1) % 1_000);
    }

    #[test]
    fn stripe_should_read_timestamps_with_layouts() {
        let router = router("stripe,60", "@time", 2);

        let first = router.route(&record(json!({ "@time": "2024-03-01 10:00:00" })));
        let second = router.route(&record(json!({ "@time": "2024-03-01 10:00:10" })));
        let next = router.route(&record(json!({ "@time": "2024-03-01 10:01:00" })));

        assert_eq!(first, second);
        assert_ne!(first, next);
        assert_eq!(router.fallbacks(), 0);
    }

    #[test]
    fn stripe_should_handle_timestamps_before_epoch() {
        let router = router("stripe,60", "ts", 3);
        assert_eq!(router.route(&record(json!({ "ts": -1 }))).index(), 2);
        assert_eq!(router.route(&record(json!({ "ts": -60 }))).index(), 2);
        assert_eq!(router.route(&record(json!({ "ts": -61 }))).index(), 1);
    }

    #[test]
    fn missing_or_unparsable_key_should_fall_back_to_shard_zero() {
        let counter = Counter::default();
        let router = router("stripe,60", "ts", 4).with_fallback_counter(counter.clone());

        assert_eq!(router.route(&record(json!({ "other": 1 }))).index(), 0);
        assert_eq!(router.route(&record(json!({ "ts": "yesterday" }))).index(), 0);
        assert_eq!(router.route(&record(json!({ "ts": [1, 2] }))).index(), 0);
        assert_eq!(router.route(&record(json!("scalar body"))).index(), 0);

        assert_eq!(router.fallbacks(), 4);
        assert_eq!(counter.get(), 4);
    }

    #[test]
    fn null_hash_key_should_fall_back() {
        let router = router("hash", "id", 4);
        assert_eq!(router.route(&record(json!({ "id": null }))).index(), 0);
        assert_eq!(router.fallbacks(), 1);
    }

    #[test]
    fn should_resolve_nested_paths_and_array_indices() {
        let body = json!({
            "a.b": "literal",
            "a": { "b": "nested", "list": [{ "id": 3 }] }
        });

        assert_eq!(lookup(&body, "a.b"), Some(&json!("literal")));
        assert_eq!(lookup(&body, "a.list.0.id"), Some(&json!(3)));
        assert_eq!(lookup(&body, "a.list.1.id"), None);
        assert_eq!(lookup(&body, "a.b.c"), None);
    }

    #[test]
    fn no_policy_should_route_everything_to_shard_zero() {
        let router = router("", "ignored", 1);
        assert_eq!(router.route(&record(json!({ "x": 1 }))).index(), 0);
        assert_eq!(router.fallbacks(), 0);
    }
}
