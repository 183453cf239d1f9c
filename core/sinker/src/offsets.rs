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

use std::collections::{BTreeSet, HashMap};

/// Offsets consumed but not yet written, across all shards of a task.
///
/// The commit position of a partition is its lowest pending offset, or one
/// past the highest offset seen when nothing is pending. It never moves
/// backwards and never passes an offset whose batch has not been written.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<i32, PartitionOffsets>,
}

#[derive(Debug)]
struct PartitionOffsets {
    pending: BTreeSet<i64>,
    next: i64,
    committed: i64,
}

impl PartitionOffsets {
    fn position(&self) -> i64 {
        self.pending.first().copied().unwrap_or(self.next)
    }
}

impl OffsetTracker {
    pub fn track(&mut self, partition: i32, offset: i64) {
        let entry = self
            .partitions
            .entry(partition)
            .or_insert_with(|| PartitionOffsets {
                pending: BTreeSet::new(),
                next: offset,
                committed: offset,
            });
        entry.pending.insert(offset);
        entry.next = entry.next.max(offset + 1);
    }

    /// Marks offsets as written and returns the partitions whose commit
    /// position advanced, with the new position.
    pub fn complete(&mut self, offsets: impl IntoIterator<Item = (i32, i64)>) -> Vec<(i32, i64)> {
        let mut touched = BTreeSet::new();
        for (partition, offset) in offsets {
            let removed = self
                .partitions
                .get_mut(&partition)
                .is_some_and(|entry| entry.pending.remove(&offset));
            if removed {
                touched.insert(partition);
            }
        }

        let mut advanced = Vec::with_capacity(touched.len());
        for partition in touched {
            if let Some(entry) = self.partitions.get_mut(&partition) {
                let position = entry.position();
                if position > entry.committed {
                    entry.committed = position;
                    advanced.push((partition, position));
                }
            }
        }
        advanced
    }

    pub fn committable(&self, partition: i32) -> Option<i64> {
        self.partitions
            .get(&partition)
            .map(|entry| entry.committed)
    }

    pub fn pending(&self, partition: i32) -> usize {
        self.partitions
            .get(&partition)
            .map_or(0, |entry| entry.pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_commit_after_every_shard_of_a_range_is_written() {
        let mut tracker = OffsetTracker::default();
        for offset in 10..14 {
            tracker.track(0, offset);
        }

        assert_eq!(tracker.complete([(0, 10), (0, 12)]), vec![(0, 11)]);
        assert_eq!(tracker.complete([(0, 13)]), vec![]);
        assert_eq!(tracker.complete([(0, 11)]), vec![(0, 14)]);
        assert_eq!(tracker.committable(0), Some(14));
        assert_eq!(tracker.pending(0), 0);
    }

    #[test]
    fn unwritten_batch_should_block_the_partition() {
        let mut tracker = OffsetTracker::default();
        for offset in 0..4 {
            tracker.track(0, offset);
        }

        assert_eq!(tracker.complete([(0, 1), (0, 3)]), vec![]);
        assert_eq!(tracker.committable(0), Some(0));
        assert_eq!(tracker.pending(0), 2);
    }

    #[test]
    fn partitions_should_advance_independently() {
        let mut tracker = OffsetTracker::default();
        tracker.track(0, 5);
        tracker.track(1, 100);
        tracker.track(1, 101);

        let mut advanced = tracker.complete([(1, 100), (0, 5)]);
        advanced.sort();

        assert_eq!(advanced, vec![(0, 6), (1, 101)]);
    }

    #[test]
    fn unknown_or_repeated_offsets_should_be_ignored() {
        let mut tracker = OffsetTracker::default();
        tracker.track(0, 0);

        assert_eq!(tracker.complete([(0, 0)]), vec![(0, 1)]);
        assert_eq!(tracker.complete([(0, 0), (7, 3)]), vec![]);
        assert_eq!(tracker.committable(7), None);
    }
}
