use std::time::Instant;

use log::debug;

use crate::core::config::EngineConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::SeqId;
use crate::posting::block_list::PostingIterator;
use crate::posting::handle::{ExpandedLists, PostingHandle};
use crate::posting::intersect::{block_intersect, ResultIterState};

/// Multi-way posting-set intersection with a block-parallel split.
///
/// The list with the fewest blocks drives partitioning: its chain is walked
/// in windows, and for every window each other list contributes the block
/// range bracketing the window's first and last ids. Window edge blocks may
/// overlap between neighboring partitions; the intersect predicate only
/// emits ids all iterators agree on, so overlaps cannot duplicate output.
pub struct BlockIntersector {
    pool: rayon::ThreadPool,
    concurrency: usize,
    parallelize_min_ids: usize,
}

struct Partition {
    start_slot: usize,
    end_slot: Option<usize>,
    first_id: SeqId,
    last_id: SeqId,
}

impl BlockIntersector {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let concurrency = config.concurrency.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .build()
            .map_err(|e| Error::new(ErrorKind::Internal, e.to_string()))?;

        Ok(BlockIntersector {
            pool,
            concurrency,
            parallelize_min_ids: config.parallelize_min_ids,
        })
    }

    /// Intersect the given posting sets, returning one result bucket per
    /// partition. Concatenating the buckets in partition order yields the
    /// full intersection in ascending seq_id order.
    pub fn intersect_buckets(
        &self,
        handles: &[&PostingHandle],
        state: ResultIterState,
        deadline: Option<Instant>,
    ) -> Vec<Vec<SeqId>> {
        if handles.is_empty() {
            return Vec::new();
        }

        let expanded = ExpandedLists::new(handles);
        let mut lists = expanded.lists();
        // the smallest list drives partitioning
        lists.sort_by_key(|list| list.num_blocks());

        let driving = lists[0];
        if driving.num_blocks() == 0 {
            return vec![Vec::new()];
        }

        if (driving.num_ids() as usize) < self.parallelize_min_ids {
            let mut its: Vec<PostingIterator> = lists.iter().map(|list| list.iter()).collect();
            let mut bucket = Vec::new();
            block_intersect(&mut its, &state, deadline, &mut |id, _| bucket.push(id));
            return vec![bucket];
        }

        // walk the driving chain in windows of ceil(blocks / concurrency)
        let num_blocks = driving.num_blocks();
        let window_size = num_blocks.div_ceil(self.concurrency);

        let mut partitions = Vec::with_capacity(self.concurrency);
        let mut blocks_traversed = 0usize;
        let mut window_start = driving.root_slot();
        let mut curr = Some(driving.root_slot());

        while let Some(slot) = curr {
            blocks_traversed += 1;
            let next = driving.next_of(slot);

            if blocks_traversed % window_size == 0 || blocks_traversed == num_blocks {
                partitions.push(Partition {
                    start_slot: window_start,
                    end_slot: next,
                    first_id: driving.block_ids(window_start).first().unwrap(),
                    last_id: driving.block_ids(slot).last().unwrap(),
                });

                match next {
                    Some(next_slot) => window_start = next_slot,
                    None => break,
                }
            }

            curr = next;
        }

        debug!(
            "parallel intersect over {} lists, {} driving blocks, {} partitions",
            lists.len(),
            num_blocks,
            partitions.len()
        );

        // each worker fills a private bucket and reports completion over a
        // channel; waiting for the scope is the barrier
        let (sender, receiver) = crossbeam::channel::unbounded();
        let lists = &lists;

        self.pool.scope(|scope| {
            for (partition_index, partition) in partitions.iter().enumerate() {
                let sender = sender.clone();

                scope.spawn(move |_| {
                    let mut its = Vec::with_capacity(lists.len());

                    for (i, list) in lists.iter().enumerate() {
                        if i == 0 {
                            its.push(
                                list.iter_range(Some(partition.start_slot), partition.end_slot),
                            );
                            continue;
                        }

                        let p_start = list.block_of(partition.first_id);
                        let p_last = list.block_of(partition.last_id);
                        let p_end = if p_start == p_last && p_start.is_some() {
                            // the window collapses to one block here; still
                            // cover at least that block
                            list.next_of(p_start.unwrap())
                        } else {
                            p_last.and_then(|slot| list.next_of(slot))
                        };

                        its.push(list.iter_range(p_start, p_end));
                    }

                    let mut partition_state = state;
                    partition_state.index = partition_index;

                    let mut bucket = Vec::new();
                    block_intersect(&mut its, &partition_state, deadline, &mut |id, _| {
                        bucket.push(id)
                    });

                    let _ = sender.send((partition_index, bucket));
                });
            }
        });
        drop(sender);

        let mut buckets: Vec<Vec<SeqId>> = vec![Vec::new(); partitions.len()];
        for (partition_index, bucket) in receiver {
            buckets[partition_index] = bucket;
        }

        buckets
    }

    /// Intersect the given posting sets into one ascending id vector.
    pub fn intersect(
        &self,
        handles: &[&PostingHandle],
        state: ResultIterState,
        deadline: Option<Instant>,
    ) -> Vec<SeqId> {
        let buckets = self.intersect_buckets(handles, state, deadline);
        let mut result = Vec::with_capacity(buckets.iter().map(Vec::len).sum());
        for bucket in buckets {
            result.extend(bucket);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(concurrency: usize, parallelize_min_ids: usize) -> EngineConfig {
        EngineConfig {
            concurrency,
            parallelize_min_ids,
            ..EngineConfig::default()
        }
    }

    fn handle_of(ids: impl IntoIterator<Item = SeqId>) -> PostingHandle {
        let mut handle = PostingHandle::create(&[]);
        for id in ids {
            handle.upsert(id);
        }
        handle
    }

    #[test]
    fn test_parallel_matches_sequential() {
        // P7: parallel and sequential intersect agree for any concurrency
        let a = handle_of(0..1000);
        let b = handle_of((0..1000).step_by(2));
        let expected: Vec<SeqId> = (0..1000).step_by(2).collect();

        let sequential = BlockIntersector::new(&config(1, usize::MAX)).unwrap();
        assert_eq!(
            sequential.intersect(&[&a, &b], ResultIterState::default(), None),
            expected
        );

        let parallel = BlockIntersector::new(&config(4, 1)).unwrap();
        assert_eq!(
            parallel.intersect(&[&a, &b], ResultIterState::default(), None),
            expected
        );
    }

    #[test]
    fn test_buckets_concatenate_in_order() {
        let a = handle_of(0..4000);
        let b = handle_of((0..4000).step_by(3));

        let intersector = BlockIntersector::new(&config(4, 1)).unwrap();
        let buckets = intersector.intersect_buckets(&[&a, &b], ResultIterState::default(), None);

        assert!(buckets.len() > 1);
        let flat: Vec<SeqId> = buckets.into_iter().flatten().collect();
        assert_eq!(flat, (0..4000).step_by(3).collect::<Vec<_>>());
    }

    #[test]
    fn test_three_way_parallel() {
        let a = handle_of(0..3000);
        let b = handle_of((0..3000).step_by(2));
        let c = handle_of((0..3000).step_by(5));

        let intersector = BlockIntersector::new(&config(3, 1)).unwrap();
        let result = intersector.intersect(&[&a, &b, &c], ResultIterState::default(), None);
        assert_eq!(result, (0..3000).step_by(10).collect::<Vec<_>>());
    }

    #[test]
    fn test_compact_handles_are_expanded() {
        let small = handle_of([10, 500, 900]);
        let big = handle_of(0..1000);

        let intersector = BlockIntersector::new(&config(4, 1)).unwrap();
        let result = intersector.intersect(&[&small, &big], ResultIterState::default(), None);
        assert_eq!(result, vec![10, 500, 900]);
    }

    #[test]
    fn test_small_input_stays_sequential() {
        let a = handle_of(0..10);
        let b = handle_of(0..10);

        let intersector = BlockIntersector::new(&config(4, 1000)).unwrap();
        let buckets = intersector.intersect_buckets(&[&a, &b], ResultIterState::default(), None);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0], (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_state_filters_apply_in_parallel() {
        let a = handle_of(0..2000);
        let b = handle_of(0..2000);
        let excluded: Vec<SeqId> = (0..2000).step_by(7).collect();

        let intersector = BlockIntersector::new(&config(4, 1)).unwrap();
        let state = ResultIterState::new(&excluded, &[]);
        let result = intersector.intersect(&[&a, &b], state, None);

        let expected: Vec<SeqId> = (0..2000).filter(|id| id % 7 != 0).collect();
        assert_eq!(result, expected);
    }

    #[test]
    fn test_empty_input() {
        let intersector = BlockIntersector::new(&config(2, 1)).unwrap();
        assert!(intersector
            .intersect(&[], ResultIterState::default(), None)
            .is_empty());
    }
}
