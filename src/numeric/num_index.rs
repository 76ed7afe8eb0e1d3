use std::collections::BTreeMap;
use std::ops::Bound;

use serde::{Serialize, Deserialize};

use crate::core::types::SeqId;
use crate::posting::block_list::{BlockPostingList, PostingIterator};
use crate::posting::handle::PostingHandle;

/// Comparators accepted by the numeric search entry points. Inequality is
/// not here: the filter layer expresses it as universe-minus-equals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumComparator {
    Equals,
    GreaterThan,
    GreaterThanEquals,
    LessThan,
    LessThanEquals,
}

/// Ordered map from integer value to the posting set of seq_ids holding that
/// value. Equality is a single lookup; range scans lean on the map's ordered
/// lower-bound capability.
#[derive(Debug, Default)]
pub struct NumericIndex {
    map: BTreeMap<i64, PostingHandle>,
}

impl NumericIndex {
    pub fn new() -> Self {
        NumericIndex::default()
    }

    pub fn size(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Idempotent insert of (value, id).
    pub fn insert(&mut self, value: i64, id: SeqId) {
        match self.map.get_mut(&value) {
            Some(handle) => {
                if !handle.contains(id) {
                    handle.upsert(id);
                }
            }
            None => {
                self.map.insert(value, PostingHandle::create(&[id]));
            }
        }
    }

    /// Remove id from the value's posting set; the map entry goes away once
    /// it holds no ids.
    pub fn remove(&mut self, value: i64, id: SeqId) {
        if let Some(handle) = self.map.get_mut(&value) {
            handle.erase(id);
            if handle.num_ids() == 0 {
                self.map.remove(&value);
            }
        }
    }

    pub fn get(&self, value: i64) -> Option<&PostingHandle> {
        self.map.get(&value)
    }

    pub fn contains(&self, value: i64, id: SeqId) -> bool {
        self.map.get(&value).is_some_and(|handle| handle.contains(id))
    }

    fn range_bounds(comparator: NumComparator, value: i64) -> (Bound<i64>, Bound<i64>) {
        match comparator {
            NumComparator::Equals => (Bound::Included(value), Bound::Included(value)),
            NumComparator::GreaterThan => (Bound::Excluded(value), Bound::Unbounded),
            NumComparator::GreaterThanEquals => (Bound::Included(value), Bound::Unbounded),
            NumComparator::LessThan => (Bound::Unbounded, Bound::Excluded(value)),
            NumComparator::LessThanEquals => (Bound::Unbounded, Bound::Included(value)),
        }
    }

    /// Handles whose value satisfies `comparator value`, ascending by value.
    pub fn handles_for(&self, comparator: NumComparator, value: i64) -> Vec<&PostingHandle> {
        self.map
            .range(Self::range_bounds(comparator, value))
            .map(|(_, handle)| handle)
            .collect()
    }

    /// Handles whose value lies in [lo, hi], ascending by value.
    pub fn handles_in_range_inclusive(&self, lo: i64, hi: i64) -> Vec<&PostingHandle> {
        if lo > hi {
            return Vec::new();
        }
        self.map.range(lo..=hi).map(|(_, handle)| handle).collect()
    }

    fn consolidate(handles: &[&PostingHandle]) -> Vec<SeqId> {
        let mut ids = Vec::new();
        for handle in handles {
            handle.uncompress_into(&mut ids);
        }
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Union of the posting sets satisfying `comparator value`, ascending.
    pub fn search(&self, comparator: NumComparator, value: i64) -> Vec<SeqId> {
        Self::consolidate(&self.handles_for(comparator, value))
    }

    /// Union of the posting sets with value in [lo, hi], ascending.
    pub fn range_inclusive_search(&self, lo: i64, hi: i64) -> Vec<SeqId> {
        Self::consolidate(&self.handles_in_range_inclusive(lo, hi))
    }

    /// Upper bound of `search(comparator, value).len()`: sums posting sizes
    /// without decompressing anything.
    pub fn approx_search_count(&self, comparator: NumComparator, value: i64) -> u32 {
        self.handles_for(comparator, value)
            .iter()
            .map(|handle| handle.num_ids())
            .sum()
    }

    /// Upper bound of `range_inclusive_search(lo, hi).len()`.
    pub fn approx_range_inclusive_search_count(&self, lo: i64, hi: i64) -> u32 {
        self.handles_in_range_inclusive(lo, hi)
            .iter()
            .map(|handle| handle.num_ids())
            .sum()
    }

    /// Of the given context ids, those holding at least one value in
    /// [lo, hi]. Probing stops at the first value that matches.
    pub fn range_inclusive_contains(&self, lo: i64, hi: i64, context_ids: &[SeqId]) -> Vec<SeqId> {
        let handles = self.handles_in_range_inclusive(lo, hi);

        context_ids
            .iter()
            .copied()
            .filter(|&id| handles.iter().any(|handle| handle.contains(id)))
            .collect()
    }

    /// Of the given context ids, those satisfying `comparator value`.
    pub fn contains_context_ids(
        &self,
        comparator: NumComparator,
        value: i64,
        context_ids: &[SeqId],
    ) -> Vec<SeqId> {
        let handles = self.handles_for(comparator, value);

        context_ids
            .iter()
            .copied()
            .filter(|&id| handles.iter().any(|handle| handle.contains(id)))
            .collect()
    }

    /// All seq_ids beyond the top `k`, walking values in descending order.
    /// Within one value the insertion (ascending seq_id) order decides which
    /// ids count toward k. Output is grouped by descending value.
    pub fn seq_ids_outside_top_k(&self, k: usize) -> Vec<SeqId> {
        let mut seq_ids = Vec::new();
        let mut ids_skipped = 0usize;

        for (_, handle) in self.map.iter().rev() {
            let num_ids = handle.num_ids() as usize;

            if ids_skipped > k {
                handle.uncompress_into(&mut seq_ids);
            } else if ids_skipped + num_ids > k {
                // this value straddles the limit; keep only the tail
                let ids = handle.uncompress();
                for (i, &seq_id) in ids.iter().enumerate() {
                    if ids_skipped + i >= k {
                        seq_ids.push(seq_id);
                    }
                }
            }

            ids_skipped += num_ids;
        }

        seq_ids
    }

    /// Smallest and greatest values held by any of `result_ids`. Two linear
    /// scans, each stopping at the first entry intersecting the result set.
    pub fn get_min_max(&self, result_ids: &[SeqId]) -> Option<(i64, i64)> {
        let min = self
            .map
            .iter()
            .find(|(_, handle)| handle.contains_atleast_one(result_ids))
            .map(|(&value, _)| value)?;

        let max = self
            .map
            .iter()
            .rev()
            .find(|(_, handle)| handle.contains_atleast_one(result_ids))
            .map(|(&value, _)| value)?;

        Some((min, max))
    }

    /// Iterator bound to an equality predicate.
    pub fn iterator(&self, comparator: NumComparator, value: i64) -> NumericIterator<'_> {
        NumericIterator::new(self, comparator, value)
    }
}

#[derive(Debug)]
enum NumericIteratorInner<'a> {
    None,
    /// Compact postings are uncompressed up front and walked as an array.
    Array { ids: Vec<SeqId>, index: usize },
    List {
        list: &'a BlockPostingList,
        it: PostingIterator<'a>,
    },
}

/// Equality-bound iterator over one value's posting set.
#[derive(Debug)]
pub struct NumericIterator<'a> {
    pub seq_id: SeqId,
    pub is_valid: bool,
    /// Upper bound of ids this iterator can yield. Lets callers distinguish
    /// "matched nothing" from "exhausted" once is_valid turns false.
    pub approx_filter_ids_length: u32,
    inner: NumericIteratorInner<'a>,
}

impl<'a> NumericIterator<'a> {
    fn new(tree: &'a NumericIndex, comparator: NumComparator, value: i64) -> Self {
        let mut iterator = NumericIterator {
            seq_id: 0,
            is_valid: false,
            approx_filter_ids_length: 0,
            inner: NumericIteratorInner::None,
        };

        if comparator != NumComparator::Equals {
            return iterator;
        }

        let Some(handle) = tree.map.get(&value) else {
            return iterator;
        };

        iterator.approx_filter_ids_length = handle.num_ids();
        iterator.inner = match handle {
            PostingHandle::Compact(list) => NumericIteratorInner::Array {
                ids: list.ids().to_vec(),
                index: 0,
            },
            PostingHandle::Full(boxed) => {
                let list = boxed.as_ref();
                NumericIteratorInner::List {
                    list,
                    it: list.iter(),
                }
            }
        };
        iterator.sync();
        iterator
    }

    fn sync(&mut self) {
        match &self.inner {
            NumericIteratorInner::None => self.is_valid = false,
            NumericIteratorInner::Array { ids, index } => {
                self.is_valid = *index < ids.len();
                if self.is_valid {
                    self.seq_id = ids[*index];
                }
            }
            NumericIteratorInner::List { it, .. } => {
                self.is_valid = it.valid();
                if self.is_valid {
                    self.seq_id = it.id();
                }
            }
        }
    }

    /// Tri-state: 1 = id matches, 0 = id not matched but ids remain,
    /// -1 = iterator exhausted.
    pub fn is_id_valid(&mut self, id: SeqId) -> i32 {
        if !self.is_valid {
            return -1;
        }

        self.skip_to(id);
        if self.is_valid {
            (self.seq_id == id) as i32
        } else {
            -1
        }
    }

    pub fn next(&mut self) {
        if !self.is_valid {
            return;
        }

        match &mut self.inner {
            NumericIteratorInner::None => {}
            NumericIteratorInner::Array { index, .. } => *index += 1,
            NumericIteratorInner::List { it, .. } => it.next(),
        }
        self.sync();
    }

    /// Advance until seq_id reaches or overshoots id.
    pub fn skip_to(&mut self, id: SeqId) {
        if !self.is_valid {
            return;
        }

        match &mut self.inner {
            NumericIteratorInner::None => {}
            NumericIteratorInner::Array { ids, index } => {
                *index += ids[*index..].partition_point(|&v| v < id);
            }
            NumericIteratorInner::List { it, .. } => it.skip_to(id),
        }
        self.sync();
    }

    /// Return to the initial position.
    pub fn reset(&mut self) {
        match &mut self.inner {
            NumericIteratorInner::None => {}
            NumericIteratorInner::Array { index, .. } => *index = 0,
            NumericIteratorInner::List { list, it } => *it = (*list).iter(),
        }
        self.sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> NumericIndex {
        // age 21 -> [1, 4], age 24 -> [0, 2, 3]
        let mut tree = NumericIndex::new();
        tree.insert(21, 1);
        tree.insert(21, 4);
        tree.insert(24, 0);
        tree.insert(24, 2);
        tree.insert(24, 3);
        tree
    }

    #[test]
    fn test_equality_search() {
        let tree = sample_tree();
        assert_eq!(tree.search(NumComparator::Equals, 21), vec![1, 4]);
        assert_eq!(tree.search(NumComparator::Equals, 99), Vec::<SeqId>::new());
    }

    #[test]
    fn test_comparator_searches() {
        let tree = sample_tree();

        assert_eq!(tree.search(NumComparator::GreaterThan, 24), Vec::<SeqId>::new());
        assert_eq!(tree.search(NumComparator::GreaterThanEquals, 24), vec![0, 2, 3]);
        assert_eq!(tree.search(NumComparator::LessThanEquals, 21), vec![1, 4]);
        assert_eq!(tree.search(NumComparator::LessThan, 21), Vec::<SeqId>::new());
        assert_eq!(
            tree.search(NumComparator::GreaterThan, 20),
            vec![0, 1, 2, 3, 4]
        );
    }

    #[test]
    fn test_range_inclusive_search() {
        let tree = sample_tree();
        assert_eq!(tree.range_inclusive_search(21, 24), vec![0, 1, 2, 3, 4]);
        assert_eq!(tree.range_inclusive_search(22, 23), Vec::<SeqId>::new());
        assert_eq!(tree.range_inclusive_search(24, 21), Vec::<SeqId>::new());
    }

    #[test]
    fn test_approx_counts() {
        let tree = sample_tree();
        assert_eq!(tree.approx_search_count(NumComparator::GreaterThanEquals, 21), 5);
        assert_eq!(tree.approx_search_count(NumComparator::Equals, 24), 3);
        assert_eq!(tree.approx_range_inclusive_search_count(21, 21), 2);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut tree = sample_tree();
        tree.insert(21, 1);
        assert_eq!(tree.search(NumComparator::Equals, 21), vec![1, 4]);
    }

    #[test]
    fn test_remove_drops_empty_entries() {
        let mut tree = sample_tree();
        tree.remove(21, 1);
        tree.remove(21, 4);

        assert_eq!(tree.size(), 1);
        assert!(tree.get(21).is_none());

        // removing from a missing value is a no-op
        tree.remove(21, 9);
        assert_eq!(tree.size(), 1);
    }

    #[test]
    fn test_range_inclusive_contains() {
        let tree = sample_tree();
        assert_eq!(tree.range_inclusive_contains(21, 24, &[0, 1, 7]), vec![0, 1]);
        assert_eq!(
            tree.range_inclusive_contains(22, 23, &[0, 1]),
            Vec::<SeqId>::new()
        );
    }

    #[test]
    fn test_contains_context_ids() {
        let tree = sample_tree();
        assert_eq!(
            tree.contains_context_ids(NumComparator::GreaterThanEquals, 24, &[1, 2, 3]),
            vec![2, 3]
        );
    }

    #[test]
    fn test_seq_ids_outside_top_k() {
        let tree = sample_tree();

        // descending by value: 24 contributes [0, 2, 3], then 21 -> [1, 4]
        assert_eq!(tree.seq_ids_outside_top_k(0), vec![0, 2, 3, 1, 4]);
        assert_eq!(tree.seq_ids_outside_top_k(2), vec![3, 1, 4]);
        assert_eq!(tree.seq_ids_outside_top_k(3), vec![1, 4]);
        assert_eq!(tree.seq_ids_outside_top_k(10), Vec::<SeqId>::new());
    }

    #[test]
    fn test_get_min_max() {
        let tree = sample_tree();
        assert_eq!(tree.get_min_max(&[1, 2]), Some((21, 24)));
        assert_eq!(tree.get_min_max(&[4]), Some((21, 21)));
        assert_eq!(tree.get_min_max(&[99]), None);
    }

    #[test]
    fn test_iterator_protocol() {
        let tree = sample_tree();
        let mut it = tree.iterator(NumComparator::Equals, 24);

        assert!(it.is_valid);
        assert_eq!(it.approx_filter_ids_length, 3);
        assert_eq!(it.seq_id, 0);

        it.next();
        assert_eq!(it.seq_id, 2);

        it.skip_to(3);
        assert_eq!(it.seq_id, 3);

        it.next();
        assert!(!it.is_valid);

        it.reset();
        assert!(it.is_valid);
        assert_eq!(it.seq_id, 0);
    }

    #[test]
    fn test_iterator_is_id_valid() {
        let tree = sample_tree();
        let mut it = tree.iterator(NumComparator::Equals, 24);

        assert_eq!(it.is_id_valid(2), 1);
        assert_eq!(it.is_id_valid(2), 1);

        // not matched, but ids remain past it
        let mut it2 = tree.iterator(NumComparator::Equals, 24);
        assert_eq!(it2.is_id_valid(1), 0);

        // beyond the last id
        let mut it3 = tree.iterator(NumComparator::Equals, 24);
        assert_eq!(it3.is_id_valid(50), -1);
    }

    #[test]
    fn test_iterator_missing_value() {
        let tree = sample_tree();
        let mut it = tree.iterator(NumComparator::Equals, 99);
        assert!(!it.is_valid);
        assert_eq!(it.approx_filter_ids_length, 0);
        assert_eq!(it.is_id_valid(0), -1);
    }

    #[test]
    fn test_iterator_over_block_backed_value() {
        let mut tree = NumericIndex::new();
        for id in 0..200 {
            tree.insert(7, id);
        }

        let mut it = tree.iterator(NumComparator::Equals, 7);
        assert_eq!(it.approx_filter_ids_length, 200);

        it.skip_to(150);
        assert_eq!(it.seq_id, 150);
        it.skip_to(500);
        assert!(!it.is_valid);

        it.reset();
        assert!(it.is_valid);
        assert_eq!(it.seq_id, 0);
    }
}
