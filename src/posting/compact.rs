use crate::core::types::SeqId;
use crate::posting::block_list::BlockPostingList;

/// Inline posting set for small cardinalities: a single sorted distinct run
/// of seq_ids with an explicit capacity. The capacity is owned by the handle
/// layer, which decides between growing and promoting to a block list, so
/// `upsert` reports the shortfall instead of growing.
#[derive(Debug, Clone)]
pub struct CompactPostingList {
    ids: Vec<SeqId>,
    capacity: u16,
}

impl CompactPostingList {
    pub fn with_capacity(capacity: u16) -> Self {
        CompactPostingList {
            ids: Vec::with_capacity(capacity as usize),
            capacity,
        }
    }

    /// Build from the given ids (deduplicated, sorted on insert).
    pub fn create(ids: &[SeqId]) -> Self {
        let mut list = CompactPostingList::with_capacity(ids.len().max(1) as u16);
        for &id in ids {
            list.upsert(id);
        }
        list
    }

    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: u16) {
        debug_assert!(capacity as usize >= self.ids.len());
        self.capacity = capacity;
        self.ids.shrink_to(capacity as usize);
        self.ids.reserve_exact(capacity as usize - self.ids.len());
    }

    pub fn num_ids(&self) -> u32 {
        self.ids.len() as u32
    }

    pub fn first_id(&self) -> Option<SeqId> {
        self.ids.first().copied()
    }

    pub fn last_id(&self) -> Option<SeqId> {
        self.ids.last().copied()
    }

    pub fn ids(&self) -> &[SeqId] {
        &self.ids
    }

    /// Insert id preserving order. Returns the extra capacity needed when the
    /// list is full (no mutation happens in that case), 0 otherwise. An id
    /// that is already present is a no-op returning 0.
    ///
    /// The length cap is small, so a linear scan beats binary search here.
    pub fn upsert(&mut self, id: SeqId) -> u16 {
        let len = self.ids.len();

        if let Some(&last) = self.ids.last() {
            if id <= last {
                let mut i = 0;
                while i < len {
                    if self.ids[i] == id {
                        return 0;
                    }
                    if self.ids[i] > id {
                        break;
                    }
                    i += 1;
                }

                if len + 1 > self.capacity as usize {
                    return (len + 1 - self.capacity as usize) as u16;
                }

                self.ids.insert(i, id);
                return 0;
            }
        }

        // append past the tail (or first id)
        if len + 1 > self.capacity as usize {
            return (len + 1 - self.capacity as usize) as u16;
        }

        self.ids.push(id);
        0
    }

    /// Remove id if present; absent id is a no-op.
    pub fn erase(&mut self, id: SeqId) {
        let mut i = 0;
        while i < self.ids.len() {
            if self.ids[i] > id {
                return;
            }
            if self.ids[i] == id {
                self.ids.remove(i);
                return;
            }
            i += 1;
        }
    }

    pub fn contains(&self, id: SeqId) -> bool {
        for &existing in &self.ids {
            if existing > id {
                return false;
            }
            if existing == id {
                return true;
            }
        }
        false
    }

    pub fn contains_atleast_one(&self, target_ids: &[SeqId]) -> bool {
        let mut i = 0;
        let mut t = 0;

        while i < self.ids.len() && t < target_ids.len() {
            if self.ids[i] == target_ids[t] {
                return true;
            }
            if self.ids[i] < target_ids[t] {
                i += 1;
            } else {
                t += 1;
            }
        }

        false
    }

    /// Count of ids present in both this list and the sorted `res_ids`.
    pub fn intersect_count(&self, res_ids: &[SeqId]) -> u32 {
        let mut count = 0;
        let mut i = 0;
        let mut res_index = 0;

        while i < self.ids.len() && res_index < res_ids.len() {
            let curr_id = self.ids[i];

            if curr_id < res_ids[res_index] {
                i += 1;
            } else if curr_id > res_ids[res_index] {
                // gallop: jump to the first result id >= curr_id
                res_index += res_ids[res_index..].partition_point(|&v| v < curr_id);
            } else {
                i += 1;
                res_index += 1;
                count += 1;
            }
        }

        count
    }

    /// Expand into the block-chained representation.
    pub fn to_block_list(&self, block_max: u16) -> BlockPostingList {
        let mut list = BlockPostingList::new(block_max);
        for &id in &self.ids {
            list.upsert(id);
        }
        list
    }
}
