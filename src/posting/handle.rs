use log::debug;

use crate::core::config::{BLOCK_MAX, COMPACT_THRESHOLD};
use crate::core::types::SeqId;
use crate::posting::block_list::BlockPostingList;
use crate::posting::compact::CompactPostingList;
use crate::posting::intersect;

/// Uniform reference to a posting set that hides whether it is compact or
/// block-backed. Upsert may promote, erase may demote, so mutating
/// operations go through `&mut self` and can replace the variant.
#[derive(Debug, Clone)]
pub enum PostingHandle {
    Compact(CompactPostingList),
    Full(Box<BlockPostingList>),
}

impl PostingHandle {
    /// Build a handle for the given ids, picking the representation by size.
    pub fn create(ids: &[SeqId]) -> Self {
        if ids.len() < COMPACT_THRESHOLD as usize {
            PostingHandle::Compact(CompactPostingList::create(ids))
        } else {
            let mut list = BlockPostingList::new(BLOCK_MAX);
            for &id in ids {
                list.upsert(id);
            }
            PostingHandle::Full(Box::new(list))
        }
    }

    pub fn upsert(&mut self, id: SeqId) {
        match self {
            PostingHandle::Compact(list) => {
                let extra = list.upsert(id);
                if extra == 0 {
                    return;
                }

                if list.capacity() as usize + extra as usize > COMPACT_THRESHOLD as usize {
                    // promote to the block-chained form
                    debug!("promoting compact posting of {} ids", list.num_ids());
                    let mut full = list.to_block_list(BLOCK_MAX);
                    full.upsert(id);
                    *self = PostingHandle::Full(Box::new(full));
                } else {
                    // grow by 30%, capped at the compact threshold
                    let wanted = (list.capacity() + extra) as f32 * 1.3;
                    let new_capacity = (wanted as u16).min(COMPACT_THRESHOLD);
                    list.set_capacity(new_capacity);
                    list.upsert(id);
                }
            }
            PostingHandle::Full(list) => list.upsert(id),
        }
    }

    pub fn erase(&mut self, id: SeqId) {
        match self {
            PostingHandle::Compact(list) => {
                list.erase(id);

                // halve the capacity once the list shrinks well below it
                if list.num_ids() < list.capacity() as u32 / 2 {
                    let new_capacity = (list.capacity() / 2).max(1);
                    list.set_capacity(new_capacity);
                }
            }
            PostingHandle::Full(list) => {
                list.erase(id);

                if list.num_blocks() == 1 && list.num_ids() <= COMPACT_THRESHOLD as u32 {
                    debug!("demoting block posting of {} ids", list.num_ids());
                    let compact = CompactPostingList::create(&list.uncompress());
                    *self = PostingHandle::Compact(compact);
                }
            }
        }
    }

    pub fn contains(&self, id: SeqId) -> bool {
        match self {
            PostingHandle::Compact(list) => list.contains(id),
            PostingHandle::Full(list) => list.contains(id),
        }
    }

    pub fn contains_atleast_one(&self, target_ids: &[SeqId]) -> bool {
        match self {
            PostingHandle::Compact(list) => list.contains_atleast_one(target_ids),
            PostingHandle::Full(list) => list.contains_atleast_one(target_ids),
        }
    }

    pub fn num_ids(&self) -> u32 {
        match self {
            PostingHandle::Compact(list) => list.num_ids(),
            PostingHandle::Full(list) => list.num_ids(),
        }
    }

    pub fn first_id(&self) -> Option<SeqId> {
        match self {
            PostingHandle::Compact(list) => list.first_id(),
            PostingHandle::Full(list) => list.first_id(),
        }
    }

    pub fn last_id(&self) -> Option<SeqId> {
        match self {
            PostingHandle::Compact(list) => list.last_id(),
            PostingHandle::Full(list) => list.last_id(),
        }
    }

    pub fn uncompress(&self) -> Vec<SeqId> {
        match self {
            PostingHandle::Compact(list) => list.ids().to_vec(),
            PostingHandle::Full(list) => list.uncompress(),
        }
    }

    pub fn uncompress_into(&self, out: &mut Vec<SeqId>) {
        match self {
            PostingHandle::Compact(list) => out.extend_from_slice(list.ids()),
            PostingHandle::Full(list) => list.uncompress_into(out),
        }
    }

    pub fn intersect_count(&self, res_ids: &[SeqId], sample_interval: usize) -> u32 {
        match self {
            // compact lists are small enough that sampling never pays off
            PostingHandle::Compact(list) => list.intersect_count(res_ids),
            PostingHandle::Full(list) => list.intersect_count(res_ids, sample_interval),
        }
    }

    /// Union of the given posting sets, ascending.
    pub fn merge(handles: &[&PostingHandle]) -> Vec<SeqId> {
        let expanded = ExpandedLists::new(handles);
        intersect::merge_block_lists(&expanded.lists())
    }

    /// Intersection of the given posting sets, ascending.
    pub fn intersect(handles: &[&PostingHandle]) -> Vec<SeqId> {
        let expanded = ExpandedLists::new(handles);
        intersect::intersect_block_lists(&expanded.lists())
    }
}

/// Mixed-handle operations expand compact sets into temporary block lists;
/// the expansion cost is paid once and reclaimed on drop.
pub(crate) struct ExpandedLists<'a> {
    handles: &'a [&'a PostingHandle],
    expanded: Vec<Option<BlockPostingList>>,
}

impl<'a> ExpandedLists<'a> {
    pub fn new(handles: &'a [&'a PostingHandle]) -> Self {
        let expanded = handles
            .iter()
            .map(|handle| match handle {
                PostingHandle::Compact(list) => Some(list.to_block_list(BLOCK_MAX)),
                PostingHandle::Full(_) => None,
            })
            .collect();

        ExpandedLists { handles, expanded }
    }

    pub fn lists(&self) -> Vec<&BlockPostingList> {
        self.handles
            .iter()
            .zip(&self.expanded)
            .map(|(handle, expansion)| match handle {
                PostingHandle::Full(list) => &**list,
                PostingHandle::Compact(_) => expansion.as_ref().unwrap(),
            })
            .collect()
    }
}
